//! Ollama API client for local LLM inference.
//!
//! Uses the streaming chat endpoint: the body is newline-delimited JSON, one
//! object per generated increment, the last one carrying `done: true`.

use super::{ChatChunk, ChatMessage, ChunkHandler, ResponseSource};
use crate::error::InferenceError;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

/// Default Ollama server URL.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

pub struct OllamaSource {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// One NDJSON line of a chat stream
#[derive(Debug, Deserialize)]
struct StreamLine {
    #[serde(default)]
    model: String,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<TagsModel>,
}

#[derive(Debug, Deserialize)]
struct TagsModel {
    name: String,
}

/// Splits a byte stream into complete lines.
///
/// Bytes are buffered raw so a multi-byte character split across two network
/// chunks is decoded only once it is whole.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        (!line.is_empty()).then_some(line)
    }
}

fn parse_line(line: &str) -> Result<ChatChunk, InferenceError> {
    let parsed: StreamLine = serde_json::from_str(line)?;
    if let Some(error) = parsed.error {
        return Err(InferenceError::Api(error));
    }
    Ok(ChatChunk {
        model: parsed.model,
        created_at: parsed.created_at,
        message: parsed.message.unwrap_or_else(|| ChatMessage {
            role: "assistant".to_string(),
            content: String::new(),
        }),
        done: parsed.done,
        done_reason: parsed.done_reason,
    })
}

impl OllamaSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_send_error(&self, e: reqwest::Error) -> InferenceError {
        if e.is_connect() {
            InferenceError::ServerNotRunning(self.base_url.clone())
        } else {
            InferenceError::Http(e)
        }
    }
}

impl Default for OllamaSource {
    fn default() -> Self {
        Self::new(DEFAULT_OLLAMA_URL)
    }
}

#[async_trait]
impl ResponseSource for OllamaSource {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn chat(&self, model: &str, prompt: &str, on_chunk: ChunkHandler) -> Result<String, InferenceError> {
        let request = ChatRequest {
            model,
            messages: vec![RequestMessage {
                role: "user",
                content: prompt,
            }],
            stream: true,
        };

        let url = format!("{}/api/chat", self.base_url);
        tracing::info!(op = "inference.ollama.chat", model = %model, url = %url, "Starting generation");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(InferenceError::Api(format!("{}: {}", status, text)));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = LineBuffer::default();
        let mut full = String::new();
        let mut chunks = 0usize;

        let mut ended = false;
        while !ended {
            let lines = match stream.next().await {
                Some(bytes) => buffer.push(&bytes?),
                None => {
                    ended = true;
                    buffer.finish().into_iter().collect()
                }
            };

            for line in lines {
                let chunk = parse_line(&line)?;
                full.push_str(&chunk.message.content);
                chunks += 1;
                let done = chunk.done;
                on_chunk(chunk);
                if done {
                    tracing::info!(op = "inference.ollama.done", model = %model, chunks, "Generation finished");
                    return Ok(full);
                }
            }
        }

        tracing::warn!(op = "inference.ollama.truncated", model = %model, "Stream ended without final chunk");
        Err(InferenceError::Truncated)
    }

    async fn models(&self) -> Result<Vec<String>, InferenceError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(InferenceError::ServerNotRunning(self.base_url.clone()));
        }

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}
