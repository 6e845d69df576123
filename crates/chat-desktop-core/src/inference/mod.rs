//! Inference gateway
//!
//! [`ResponseSource`] is the seam between the `ollama.*` capabilities and
//! whatever produces the text: the local Ollama server, or a canned response
//! for development and tests.

pub mod fence;
pub mod ollama;

pub use fence::render_code_fences;
pub use ollama::OllamaSource;

use crate::error::InferenceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const MOCK_RESPONSE: &str = include_str!("../../assets/mock.md");
const STATIC_MODEL: &str = "static";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// One increment of a streamed response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatChunk {
    pub model: String,
    pub created_at: String,
    pub message: ChatMessage,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
}

/// Called once per chunk, in stream order, on the generating task
pub type ChunkHandler = Arc<dyn Fn(ChatChunk) + Send + Sync>;

#[async_trait]
pub trait ResponseSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Generate a reply to `prompt`, feeding chunks to `on_chunk` as they
    /// arrive. Returns the full raw response text. The last chunk handed to
    /// `on_chunk` has `done: true`.
    async fn chat(&self, model: &str, prompt: &str, on_chunk: ChunkHandler) -> Result<String, InferenceError>;

    /// Names of the models the source can answer with
    async fn models(&self) -> Result<Vec<String>, InferenceError>;
}

/// Canned response, delivered as a single final chunk
pub struct StaticSource {
    response: String,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::with_response(MOCK_RESPONSE)
    }

    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

impl Default for StaticSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResponseSource for StaticSource {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn chat(&self, model: &str, prompt: &str, on_chunk: ChunkHandler) -> Result<String, InferenceError> {
        tracing::debug!(
            op = "inference.static.chat",
            model = %model,
            prompt_len = prompt.len(),
            "Serving canned response"
        );
        on_chunk(ChatChunk {
            model: model.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            message: ChatMessage {
                role: "assistant".to_string(),
                content: self.response.clone(),
            },
            done: true,
            done_reason: Some("stop".to_string()),
        });
        Ok(self.response.clone())
    }

    async fn models(&self) -> Result<Vec<String>, InferenceError> {
        Ok(vec![STATIC_MODEL.to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_static_source_emits_one_final_chunk() {
        let source = StaticSource::with_response("hello");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: ChunkHandler = Arc::new(move |chunk| sink.lock().unwrap().push(chunk));

        let full = source.chat("m", "hi", handler).await.unwrap();
        assert_eq!(full, "hello");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].done);
        assert_eq!(seen[0].message.content, "hello");
        assert_eq!(seen[0].model, "m");
    }

    #[test]
    fn test_bundled_mock_has_code_block() {
        assert!(MOCK_RESPONSE.contains("```"));
    }
}
