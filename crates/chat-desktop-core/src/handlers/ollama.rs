//! ollama.* handlers
//!
//! Generation streams every chunk to the caller on `stream:response` as it
//! arrives. Deltas are pushed raw; the final push replaces the content with
//! the whole response after code-fence rendering. The rendered response is
//! what gets stored.
//!
//! There is no way to stop a generation once started: it runs to completion
//! whether or not anyone is still listening.

use super::{chats, store_failure, with_store};
use crate::api::{Generated, StreamChunk, NEW_CHAT_ID};
use crate::bridge::Caller;
use crate::envelope::{Envelope, INTERNAL, NOT_FOUND};
use crate::events::{ChangeKind, ChangedEntity, DatabaseChange, DATABASE_CHANGE, STREAM_RESPONSE};
use crate::inference::{render_code_fences, ChatChunk, ChunkHandler};
use crate::state::CoreState;
use std::sync::{Arc, Mutex};

/// Handle ollama.generate
pub async fn handle_generate(state: &Arc<CoreState>, caller: &Caller, chat_id: &str, prompt: &str) -> Envelope<Generated> {
    let chat_id = if chat_id == NEW_CHAT_ID {
        let created = chats::handle_create(state, caller).await;
        match created.data {
            Some(c) => c.id,
            None => return created.cast(),
        }
    } else {
        chat_id.to_string()
    };

    let lookup = chat_id.clone();
    let model = match with_store(state, move |store| store.chat_model(&lookup)).await {
        Ok(Some(model)) => model,
        Ok(None) => return Envelope::status_only(NOT_FOUND, format!("Chat '{}' not found", chat_id)),
        Err(e) => return store_failure("Failed to look up chat", &e),
    };

    let message_id = state.store.next_id();
    tracing::info!(
        op = "ollama.generate.start",
        chat_id = %chat_id,
        message_id = %message_id,
        model = %model,
        source = state.source.name(),
        "Generating response"
    );

    let on_chunk = stream_pusher(caller.clone(), chat_id.clone(), message_id.clone());
    let raw = match state.source.chat(&model, prompt, on_chunk).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(op = "ollama.generate.failed", chat_id = %chat_id, error = %e, "Generation failed");
            return Envelope::failure(INTERNAL, "Failed to generate response", &e);
        }
    };

    let rendered = render_code_fences(&raw);
    let exchange = (chat_id.clone(), prompt.to_string(), message_id.clone());
    let stored = with_store(state, move |store| {
        let (chat_id, prompt, message_id) = exchange;
        store.record_exchange(&chat_id, &prompt, &rendered, Some(&message_id))
    })
    .await;
    if let Err(e) = stored {
        return store_failure("Failed to store response", &e);
    }
    caller.push(
        DATABASE_CHANGE,
        &DatabaseChange::new(ChangedEntity::Message, ChangeKind::Insert),
    );

    tracing::info!(
        op = "ollama.generate.done",
        chat_id = %chat_id,
        message_id = %message_id,
        "Response generated"
    );
    Envelope::success(
        "Response generated",
        Generated {
            chat_id,
            message_id,
        },
    )
}

/// Chunk handler that forwards every chunk to the caller.
fn stream_pusher(caller: Caller, chat_id: String, message_id: String) -> ChunkHandler {
    let full = Arc::new(Mutex::new(String::new()));
    Arc::new(move |mut chunk: ChatChunk| {
        if let Ok(mut full) = full.lock() {
            full.push_str(&chunk.message.content);
            if chunk.done {
                chunk.message.content = render_code_fences(&full);
            }
        }
        caller.push(
            STREAM_RESPONSE,
            &StreamChunk {
                data: chunk,
                message_id: message_id.clone(),
                chat_id: chat_id.clone(),
            },
        );
    })
}

/// Handle ollama.models
pub async fn handle_models(state: &Arc<CoreState>) -> Envelope<Vec<String>> {
    match state.source.models().await {
        Ok(models) => Envelope::success("Model list retrieved", models),
        Err(e) => Envelope::failure(INTERNAL, "Failed to list models", &e),
    }
}
