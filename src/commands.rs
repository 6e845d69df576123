//! Tauri commands
//!
//! Entry points for the webview. The page never sees the core: it names a
//! capability by FQN and gets back the envelope the proxy leaf produced.

use crate::state::HostState;
use chat_desktop_core::envelope::{Envelope, NOT_FOUND, OK, TRANSPORT};
use serde_json::Value;
use tauri::State;

fn unknown(fqn: &str) -> Envelope<Value> {
    Envelope::status_only(NOT_FOUND, format!("No capability named '{}'", fqn))
}

/// Request/response call through the proxy tree
#[tauri::command]
pub async fn api_invoke(fqn: String, args: Vec<Value>, state: State<'_, HostState>) -> Result<Envelope<Value>, String> {
    let Some(leaf) = state.api.proxy().root().resolve(&fqn) else {
        tracing::warn!(op = "host.invoke.unknown", fqn = %fqn, "Unknown capability");
        return Ok(unknown(&fqn));
    };
    Ok(leaf.call(args).await)
}

/// Fire-and-forget call through the proxy tree
#[tauri::command]
pub async fn api_send(fqn: String, args: Vec<Value>, state: State<'_, HostState>) -> Result<Envelope<Value>, String> {
    let Some(leaf) = state.api.proxy().root().resolve(&fqn) else {
        return Ok(unknown(&fqn));
    };
    match leaf.emit(args).await {
        Ok(()) => Ok(Envelope::status_only(OK, "Sent")),
        Err(e) => Ok(Envelope::failure(TRANSPORT, format!("Core unreachable for {}", fqn), &e)),
    }
}
