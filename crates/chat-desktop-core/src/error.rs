//! Error types
//!
//! One enum per concern. Capability leaves turn these into ERROR envelopes;
//! none of them cross the process boundary as-is.

use thiserror::Error;

/// Capability tree and dispatcher errors
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Capability key is empty in path '{0}'")]
    EmptyKey(String),
    #[error("Capability '{0}' is already defined")]
    DuplicateKey(String),
    #[error("Endpoint '{0}' is already registered")]
    DuplicateEndpoint(String),
    #[error("Expected {expected} argument(s), got {got}")]
    Arity { expected: usize, got: usize },
    #[error("Invalid argument: {0}")]
    Args(#[from] serde_json::Error),
}

/// Persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database unavailable: {0}")]
    Unavailable(String),
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Chat '{0}' not found")]
    ChatNotFound(String),
    #[error("Could not generate a unique id after {0} attempts")]
    IdExhausted(usize),
    #[error("Database lock poisoned")]
    Poisoned,
    #[error("Database task failed: {0}")]
    Task(String),
}

/// Inference service errors
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Inference API error: {0}")]
    Api(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Inference server not running at {0}. Start it with: ollama serve")]
    ServerNotRunning(String),
    #[error("Stream ended before the final chunk")]
    Truncated,
}

/// Failure to reach the other process at all
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to start core process: {0}")]
    Spawn(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Connection to core process closed")]
    Closed,
    #[error("Core process did not respond within {secs}s for {endpoint}")]
    Timeout { endpoint: String, secs: u64 },
}
