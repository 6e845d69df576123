//! Wire format between the host and Chat Desktop Core
//!
//! Newline-delimited JSON in both directions.
//!
//! Request (host → core):
//!   { "id": "<uuid>"|null, "endpoint": "invoke-api:<fqn>"|"on-api:<fqn>", "args": [...] }
//!
//! Frame (core → host):
//!   { "type": "response", "id": "<uuid>", "envelope": {...} }
//!   { "type": "event", "channel": "<name>", "payload": ... }

use crate::envelope::Envelope;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Absent for fire-and-forget calls
    #[serde(default)]
    pub id: Option<String>,
    pub endpoint: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Response { id: String, envelope: Envelope<Value> },
    Event { channel: String, payload: Value },
}

/// Serialize one message as a single line (with trailing newline)
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
