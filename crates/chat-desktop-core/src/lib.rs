//! Chat Desktop Core
//!
//! Privileged half of Chat Desktop: owns the chat database and the inference
//! client, and serves them to the untrusted host as a capability tree over a
//! newline-delimited JSON bridge. The boundary-neutral pieces (envelope,
//! endpoint descriptors, proxy, transport, event registry) live here too, so
//! both processes are built against the same definitions.

pub mod api;
pub mod bridge;
pub mod config;
pub mod envelope;
pub mod error;
pub mod events;
pub mod handlers;
pub mod inference;
pub mod server;
pub mod state;
pub mod store;

pub use envelope::{Empty, Envelope, Status};
pub use error::{BridgeError, InferenceError, StoreError, TransportError};
