//! Transport seam between the proxy and whatever carries requests
//!
//! [`LocalTransport`] runs a full server loop in the same process over an
//! in-memory duplex stream, so it exercises exactly the wire encoding the
//! child-process transport uses.

use super::client::{Connection, DEFAULT_TIMEOUT};
use super::dispatcher::Dispatcher;
use crate::envelope::Envelope;
use crate::error::TransportError;
use crate::events::SubscriberRegistry;
use crate::server;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{duplex, split, BufReader};
use tokio::task::JoinHandle;

const LOCAL_BUFFER: usize = 64 * 1024;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Request/response call on an `invoke-api:` endpoint
    async fn invoke(&self, endpoint: &str, args: Vec<Value>) -> Result<Envelope<Value>, TransportError>;

    /// Fire-and-forget call on an `on-api:` endpoint
    async fn send(&self, endpoint: &str, args: Vec<Value>) -> Result<(), TransportError>;
}

pub struct LocalTransport {
    connection: Connection,
    server: JoinHandle<()>,
}

impl LocalTransport {
    pub fn connect(dispatcher: Arc<Dispatcher>, registry: SubscriberRegistry) -> Self {
        Self::with_timeout(dispatcher, registry, DEFAULT_TIMEOUT)
    }

    /// Same as [`LocalTransport::connect`] with a custom inactivity timeout.
    pub fn with_timeout(dispatcher: Arc<Dispatcher>, registry: SubscriberRegistry, timeout: Duration) -> Self {
        let (client_io, server_io) = duplex(LOCAL_BUFFER);

        let (server_read, server_write) = split(server_io);
        let server = tokio::spawn(async move {
            if let Err(e) = server::serve(dispatcher, BufReader::new(server_read), server_write, "local").await {
                tracing::warn!(op = "bridge.local.server_error", error = %e, "Local server stopped");
            }
        });

        let (client_read, client_write) = split(client_io);
        let connection = Connection::new(client_read, client_write, registry, timeout);

        tracing::info!(op = "bridge.local.connect", "In-process transport connected");
        Self { connection, server }
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.server.abort();
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn invoke(&self, endpoint: &str, args: Vec<Value>) -> Result<Envelope<Value>, TransportError> {
        self.connection.request(endpoint, args).await
    }

    async fn send(&self, endpoint: &str, args: Vec<Value>) -> Result<(), TransportError> {
        self.connection.notify(endpoint, args).await
    }
}
