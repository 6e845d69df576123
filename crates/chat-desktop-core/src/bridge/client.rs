//! Client end of a bridge connection (untrusted side)
//!
//! Speaks the line protocol over any async byte stream: child process pipes in
//! production, an in-memory duplex for the in-process transport and tests.
//!
//! - Requests carry a fresh uuid; the reader task completes the matching
//!   pending slot when the response frame arrives.
//! - Event frames are delivered straight into the [`SubscriberRegistry`].
//! - When the stream ends every pending request resolves to `Closed`.
//! - The timeout is an inactivity limit: a request fails only once the other
//!   end has sent no frame at all for the whole period. A long generation that
//!   keeps streaming chunks never times out.

use super::endpoint::EMIT_NAMESPACE;
use super::protocol::{encode_line, Frame, Request};
use super::transport::Transport;
use crate::envelope::Envelope;
use crate::error::TransportError;
use crate::events::SubscriberRegistry;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Envelope<Value>>>>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct Connection {
    writer: tokio::sync::Mutex<BoxedWriter>,
    pending: Pending,
    alive: Arc<AtomicBool>,
    /// Frames received so far
    activity: Arc<AtomicU64>,
    timeout: Duration,
    reader: JoinHandle<()>,
}

impl Connection {
    pub fn new<R, W>(reader: R, writer: W, registry: SubscriberRegistry, timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: Pending = Arc::default();
        let alive = Arc::new(AtomicBool::new(true));
        let activity = Arc::new(AtomicU64::new(0));

        let reader = tokio::spawn(read_frames(
            BufReader::new(reader),
            pending.clone(),
            registry,
            alive.clone(),
            activity.clone(),
        ));

        Self {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending,
            alive,
            activity,
            timeout,
            reader,
        }
    }

    /// False once the other end has closed its output
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn write_request(&self, request: &Request) -> Result<(), TransportError> {
        if !self.is_alive() {
            return Err(TransportError::Closed);
        }
        let line = encode_line(request)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Send a request and wait for its response envelope.
    pub async fn request(&self, endpoint: &str, args: Vec<Value>) -> Result<Envelope<Value>, TransportError> {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, mut rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id.clone(), tx);
        }

        let request = Request {
            id: Some(id.clone()),
            endpoint: endpoint.to_string(),
            args,
        };
        if let Err(e) = self.write_request(&request).await {
            self.forget(&id);
            return Err(e);
        }

        loop {
            let seen = self.activity.load(Ordering::SeqCst);
            match tokio::time::timeout(self.timeout, &mut rx).await {
                Ok(Ok(envelope)) => return Ok(envelope),
                Ok(Err(_)) => return Err(TransportError::Closed),
                Err(_) if self.activity.load(Ordering::SeqCst) != seen => continue,
                Err(_) => break,
            }
        }

        self.forget(&id);
        tracing::warn!(
            op = "bridge.client.timeout",
            endpoint = %endpoint,
            secs = self.timeout.as_secs(),
            "No frame from the other end within the timeout"
        );
        Err(TransportError::Timeout {
            endpoint: endpoint.to_string(),
            secs: self.timeout.as_secs(),
        })
    }

    /// Send a request that expects no response.
    pub async fn notify(&self, endpoint: &str, args: Vec<Value>) -> Result<(), TransportError> {
        let request = Request {
            id: None,
            endpoint: endpoint.to_string(),
            args,
        };
        self.write_request(&request).await
    }

    fn forget(&self, id: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(id);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Transport for Connection {
    async fn invoke(&self, endpoint: &str, args: Vec<Value>) -> Result<Envelope<Value>, TransportError> {
        self.request(endpoint, args).await
    }

    async fn send(&self, endpoint: &str, args: Vec<Value>) -> Result<(), TransportError> {
        debug_assert!(endpoint.starts_with(EMIT_NAMESPACE));
        self.notify(endpoint, args).await
    }
}

async fn read_frames<R>(
    reader: BufReader<R>,
    pending: Pending,
    registry: SubscriberRegistry,
    alive: Arc<AtomicBool>,
    activity: Arc<AtomicU64>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(op = "bridge.client.read_error", error = %e, "Read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let frame = serde_json::from_str::<Frame>(&line);
        if frame.is_ok() {
            activity.fetch_add(1, Ordering::SeqCst);
        }
        match frame {
            Ok(Frame::Response { id, envelope }) => {
                let slot = pending.lock().ok().and_then(|mut p| p.remove(&id));
                match slot {
                    Some(tx) => {
                        let _ = tx.send(envelope);
                    }
                    None => tracing::debug!(
                        op = "bridge.client.orphan_response",
                        id = %id,
                        code = envelope.code(),
                        "Response with no waiting request"
                    ),
                }
            }
            Ok(Frame::Event { channel, payload }) => {
                registry.deliver(&channel, &payload);
            }
            Err(e) => {
                tracing::warn!(
                    op = "bridge.client.bad_frame",
                    error = %e,
                    "Ignoring unparsable frame"
                );
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    if let Ok(mut pending) = pending.lock() {
        pending.clear();
    }
    tracing::info!(op = "bridge.client.closed", "Connection closed");
}
