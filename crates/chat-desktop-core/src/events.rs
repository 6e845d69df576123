//! Event channel
//!
//! Privileged → untrusted push notifications.
//!
//! - [`Publisher`] (privileged side) queues `(channel, payload)` frames for the
//!   connection writer. Best effort: a closed connection drops the push.
//! - [`SubscriberRegistry`] (untrusted side) holds `(channel, callback)`
//!   subscriptions and delivers incoming events to them.
//!
//! Frames for one connection flow through a single unbounded queue, so pushes
//! on a channel reach each subscriber in send order. There is no backpressure:
//! a slow consumer just accumulates pending deliveries.

use crate::bridge::protocol::Frame;
use crate::envelope::Envelope;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;

/// Incremental inference output
pub const STREAM_RESPONSE: &str = "stream:response";
/// Rows inserted or deleted in the store
pub const DATABASE_CHANGE: &str = "database:change";

/// Payload of `database:change`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseChange {
    pub name: ChangedEntity,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangedEntity {
    Chat,
    Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl DatabaseChange {
    pub fn new(name: ChangedEntity, kind: ChangeKind) -> Self {
        Self { name, kind }
    }
}

// =============================================================================
// Privileged side
// =============================================================================

/// Create a publisher and the frame queue it feeds
pub fn channel() -> (Publisher, mpsc::UnboundedReceiver<Frame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Publisher { tx }, rx)
}

#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::UnboundedSender<Frame>,
}

impl Publisher {
    /// Send a frame on the connection's outgoing queue.
    ///
    /// Returns false if the connection is gone.
    pub fn send_frame(&self, frame: Frame) -> bool {
        self.tx.send(frame).is_ok()
    }

    /// Push an unacknowledged notification to every subscriber of `channel`.
    pub fn push<P: Serialize + ?Sized>(&self, channel: &str, payload: &P) {
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    op = "events.push.serialize_error",
                    channel = %channel,
                    error = %e,
                    "Dropping unserializable event"
                );
                return;
            }
        };

        let frame = Frame::Event {
            channel: channel.to_string(),
            payload,
        };

        if !self.send_frame(frame) {
            tracing::debug!(
                op = "events.push.dropped",
                channel = %channel,
                "Connection closed, event dropped"
            );
        }
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

// =============================================================================
// Untrusted side
// =============================================================================

pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct Subscriptions {
    next_id: u64,
    channels: HashMap<String, Vec<(u64, Callback)>>,
}

/// Channel-name → callbacks registry
///
/// Created when the bridge is initialized and cleared at shutdown. Clones
/// share the same subscriptions.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<Mutex<Subscriptions>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe and return the disposer wrapped in a success envelope.
    pub fn on<F>(&self, channel: &str, callback: F) -> Envelope<Disposer>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let disposer = self.subscribe(channel, callback);
        Envelope::success(format!("{} listener registered", channel), disposer)
    }

    pub fn subscribe<F>(&self, channel: &str, callback: F) -> Disposer
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = match self.inner.lock() {
            Ok(mut subs) => {
                subs.next_id += 1;
                let id = subs.next_id;
                subs.channels
                    .entry(channel.to_string())
                    .or_default()
                    .push((id, Arc::new(callback)));
                id
            }
            Err(_) => 0,
        };

        Disposer {
            registry: Arc::downgrade(&self.inner),
            channel: channel.to_string(),
            id,
        }
    }

    /// Deliver one event to every current subscriber of `channel`.
    ///
    /// Callbacks run outside the lock, each under `catch_unwind`, so a
    /// panicking subscriber neither blocks the others nor kills the caller.
    /// Returns how many callbacks completed.
    pub fn deliver(&self, channel: &str, payload: &Value) -> usize {
        let callbacks: Vec<Callback> = match self.inner.lock() {
            Ok(subs) => subs
                .channels
                .get(channel)
                .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default(),
            Err(_) => return 0,
        };

        let mut delivered = 0;
        for callback in callbacks {
            let outcome =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(payload)));
            match outcome {
                Ok(()) => delivered += 1,
                Err(_) => tracing::warn!(
                    op = "events.deliver.panic",
                    channel = %channel,
                    "Subscriber callback panicked"
                ),
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .lock()
            .ok()
            .and_then(|subs| subs.channels.get(channel).map(Vec::len))
            .unwrap_or(0)
    }

    /// Drop every subscription (process shutdown)
    pub fn clear(&self) {
        if let Ok(mut subs) = self.inner.lock() {
            subs.channels.clear();
        }
    }
}

/// Detaches exactly the callback it was issued for
pub struct Disposer {
    registry: Weak<Mutex<Subscriptions>>,
    channel: String,
    id: u64,
}

impl Disposer {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Remove the subscription. Returns false if it was already gone.
    pub fn dispose(self) -> bool {
        let Some(inner) = self.registry.upgrade() else {
            return false;
        };
        let Ok(mut subs) = inner.lock() else {
            return false;
        };
        let Some(list) = subs.channels.get_mut(&self.channel) else {
            return false;
        };

        let before = list.len();
        list.retain(|(id, _)| *id != self.id);
        let removed = list.len() != before;
        if list.is_empty() {
            subs.channels.remove(&self.channel);
        }
        removed
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .finish()
    }
}
