//! Chat Desktop API surface
//!
//! Endpoint descriptors shared by both processes, the payload types that
//! cross the boundary, and the typed facades the untrusted side calls:
//! [`Api`] (request/response through the proxy) and [`Listeners`] (event
//! subscriptions).

use crate::bridge::{Endpoint, Proxy, Transport, TreeShape};
use crate::envelope::{Empty, Envelope};
use crate::events::{DatabaseChange, Disposer, SubscriberRegistry, DATABASE_CHANGE, STREAM_RESPONSE};
use crate::inference::ChatChunk;
use crate::store::{Chat, Message, NewMessage};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Chat id that makes `ollama.generate` start a new chat
pub const NEW_CHAT_ID: &str = "tmp";

// =============================================================================
// Endpoints
// =============================================================================

pub const CHATS_LIST: Endpoint<(), Vec<Chat>> = Endpoint::new("chats.list");
pub const CHATS_CREATE: Endpoint<(), Created> = Endpoint::new("chats.create");
pub const CHATS_DELETE: Endpoint<(String,), Empty> = Endpoint::new("chats.delete");
pub const MESSAGES_GET_HISTORY: Endpoint<(String,), Vec<Message>> = Endpoint::new("messages.getHistory");
pub const MESSAGES_APPEND: Endpoint<(NewMessage,), Created> = Endpoint::new("messages.append");
pub const OLLAMA_GENERATE: Endpoint<(String, String), Generated> = Endpoint::new("ollama.generate");
pub const OLLAMA_MODELS: Endpoint<(), Vec<String>> = Endpoint::new("ollama.models");

/// Outline of the capability tree, as the untrusted side sees it
pub fn shape() -> TreeShape {
    TreeShape::new()
        .with(CHATS_LIST)
        .with(CHATS_CREATE)
        .with(CHATS_DELETE)
        .with(MESSAGES_GET_HISTORY)
        .with(MESSAGES_APPEND)
        .with(OLLAMA_GENERATE)
        .with(OLLAMA_MODELS)
}

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Created {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Generated {
    pub chat_id: String,
    pub message_id: String,
}

/// Payload of `stream:response`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    pub data: ChatChunk,
    pub message_id: String,
    pub chat_id: String,
}

// =============================================================================
// Request/response facade
// =============================================================================

pub struct Api {
    proxy: Proxy,
}

impl Api {
    pub fn new(proxy: Proxy) -> Self {
        Self { proxy }
    }

    /// Build the proxy tree for this API over `transport`.
    pub fn connect(transport: Arc<dyn Transport>) -> Self {
        Self::new(Proxy::build(&shape(), transport))
    }

    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    pub fn chats(&self) -> Chats<'_> {
        Chats { proxy: &self.proxy }
    }

    pub fn messages(&self) -> Messages<'_> {
        Messages { proxy: &self.proxy }
    }

    pub fn ollama(&self) -> Ollama<'_> {
        Ollama { proxy: &self.proxy }
    }
}

pub struct Chats<'a> {
    proxy: &'a Proxy,
}

impl Chats<'_> {
    pub async fn list(&self) -> Envelope<Vec<Chat>> {
        self.proxy.invoke(CHATS_LIST, ()).await
    }

    pub async fn create(&self) -> Envelope<Created> {
        self.proxy.invoke(CHATS_CREATE, ()).await
    }

    pub async fn delete(&self, id: &str) -> Envelope<Empty> {
        self.proxy.invoke(CHATS_DELETE, (id.to_string(),)).await
    }
}

pub struct Messages<'a> {
    proxy: &'a Proxy,
}

impl Messages<'_> {
    pub async fn get_history(&self, chat_id: &str) -> Envelope<Vec<Message>> {
        self.proxy.invoke(MESSAGES_GET_HISTORY, (chat_id.to_string(),)).await
    }

    pub async fn append(&self, message: NewMessage) -> Envelope<Created> {
        self.proxy.invoke(MESSAGES_APPEND, (message,)).await
    }
}

pub struct Ollama<'a> {
    proxy: &'a Proxy,
}

impl Ollama<'_> {
    /// Generate a reply; chunks arrive on `stream:response` while this waits.
    pub async fn generate(&self, chat_id: &str, prompt: &str) -> Envelope<Generated> {
        self.proxy
            .invoke(OLLAMA_GENERATE, (chat_id.to_string(), prompt.to_string()))
            .await
    }

    /// Start a generation without waiting for it to finish.
    pub async fn generate_detached(&self, chat_id: &str, prompt: &str) -> Envelope<()> {
        self.proxy
            .emit(OLLAMA_GENERATE, (chat_id.to_string(), prompt.to_string()))
            .await
    }

    pub async fn models(&self) -> Envelope<Vec<String>> {
        self.proxy.invoke(OLLAMA_MODELS, ()).await
    }
}

// =============================================================================
// Listener tree
// =============================================================================

#[derive(Clone, Default)]
pub struct Listeners {
    registry: SubscriberRegistry,
}

impl Listeners {
    pub fn new(registry: SubscriberRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    pub fn stream(&self) -> StreamListeners<'_> {
        StreamListeners {
            registry: &self.registry,
        }
    }
}

pub struct StreamListeners<'a> {
    registry: &'a SubscriberRegistry,
}

impl StreamListeners<'_> {
    pub fn on_response<F>(&self, callback: F) -> Envelope<Disposer>
    where
        F: Fn(StreamChunk) + Send + Sync + 'static,
    {
        typed_listener(self.registry, STREAM_RESPONSE, callback)
    }

    pub fn on_database_change<F>(&self, callback: F) -> Envelope<Disposer>
    where
        F: Fn(DatabaseChange) + Send + Sync + 'static,
    {
        typed_listener(self.registry, DATABASE_CHANGE, callback)
    }
}

fn typed_listener<T, F>(registry: &SubscriberRegistry, channel: &'static str, callback: F) -> Envelope<Disposer>
where
    T: DeserializeOwned,
    F: Fn(T) + Send + Sync + 'static,
{
    registry.on(channel, move |payload| match serde_json::from_value::<T>(payload.clone()) {
        Ok(typed) => callback(typed),
        Err(e) => tracing::warn!(
            op = "api.listener.bad_payload",
            channel = %channel,
            error = %e,
            "Ignoring malformed event payload"
        ),
    })
}
