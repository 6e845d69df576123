//! Dispatcher (privileged side)
//!
//! Flattens a [`CapabilityTree`] into a routing table keyed by wire endpoint
//! name. Every leaf is reachable under two names:
//!
//! - `invoke-api:<fqn>`: request/response, the caller awaits an envelope
//! - `on-api:<fqn>`: fire-and-forget, the result is logged and discarded
//!
//! Handler failures never escape: errors are already envelopes, and a panic
//! inside a handler is caught here and turned into a 500.

use super::endpoint::{emit_name, invoke_name, EMIT_NAMESPACE, INVOKE_NAMESPACE};
use super::protocol::{Frame, Request};
use super::tree::{CapabilityTree, Handler};
use crate::envelope::{Envelope, INTERNAL, NOT_FOUND};
use crate::error::BridgeError;
use crate::events::Publisher;
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Who is calling, and how to push events back to them
///
/// Injected by the dispatcher as the first handler argument. Never part of a
/// proxy signature.
#[derive(Debug, Clone)]
pub struct Caller {
    pub client_id: String,
    pub events: Publisher,
}

impl Caller {
    pub fn new(client_id: impl Into<String>, events: Publisher) -> Self {
        Self {
            client_id: client_id.into(),
            events,
        }
    }

    /// Push an event to this caller's connection.
    pub fn push<P: Serialize + ?Sized>(&self, channel: &str, payload: &P) {
        self.events.push(channel, payload);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Invoke,
    Emit,
}

struct Route {
    fqn: String,
    mode: Mode,
    handler: Arc<dyn Handler>,
}

#[derive(Default)]
pub struct Dispatcher {
    routes: HashMap<String, Route>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dispatcher with every leaf of `tree` registered.
    pub fn from_tree(tree: &CapabilityTree) -> Result<Self, BridgeError> {
        let mut dispatcher = Self::new();
        dispatcher.register_all(tree)?;
        Ok(dispatcher)
    }

    /// Register every leaf under both namespaces.
    ///
    /// Fails on the first endpoint name that is already taken, leaving the
    /// routes registered before it in place.
    pub fn register_all(&mut self, tree: &CapabilityTree) -> Result<usize, BridgeError> {
        let mut count = 0;
        for (fqn, handler) in tree.leaves() {
            self.register(&invoke_name(&fqn), &fqn, Mode::Invoke, handler.clone())?;
            self.register(&emit_name(&fqn), &fqn, Mode::Emit, handler)?;
            count += 1;
        }

        tracing::info!(
            op = "dispatcher.register_all",
            leaves = count,
            routes = self.routes.len(),
            "Capability tree registered"
        );
        Ok(count)
    }

    fn register(
        &mut self,
        endpoint: &str,
        fqn: &str,
        mode: Mode,
        handler: Arc<dyn Handler>,
    ) -> Result<(), BridgeError> {
        if self.routes.contains_key(endpoint) {
            return Err(BridgeError::DuplicateEndpoint(endpoint.to_string()));
        }
        self.routes.insert(
            endpoint.to_string(),
            Route {
                fqn: fqn.to_string(),
                mode,
                handler,
            },
        );
        Ok(())
    }

    /// Sorted list of registered wire endpoint names
    pub fn endpoints(&self) -> Vec<String> {
        let mut names: Vec<String> = self.routes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Invoke an endpoint and wait for its envelope.
    ///
    /// Accepts either namespace; the emit form simply runs to completion too.
    pub async fn invoke(&self, caller: Caller, endpoint: &str, args: Vec<Value>) -> Envelope<Value> {
        let Some(route) = self.routes.get(endpoint) else {
            tracing::warn!(
                op = "dispatcher.unknown_endpoint",
                endpoint = %endpoint,
                client = %caller.client_id,
                "No handler registered"
            );
            return Envelope::status_only(NOT_FOUND, format!("No handler for '{}'", endpoint));
        };

        tracing::debug!(
            op = "dispatcher.invoke",
            fqn = %route.fqn,
            client = %caller.client_id,
            args = args.len(),
            "Invoking capability"
        );
        run_guarded(route.fqn.clone(), route.handler.clone(), caller, args).await
    }

    /// Run an endpoint whose result nobody waits for. Returns false if unknown.
    ///
    /// Completes when the handler does, so the server's shutdown drain covers
    /// fire-and-forget work the same way it covers invokes.
    pub async fn emit(&self, caller: Caller, endpoint: &str, args: Vec<Value>) -> bool {
        let Some(route) = self.routes.get(endpoint) else {
            tracing::warn!(
                op = "dispatcher.unknown_endpoint",
                endpoint = %endpoint,
                client = %caller.client_id,
                "No handler registered for emit"
            );
            return false;
        };

        let env = run_guarded(route.fqn.clone(), route.handler.clone(), caller, args).await;
        if !env.is_ok() {
            tracing::warn!(
                op = "dispatcher.emit_failed",
                fqn = %route.fqn,
                code = env.code(),
                "Fire-and-forget call failed"
            );
        }
        true
    }

    /// Serve one wire request.
    ///
    /// Returns the response frame for `invoke-api:` requests and `None` for
    /// `on-api:` ones.
    pub async fn handle(&self, caller: Caller, request: Request) -> Option<Frame> {
        let Request { id, endpoint, args } = request;

        let mode = self.routes.get(&endpoint).map(|r| r.mode).or_else(|| {
            if endpoint.starts_with(EMIT_NAMESPACE) {
                Some(Mode::Emit)
            } else {
                None
            }
        });

        match mode {
            Some(Mode::Emit) => {
                self.emit(caller, &endpoint, args).await;
                None
            }
            Some(Mode::Invoke) | None => {
                if !endpoint.starts_with(INVOKE_NAMESPACE) {
                    tracing::debug!(
                        op = "dispatcher.bad_namespace",
                        endpoint = %endpoint,
                        "Endpoint carries no known namespace"
                    );
                }
                let envelope = self.invoke(caller, &endpoint, args).await;
                Some(Frame::Response {
                    id: id.unwrap_or_default(),
                    envelope,
                })
            }
        }
    }
}

async fn run_guarded(
    fqn: String,
    handler: Arc<dyn Handler>,
    caller: Caller,
    args: Vec<Value>,
) -> Envelope<Value> {
    let outcome = AssertUnwindSafe(async move { handler.call(caller, args).await })
        .catch_unwind()
        .await;

    match outcome {
        Ok(envelope) => envelope,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".to_string());
            tracing::error!(
                op = "dispatcher.handler_panic",
                fqn = %fqn,
                detail = %detail,
                "Capability panicked"
            );
            Envelope::failure(INTERNAL, "API invocation failed", &detail)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::endpoint::Endpoint;
    use crate::envelope::Empty;
    use crate::events;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ECHO: Endpoint<(String,), String> = Endpoint::new("util.echo");
    const BOOM: Endpoint<(), Empty> = Endpoint::new("util.boom");
    const BUMP: Endpoint<(), usize> = Endpoint::new("counter.bump");

    fn caller() -> (Caller, tokio::sync::mpsc::UnboundedReceiver<Frame>) {
        let (publisher, rx) = events::channel();
        (Caller::new("test", publisher), rx)
    }

    fn dispatcher(counter: Arc<AtomicUsize>) -> Dispatcher {
        let mut tree = CapabilityTree::new();
        tree.insert(ECHO, |_, (s,)| async move { Envelope::success("echo", s) })
            .unwrap();
        tree.insert(BOOM, |_, ()| async move {
            if true {
                panic!("leaf blew up");
            }
            Envelope::success("unreachable", Empty {})
        })
        .unwrap();
        tree.insert(BUMP, move |_, ()| {
            let counter = counter.clone();
            async move { Envelope::success("bumped", counter.fetch_add(1, Ordering::SeqCst) + 1) }
        })
        .unwrap();
        Dispatcher::from_tree(&tree).unwrap()
    }

    #[test]
    fn test_every_leaf_gets_both_namespaces() {
        let d = dispatcher(Arc::default());
        assert_eq!(
            d.endpoints(),
            vec![
                "invoke-api:counter.bump",
                "invoke-api:util.boom",
                "invoke-api:util.echo",
                "on-api:counter.bump",
                "on-api:util.boom",
                "on-api:util.echo",
            ]
        );
    }

    #[test]
    fn test_second_registration_fails_fast() {
        let mut tree = CapabilityTree::new();
        tree.insert(ECHO, |_, (s,)| async move { Envelope::success("echo", s) })
            .unwrap();
        let mut d = Dispatcher::new();
        d.register_all(&tree).unwrap();

        let err = d.register_all(&tree).unwrap_err();
        assert!(matches!(err, BridgeError::DuplicateEndpoint(ref e) if e == "invoke-api:util.echo"));
    }

    #[tokio::test]
    async fn test_invoke_returns_leaf_envelope() {
        let d = dispatcher(Arc::default());
        let (c, _rx) = caller();
        let env = d.invoke(c, "invoke-api:util.echo", vec![json!("hi")]).await;
        assert_eq!(env.code(), 200);
        assert_eq!(env.data, Some(json!("hi")));
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_404() {
        let d = dispatcher(Arc::default());
        let (c, _rx) = caller();
        let env = d.invoke(c, "invoke-api:util.nope", vec![]).await;
        assert_eq!(env.code(), 404);
        assert!(env.data.is_none());
    }

    #[tokio::test]
    async fn test_bad_args_are_400() {
        let d = dispatcher(Arc::default());
        let (c, _rx) = caller();
        let env = d.invoke(c, "invoke-api:util.echo", vec![json!(1), json!(2)]).await;
        assert_eq!(env.code(), 400);
    }

    #[tokio::test]
    async fn test_panicking_leaf_becomes_500_and_dispatcher_survives() {
        let d = dispatcher(Arc::default());
        let (c, _rx) = caller();
        let env = d.invoke(c.clone(), "invoke-api:util.boom", vec![]).await;
        assert_eq!(env.code(), 500);
        assert_eq!(env.message(), "API invocation failed");
        assert_eq!(env.error_message().as_deref(), Some("leaf blew up"));

        let env = d.invoke(c, "invoke-api:util.echo", vec![json!("still here")]).await;
        assert_eq!(env.code(), 200);
    }

    #[tokio::test]
    async fn test_handle_emits_without_response() {
        let counter = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(counter.clone());
        let (c, _rx) = caller();

        let request = Request {
            id: None,
            endpoint: "on-api:counter.bump".to_string(),
            args: vec![],
        };
        assert!(d.handle(c, request).await.is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handle_correlates_response_id() {
        let d = dispatcher(Arc::default());
        let (c, _rx) = caller();
        let request = Request {
            id: Some("req-1".to_string()),
            endpoint: "invoke-api:counter.bump".to_string(),
            args: vec![],
        };
        match d.handle(c, request).await {
            Some(Frame::Response { id, envelope }) => {
                assert_eq!(id, "req-1");
                assert_eq!(envelope.data, Some(json!(1)));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
