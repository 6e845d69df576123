//! Proxy tree (untrusted side)
//!
//! Mirror of the capability tree built from its [`TreeShape`]. Each leaf
//! holds only its FQN, arity and the transport; calling it serializes the
//! arguments, sends them to `invoke-api:<fqn>` and hands back the envelope.
//! Nothing privileged is reachable through a proxy except by invocation.

use super::endpoint::{emit_name, invoke_name, Args, Endpoint};
use super::transport::Transport;
use super::tree::{ShapeNode, TreeShape};
use crate::envelope::{Envelope, BAD_REQUEST, NOT_FOUND, TRANSPORT};
use crate::error::{BridgeError, TransportError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct ProxyLeaf {
    fqn: String,
    arity: usize,
    transport: Arc<dyn Transport>,
}

impl ProxyLeaf {
    pub fn fqn(&self) -> &str {
        &self.fqn
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Invoke with already-serialized arguments.
    pub async fn call(&self, args: Vec<Value>) -> Envelope<Value> {
        if args.len() != self.arity {
            let err = BridgeError::Arity {
                expected: self.arity,
                got: args.len(),
            };
            return Envelope::failure(BAD_REQUEST, format!("Invalid arguments for {}", self.fqn), &err);
        }

        match self.transport.invoke(&invoke_name(&self.fqn), args).await {
            Ok(envelope) => envelope,
            Err(e) => transport_failure(&self.fqn, &e),
        }
    }

    /// Fire-and-forget; only transport failures are reported.
    pub async fn emit(&self, args: Vec<Value>) -> Result<(), TransportError> {
        self.transport.send(&emit_name(&self.fqn), args).await
    }
}

pub enum ProxyEntry {
    Leaf(ProxyLeaf),
    Branch(ProxyNode),
}

#[derive(Default)]
pub struct ProxyNode {
    children: BTreeMap<String, ProxyEntry>,
}

impl ProxyNode {
    fn build(shape: &TreeShape, parent: &str, transport: &Arc<dyn Transport>) -> Self {
        let children = shape
            .children()
            .map(|(key, node)| {
                let fqn = if parent.is_empty() {
                    key.to_string()
                } else {
                    format!("{}.{}", parent, key)
                };
                let entry = match node {
                    ShapeNode::Leaf { arity } => ProxyEntry::Leaf(ProxyLeaf {
                        fqn,
                        arity: *arity,
                        transport: transport.clone(),
                    }),
                    ShapeNode::Branch(sub) => ProxyEntry::Branch(ProxyNode::build(sub, &fqn, transport)),
                };
                (key.to_string(), entry)
            })
            .collect();
        Self { children }
    }

    pub fn child(&self, key: &str) -> Option<&ProxyEntry> {
        self.children.get(key)
    }

    pub fn branch(&self, key: &str) -> Option<&ProxyNode> {
        match self.children.get(key) {
            Some(ProxyEntry::Branch(node)) => Some(node),
            _ => None,
        }
    }

    pub fn leaf(&self, key: &str) -> Option<&ProxyLeaf> {
        match self.children.get(key) {
            Some(ProxyEntry::Leaf(leaf)) => Some(leaf),
            _ => None,
        }
    }

    /// Follow a dotted path to a leaf.
    pub fn resolve(&self, fqn: &str) -> Option<&ProxyLeaf> {
        let (branches, last) = match fqn.rsplit_once('.') {
            Some((branches, last)) => (Some(branches), last),
            None => (None, fqn),
        };
        let mut node = self;
        if let Some(branches) = branches {
            for key in branches.split('.') {
                node = node.branch(key)?;
            }
        }
        node.leaf(last)
    }

    /// Every leaf below this node, depth first
    pub fn leaves(&self) -> Vec<&ProxyLeaf> {
        let mut out = Vec::new();
        for entry in self.children.values() {
            match entry {
                ProxyEntry::Leaf(leaf) => out.push(leaf),
                ProxyEntry::Branch(node) => out.extend(node.leaves()),
            }
        }
        out
    }
}

pub struct Proxy {
    root: ProxyNode,
    transport: Arc<dyn Transport>,
}

impl Proxy {
    pub fn build(shape: &TreeShape, transport: Arc<dyn Transport>) -> Self {
        let root = ProxyNode::build(shape, "", &transport);
        tracing::debug!(
            op = "proxy.build",
            leaves = root.leaves().len(),
            "Proxy tree built"
        );
        Self { root, transport }
    }

    pub fn root(&self) -> &ProxyNode {
        &self.root
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Typed invocation through a shared endpoint descriptor.
    pub async fn invoke<A, R>(&self, endpoint: Endpoint<A, R>, args: A) -> Envelope<R>
    where
        A: Args,
        R: DeserializeOwned,
    {
        let Some(leaf) = self.root.resolve(endpoint.fqn()) else {
            return Envelope::status_only(NOT_FOUND, format!("No proxy for '{}'", endpoint.fqn()));
        };
        let values = match args.into_values() {
            Ok(v) => v,
            Err(e) => return Envelope::failure(BAD_REQUEST, "Failed to serialize arguments", &e),
        };
        leaf.call(values).await.decode()
    }

    /// Typed fire-and-forget through a shared endpoint descriptor.
    pub async fn emit<A, R>(&self, endpoint: Endpoint<A, R>, args: A) -> Envelope<()>
    where
        A: Args,
    {
        let Some(leaf) = self.root.resolve(endpoint.fqn()) else {
            return Envelope::status_only(NOT_FOUND, format!("No proxy for '{}'", endpoint.fqn()));
        };
        let values = match args.into_values() {
            Ok(v) => v,
            Err(e) => return Envelope::failure(BAD_REQUEST, "Failed to serialize arguments", &e),
        };
        match leaf.emit(values).await {
            Ok(()) => Envelope::success(format!("{} sent", endpoint.fqn()), ()),
            Err(e) => transport_failure(endpoint.fqn(), &e).cast(),
        }
    }
}

fn transport_failure(fqn: &str, error: &TransportError) -> Envelope<Value> {
    tracing::warn!(op = "proxy.transport_error", fqn = %fqn, error = %error, "Transport failed");
    Envelope::failure(TRANSPORT, format!("Core unreachable for {}", fqn), error)
}
