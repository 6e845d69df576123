//! Capability tree
//!
//! Nested mapping of names to async handlers. Leaves are inserted through
//! typed [`Endpoint`]s, so a leaf's position in the tree is exactly the dotted
//! path of its FQN. Keys are unique per level; a key is either a leaf or a
//! branch, never both.
//!
//! [`TreeShape`] is the handler-free outline of a tree (names and arities).
//! It is what the untrusted side needs to build its proxy.

use super::dispatcher::Caller;
use super::endpoint::{Args, Endpoint};
use crate::envelope::{Envelope, BAD_REQUEST};
use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Envelope<Value>> + Send>>;

/// Type-erased capability leaf
pub trait Handler: Send + Sync {
    fn arity(&self) -> usize;

    fn call(&self, caller: Caller, args: Vec<Value>) -> HandlerFuture;
}

struct TypedHandler<A, R, F> {
    f: F,
    _signature: PhantomData<fn(A) -> R>,
}

impl<A, R, F, Fut> Handler for TypedHandler<A, R, F>
where
    A: Args,
    R: Serialize + Send + 'static,
    F: Fn(Caller, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Envelope<R>> + Send + 'static,
{
    fn arity(&self) -> usize {
        A::ARITY
    }

    fn call(&self, caller: Caller, args: Vec<Value>) -> HandlerFuture {
        match A::from_values(args) {
            Ok(args) => {
                let fut = (self.f)(caller, args);
                Box::pin(async move { fut.await.into_value() })
            }
            Err(e) => {
                let env = Envelope::failure(BAD_REQUEST, "Invalid arguments", &e);
                Box::pin(async move { env })
            }
        }
    }
}

pub enum Node {
    Leaf(Arc<dyn Handler>),
    Branch(CapabilityTree),
}

#[derive(Default)]
pub struct CapabilityTree {
    children: BTreeMap<String, Node>,
}

impl CapabilityTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a leaf at the endpoint's dotted path, creating branches on the way.
    pub fn insert<A, R, F, Fut>(&mut self, endpoint: Endpoint<A, R>, f: F) -> Result<(), BridgeError>
    where
        A: Args,
        R: Serialize + Send + 'static,
        F: Fn(Caller, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Envelope<R>> + Send + 'static,
    {
        let handler: Arc<dyn Handler> = Arc::new(TypedHandler {
            f,
            _signature: PhantomData,
        });
        self.insert_handler(endpoint.fqn(), handler)
    }

    pub fn insert_handler(&mut self, fqn: &str, handler: Arc<dyn Handler>) -> Result<(), BridgeError> {
        let keys: Vec<&str> = fqn.split('.').collect();
        if keys.iter().any(|k| k.is_empty()) {
            return Err(BridgeError::EmptyKey(fqn.to_string()));
        }

        let Some((leaf_key, branch_keys)) = keys.split_last() else {
            return Err(BridgeError::EmptyKey(fqn.to_string()));
        };

        let mut node = self;
        for (depth, key) in branch_keys.iter().enumerate() {
            let entry = node
                .children
                .entry(key.to_string())
                .or_insert_with(|| Node::Branch(CapabilityTree::new()));
            node = match entry {
                Node::Branch(tree) => tree,
                Node::Leaf(_) => {
                    return Err(BridgeError::DuplicateKey(keys[..=depth].join(".")));
                }
            };
        }

        if node.children.contains_key(*leaf_key) {
            return Err(BridgeError::DuplicateKey(fqn.to_string()));
        }
        node.children.insert(leaf_key.to_string(), Node::Leaf(handler));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.children.get(key)
    }

    /// Depth-first list of `(fqn, handler)` for every leaf.
    ///
    /// Keys are visited in sorted order, so the result is the same for two
    /// trees with the same contents regardless of insertion order.
    pub fn leaves(&self) -> Vec<(String, Arc<dyn Handler>)> {
        let mut out = Vec::new();
        self.walk("", &mut out);
        out
    }

    fn walk(&self, parent: &str, out: &mut Vec<(String, Arc<dyn Handler>)>) {
        for (key, node) in &self.children {
            let full_key = if parent.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", parent, key)
            };
            match node {
                Node::Leaf(handler) => out.push((full_key, handler.clone())),
                Node::Branch(tree) => tree.walk(&full_key, out),
            }
        }
    }

    pub fn fqns(&self) -> BTreeSet<String> {
        self.leaves().into_iter().map(|(fqn, _)| fqn).collect()
    }

    pub fn shape(&self) -> TreeShape {
        let children = self
            .children
            .iter()
            .map(|(key, node)| {
                let shape = match node {
                    Node::Leaf(handler) => ShapeNode::Leaf {
                        arity: handler.arity(),
                    },
                    Node::Branch(tree) => ShapeNode::Branch(tree.shape()),
                };
                (key.clone(), shape)
            })
            .collect();
        TreeShape { children }
    }
}

/// Handler-free outline of a capability tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreeShape {
    children: BTreeMap<String, ShapeNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeNode {
    Leaf { arity: usize },
    Branch(TreeShape),
}

impl TreeShape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an endpoint's leaf (builder style)
    pub fn with<A: Args, R>(mut self, endpoint: Endpoint<A, R>) -> Self {
        self.add(endpoint.fqn(), A::ARITY);
        self
    }

    /// Add a leaf by FQN. Replaces whatever was at that path.
    pub fn add(&mut self, fqn: &str, arity: usize) {
        let keys: Vec<&str> = fqn.split('.').collect();
        let Some((leaf_key, branch_keys)) = keys.split_last() else {
            return;
        };

        let mut node = self;
        for key in branch_keys {
            let entry = node
                .children
                .entry(key.to_string())
                .or_insert_with(|| ShapeNode::Branch(TreeShape::new()));
            if let ShapeNode::Leaf { .. } = entry {
                *entry = ShapeNode::Branch(TreeShape::new());
            }
            node = match entry {
                ShapeNode::Branch(tree) => tree,
                ShapeNode::Leaf { .. } => return,
            };
        }
        node.children
            .insert(leaf_key.to_string(), ShapeNode::Leaf { arity });
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, &ShapeNode)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn fqns(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        collect_fqns(self, "", &mut out);
        out
    }
}

fn collect_fqns(shape: &TreeShape, parent: &str, out: &mut BTreeSet<String>) {
    for (key, node) in &shape.children {
        let full_key = if parent.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", parent, key)
        };
        match node {
            ShapeNode::Leaf { .. } => {
                out.insert(full_key);
            }
            ShapeNode::Branch(tree) => collect_fqns(tree, &full_key, out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Empty;

    const A_ONE: Endpoint<(), Empty> = Endpoint::new("a.one");
    const A_B_TWO: Endpoint<(String,), String> = Endpoint::new("a.b.two");
    const TOP: Endpoint<(u32, u32), u32> = Endpoint::new("top");

    fn sample(order_reversed: bool) -> CapabilityTree {
        let mut tree = CapabilityTree::new();
        if order_reversed {
            tree.insert(TOP, |_, (a, b)| async move { Envelope::success("sum", a + b) }).unwrap();
            tree.insert(A_B_TWO, |_, (s,)| async move { Envelope::success("echo", s) }).unwrap();
            tree.insert(A_ONE, |_, ()| async { Envelope::success("one", Empty {}) }).unwrap();
        } else {
            tree.insert(A_ONE, |_, ()| async { Envelope::success("one", Empty {}) }).unwrap();
            tree.insert(A_B_TWO, |_, (s,)| async move { Envelope::success("echo", s) }).unwrap();
            tree.insert(TOP, |_, (a, b)| async move { Envelope::success("sum", a + b) }).unwrap();
        }
        tree
    }

    #[test]
    fn test_fqns_are_dotted_paths() {
        let fqns: Vec<String> = sample(false).fqns().into_iter().collect();
        assert_eq!(fqns, vec!["a.b.two", "a.one", "top"]);
    }

    #[test]
    fn test_walk_is_deterministic_and_order_independent() {
        let first: Vec<String> = sample(false).leaves().into_iter().map(|(f, _)| f).collect();
        let again: Vec<String> = sample(false).leaves().into_iter().map(|(f, _)| f).collect();
        let reversed: Vec<String> = sample(true).leaves().into_iter().map(|(f, _)| f).collect();
        assert_eq!(first, again);
        assert_eq!(first, reversed);
    }

    #[test]
    fn test_duplicate_leaf_rejected() {
        let mut tree = sample(false);
        let err = tree
            .insert(A_ONE, |_, ()| async { Envelope::success("again", Empty {}) })
            .unwrap_err();
        assert!(matches!(err, BridgeError::DuplicateKey(ref k) if k == "a.one"));
    }

    #[test]
    fn test_leaf_cannot_become_branch() {
        let mut tree = sample(false);
        const UNDER_TOP: Endpoint<(), Empty> = Endpoint::new("top.child");
        let err = tree
            .insert(UNDER_TOP, |_, ()| async { Envelope::success("x", Empty {}) })
            .unwrap_err();
        assert!(matches!(err, BridgeError::DuplicateKey(ref k) if k == "top"));
    }

    #[test]
    fn test_empty_segment_rejected() {
        let mut tree = CapabilityTree::new();
        const BAD: Endpoint<(), Empty> = Endpoint::new("a..b");
        let err = tree
            .insert(BAD, |_, ()| async { Envelope::success("x", Empty {}) })
            .unwrap_err();
        assert!(matches!(err, BridgeError::EmptyKey(_)));
    }

    #[test]
    fn test_shape_mirrors_tree() {
        let tree = sample(false);
        let shape = tree.shape();
        assert_eq!(shape.fqns(), tree.fqns());

        let expected = TreeShape::new().with(A_ONE).with(A_B_TWO).with(TOP);
        assert_eq!(shape, expected);
    }

    #[test]
    fn test_shape_serializes_nested() {
        let shape = TreeShape::new().with(A_B_TWO);
        let wire = serde_json::to_value(&shape).unwrap();
        assert_eq!(wire, serde_json::json!({"a": {"branch": {"b": {"branch": {"two": {"leaf": {"arity": 1}}}}}}}));
    }
}
