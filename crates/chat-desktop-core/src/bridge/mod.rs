//! Reflective RPC bridge
//!
//! The privileged side describes its capabilities once as a
//! [`CapabilityTree`]; the [`Dispatcher`] registers every leaf under the
//! `invoke-api:` and `on-api:` namespaces. The untrusted side receives only
//! the tree's [`TreeShape`] and builds a [`Proxy`] whose leaves forward calls
//! over a [`Transport`].

pub mod client;
pub mod dispatcher;
pub mod endpoint;
pub mod protocol;
pub mod proxy;
pub mod transport;
pub mod tree;

pub use client::Connection;
pub use dispatcher::{Caller, Dispatcher};
pub use endpoint::{Args, Endpoint, EMIT_NAMESPACE, INVOKE_NAMESPACE};
pub use protocol::{Frame, Request};
pub use proxy::{Proxy, ProxyLeaf, ProxyNode};
pub use transport::{LocalTransport, Transport};
pub use tree::{CapabilityTree, TreeShape};
