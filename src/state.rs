//! Host state
//!
//! What the presentation layer holds: the typed API facade, the listener
//! tree, and whichever transport backs them.

use crate::config::HostConfig;
use crate::core_process::CoreProcessManager;
use chat_desktop_core::api::{Api, Listeners};
use chat_desktop_core::bridge::{Dispatcher, LocalTransport, Transport};
use chat_desktop_core::config::CoreConfig;
use chat_desktop_core::handlers::capabilities;
use chat_desktop_core::state::CoreState;
use chat_desktop_core::BridgeError;
use std::sync::Arc;

pub struct HostState {
    pub api: Api,
    pub listeners: Listeners,
    /// Present when the core runs as a child process
    core: Option<Arc<CoreProcessManager>>,
}

impl HostState {
    /// Wire the API to a transport chosen by `config`.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn connect(config: &HostConfig) -> Result<Self, BridgeError> {
        if config.in_process {
            return Self::in_process(&CoreConfig::from_env());
        }

        let listeners = Listeners::default();
        let manager = Arc::new(CoreProcessManager::new(
            config.core_binary.clone(),
            listeners.registry().clone(),
            config.request_timeout,
        ));
        tracing::info!(op = "host.transport", mode = "process", "Using core child process");

        Ok(Self {
            api: Api::connect(manager.clone()),
            listeners,
            core: Some(manager),
        })
    }

    /// Serve the capability tree from this process.
    pub fn in_process(core_config: &CoreConfig) -> Result<Self, BridgeError> {
        let state = Arc::new(CoreState::from_config(core_config));
        Self::with_core_state(state)
    }

    pub fn with_core_state(state: Arc<CoreState>) -> Result<Self, BridgeError> {
        let tree = capabilities(state)?;
        let dispatcher = Arc::new(Dispatcher::from_tree(&tree)?);

        let listeners = Listeners::default();
        let transport: Arc<dyn Transport> =
            Arc::new(LocalTransport::connect(dispatcher, listeners.registry().clone()));
        tracing::info!(op = "host.transport", mode = "in_process", "Using in-process core");

        Ok(Self {
            api: Api::connect(transport),
            listeners,
            core: None,
        })
    }

    pub async fn shutdown(&self) {
        self.listeners.registry().clear();
        if let Some(core) = &self.core {
            core.shutdown().await;
        }
    }
}
