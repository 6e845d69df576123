//! Shared state of the privileged process

use crate::config::{CoreConfig, SourceKind};
use crate::inference::{OllamaSource, ResponseSource, StaticSource};
use crate::store::Store;
use std::sync::Arc;

pub struct CoreState {
    pub store: Store,
    pub source: Arc<dyn ResponseSource>,
}

impl CoreState {
    pub fn new(store: Store, source: Arc<dyn ResponseSource>) -> Self {
        Self { store, source }
    }

    /// Open the database and pick the response source.
    pub fn from_config(config: &CoreConfig) -> Self {
        let store = Store::open(&config.database_path(), &config.default_model);
        let source: Arc<dyn ResponseSource> = match config.source {
            SourceKind::Static => Arc::new(StaticSource::new()),
            SourceKind::Ollama => Arc::new(OllamaSource::new(config.ollama_url.clone())),
        };

        tracing::info!(
            op = "core.state.init",
            source = source.name(),
            default_model = %config.default_model,
            db_ok = store.open_error().is_none(),
            "Core state ready"
        );
        Self::new(store, source)
    }
}
