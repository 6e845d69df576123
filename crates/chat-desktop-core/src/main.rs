//! Chat Desktop Core
//!
//! Privileged process that serves the capability tree over stdio.
//!
//! # Protocol
//!
//! Request (one JSON object per line on stdin):
//!   { "id": "<uuid>"|null, "endpoint": "invoke-api:<fqn>"|"on-api:<fqn>", "args": [...] }
//!
//! Frames (one JSON object per line on stdout):
//!   { "type": "response", "id": "<uuid>", "envelope": {...} }
//!   { "type": "event", "channel": "<name>", "payload": ... }
//!
//! # Capabilities
//!
//! - chats.list
//! - chats.create
//! - chats.delete
//! - messages.getHistory
//! - messages.append
//! - ollama.generate
//! - ollama.models

use anyhow::Context;
use chat_desktop_core::bridge::Dispatcher;
use chat_desktop_core::config::CoreConfig;
use chat_desktop_core::handlers::capabilities;
use chat_desktop_core::server;
use chat_desktop_core::state::CoreState;
use std::io;
use std::sync::Arc;
use tokio::io::BufReader;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    if dotenvy::from_filename(".env.local").is_err() {
        let _ = dotenvy::from_filename("../.env.local");
    }

    // Initialize tracing to stderr (stdout is reserved for frames)
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chat_desktop_core=info".parse()?),
        )
        .with_target(true)
        .init();

    tracing::info!(op = "core.startup", "Chat Desktop Core starting (stdio bridge)");

    let config = CoreConfig::from_env();
    tracing::info!(
        op = "core.config",
        data_dir = %config.data_dir.display(),
        source = ?config.source,
        development = config.development,
        "Configuration loaded"
    );

    let state = Arc::new(CoreState::from_config(&config));
    let tree = capabilities(state).context("Failed to build capability tree")?;
    let dispatcher = Arc::new(Dispatcher::from_tree(&tree).context("Failed to register capabilities")?);

    server::serve(
        dispatcher,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        "host",
    )
    .await
    .context("stdio server failed")?;

    tracing::info!(op = "core.shutdown", "Chat Desktop Core exiting");
    Ok(())
}
