//! Chat Desktop - Entry Point
//!
//! Untrusted host. Talks to the privileged chat-desktop-core process through
//! the proxy tree and never touches the database or the inference service
//! itself.
//!
//! # Startup Order
//!
//! 1. Load `.env.local` and initialize tracing
//! 2. Read host configuration
//! 3. Run the presentation layer:
//!    - `desktop` feature: webview shell, core spawned on first command
//!    - otherwise: headless console on stdin/stdout
//! 4. On exit, close the core's stdin and wait for it to drain

#![cfg_attr(all(feature = "desktop", not(debug_assertions)), windows_subsystem = "windows")]

#[cfg(feature = "desktop")]
mod commands;
mod config;
mod core_process;
#[cfg(feature = "desktop")]
mod desktop;
#[cfg(not(feature = "desktop"))]
mod headless;
mod state;

use config::HostConfig;

fn main() -> anyhow::Result<()> {
    if dotenvy::from_filename(".env.local").is_err() {
        let _ = dotenvy::from_filename("../.env.local");
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chat_desktop=info".parse()?)
                .add_directive("chat_desktop_core=warn".parse()?),
        )
        .with_target(true)
        .init();

    let config = HostConfig::from_env();
    tracing::info!(
        op = "host.startup",
        app = config::app_slug(),
        in_process = config.in_process,
        timeout_secs = config.request_timeout.as_secs(),
        "Chat Desktop starting"
    );

    run(config)
}

#[cfg(feature = "desktop")]
fn run(config: HostConfig) -> anyhow::Result<()> {
    desktop::run(config)
}

#[cfg(not(feature = "desktop"))]
fn run(config: HostConfig) -> anyhow::Result<()> {
    use headless::{Console, SharedOutput};
    use state::HostState;
    use std::sync::{Arc, Mutex};
    use tokio::io::BufReader;

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(async move {
        let state = HostState::connect(&config)?;
        let out: SharedOutput = Arc::new(Mutex::new(Box::new(std::io::stdout())));
        let mut console = Console::new(state, out);

        let result = console.run(BufReader::new(tokio::io::stdin())).await;
        console.close().await;
        result?;

        tracing::info!(op = "host.shutdown", "Chat Desktop exiting");
        Ok::<(), anyhow::Error>(())
    })
}
