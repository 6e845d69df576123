//! Webview shell
//!
//! Creates the window, manages [`HostState`] and forwards every event
//! channel from the subscriber registry to the page.

use crate::commands::{api_invoke, api_send};
use crate::config::{self, HostConfig};
use crate::state::HostState;
use chat_desktop_core::events::{DATABASE_CHANGE, STREAM_RESPONSE};
use tauri::{Emitter, Manager};

const FORWARDED: [&str; 2] = [STREAM_RESPONSE, DATABASE_CHANGE];

pub fn run(config: HostConfig) -> anyhow::Result<()> {
    tracing::info!(
        op = "desktop.startup",
        app = config::app_name(),
        identifier = config::app_identifier(),
        "Starting webview shell"
    );

    let app = tauri::Builder::default()
        .setup(move |app| {
            let state = tauri::async_runtime::block_on(async { HostState::connect(&config) })?;

            for channel in FORWARDED {
                let handle = app.handle().clone();
                // lives as long as the registry; cleared on exit
                let _ = state.listeners.registry().subscribe(channel, move |payload| {
                    if let Err(e) = handle.emit(channel, payload.clone()) {
                        tracing::warn!(op = "desktop.emit.failed", channel, error = %e, "Failed to forward event");
                    }
                });
            }

            app.manage(state);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![api_invoke, api_send])
        .build(tauri::generate_context!())?;

    app.run(|app, event| {
        if let tauri::RunEvent::Exit = event {
            tracing::debug!(op = "desktop.shutdown", "Shutting down");
            if let Some(state) = app.try_state::<HostState>() {
                tauri::async_runtime::block_on(state.shutdown());
            }
        }
    });
    Ok(())
}
