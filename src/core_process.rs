//! Chat Desktop Core process manager
//!
//! Spawns and talks to the chat-desktop-core child process over stdio
//! (newline-delimited JSON, see `chat_desktop_core::bridge`).
//!
//! # Lifecycle
//!
//! - The core is spawned on the first request (lazy init)
//! - stdin carries requests, stdout carries response and event frames
//! - stderr is inherited so core logs land next to host logs
//! - If the core has exited, the next request spawns a fresh one
//! - Every transport failure comes back as `TransportError`, which the proxy
//!   turns into a 503 envelope

use async_trait::async_trait;
use chat_desktop_core::bridge::{Connection, Transport};
use chat_desktop_core::events::SubscriberRegistry;
use chat_desktop_core::{Envelope, TransportError};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

pub const CORE_BINARY_NAME: &str = "chat-desktop-core";

const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

struct CoreProcess {
    child: Child,
    connection: Arc<Connection>,
}

impl CoreProcess {
    fn is_running(&mut self) -> bool {
        if !self.connection.is_alive() {
            return false;
        }
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// Owns the core child process and the connection to it
pub struct CoreProcessManager {
    binary: Option<PathBuf>,
    registry: SubscriberRegistry,
    timeout: Duration,
    inner: Mutex<Option<CoreProcess>>,
}

impl CoreProcessManager {
    /// `binary` overrides the search done by [`find_core_binary`].
    pub fn new(binary: Option<PathBuf>, registry: SubscriberRegistry, timeout: Duration) -> Self {
        Self {
            binary,
            registry,
            timeout,
            inner: Mutex::new(None),
        }
    }

    /// Live connection to the core, spawning it if needed.
    async fn connection(&self) -> Result<Arc<Connection>, TransportError> {
        let mut guard = self.inner.lock().await;

        if let Some(process) = guard.as_mut() {
            if process.is_running() {
                return Ok(process.connection.clone());
            }
            tracing::warn!(
                op = "core.process.died",
                "Chat Desktop Core process died, will restart"
            );
            *guard = None;
        }

        let process = self.spawn()?;
        let connection = process.connection.clone();
        *guard = Some(process);
        Ok(connection)
    }

    fn spawn(&self) -> Result<CoreProcess, TransportError> {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        let binary = find_core_binary(self.binary.as_deref(), exe_dir.as_deref())?;

        tracing::info!(
            op = "core.process.spawn",
            binary = %binary.display(),
            "Spawning Chat Desktop Core process"
        );

        let mut child = Command::new(&binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Spawn(format!("{}: {}", binary.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Spawn("Failed to capture core stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Spawn("Failed to capture core stdout".to_string()))?;

        tracing::info!(
            op = "core.process.spawned",
            pid = child.id(),
            "Chat Desktop Core process spawned"
        );

        let connection = Connection::new(stdout, stdin, self.registry.clone(), self.timeout);
        Ok(CoreProcess {
            child,
            connection: Arc::new(connection),
        })
    }

    /// Drop the current process after a broken write, so the next call respawns.
    async fn discard(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(mut process) = guard.take() {
            let _ = process.child.start_kill();
        }
    }

    pub async fn is_running(&self) -> bool {
        let mut guard = self.inner.lock().await;
        guard.as_mut().map(CoreProcess::is_running).unwrap_or(false)
    }

    /// Close the core's stdin and wait for it to drain and exit.
    pub async fn shutdown(&self) {
        let Some(process) = self.inner.lock().await.take() else {
            return;
        };
        let CoreProcess { mut child, connection } = process;
        drop(connection);

        match tokio::time::timeout(SHUTDOWN_WAIT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(op = "core.process.exited", status = %status, "Chat Desktop Core exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(op = "core.process.wait_failed", error = %e, "Failed to wait for core");
            }
            Err(_) => {
                tracing::warn!(op = "core.process.kill", "Core did not exit in time, killing");
                let _ = child.kill().await;
            }
        }
    }
}

#[async_trait]
impl Transport for CoreProcessManager {
    async fn invoke(&self, endpoint: &str, args: Vec<Value>) -> Result<Envelope<Value>, TransportError> {
        let connection = self.connection().await?;
        let result = connection.request(endpoint, args).await;
        if let Err(TransportError::Io(e)) = &result {
            tracing::error!(op = "core.stdin.error", error = %e, "Failed to write to core stdin");
            self.discard().await;
        }
        result
    }

    async fn send(&self, endpoint: &str, args: Vec<Value>) -> Result<(), TransportError> {
        let connection = self.connection().await?;
        let result = connection.notify(endpoint, args).await;
        if let Err(TransportError::Io(e)) = &result {
            tracing::error!(op = "core.stdin.error", error = %e, "Failed to write to core stdin");
            self.discard().await;
        }
        result
    }
}

fn binary_file_name() -> String {
    format!("{}{}", CORE_BINARY_NAME, std::env::consts::EXE_SUFFIX)
}

/// Find the core binary
///
/// Search order:
/// 1. Explicit path (CHAT_DESKTOP_CORE_BIN)
/// 2. Same directory as the host executable
/// 3. Workspace target directory (dev builds, debug then release)
pub fn find_core_binary(explicit: Option<&Path>, exe_dir: Option<&Path>) -> Result<PathBuf, TransportError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        tracing::warn!(
            op = "core.binary.env_not_found",
            path = %path.display(),
            "CHAT_DESKTOP_CORE_BIN set but binary not found"
        );
    }

    let name = binary_file_name();
    if let Some(dir) = exe_dir {
        let candidate = dir.join(&name);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let target = Path::new(env!("CARGO_MANIFEST_DIR")).join("target");
    for profile in ["debug", "release"] {
        let candidate = target.join(profile).join(&name);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(TransportError::Spawn(format!(
        "Chat Desktop Core binary not found. Build it first:\n  \
         cargo build -p {}\n  \
         Or set CHAT_DESKTOP_CORE_BIN.",
        CORE_BINARY_NAME
    )))
}
