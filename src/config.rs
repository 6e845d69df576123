//! Host configuration
//!
//! Identity values are baked at build time from app.config.json (see
//! build.rs). Runtime knobs come from `CHAT_DESKTOP_*` environment variables,
//! optionally loaded from `.env.local`.

use std::path::PathBuf;
use std::time::Duration;

macro_rules! baked_config {
    ($name:ident, $env:literal) => {
        pub fn $name() -> &'static str {
            option_env!($env).expect(concat!(
                $env,
                " not baked at build time. Check build.rs and app.config.json"
            ))
        }
    };
}

// App display name (e.g., "Chat Desktop")
baked_config!(app_name, "CHAT_DESKTOP_APP_NAME");

// App slug for machine use (e.g., "chat-desktop")
baked_config!(app_slug, "CHAT_DESKTOP_APP_SLUG");

// App identifier for OS (e.g., "dev.chatdesktop.app")
#[cfg(feature = "desktop")]
baked_config!(app_identifier, "CHAT_DESKTOP_APP_IDENTIFIER");

pub const CORE_BIN_ENV: &str = "CHAT_DESKTOP_CORE_BIN";
pub const REQUEST_TIMEOUT_ENV: &str = "CHAT_DESKTOP_REQUEST_TIMEOUT_SECS";
pub const IN_PROCESS_ENV: &str = "CHAT_DESKTOP_IN_PROCESS";

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Runtime configuration of the untrusted host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Explicit path to the core binary; searched for when unset
    pub core_binary: Option<PathBuf>,
    /// Longest silence from the core while a request is outstanding
    pub request_timeout: Duration,
    /// Serve the capability tree in this process instead of spawning the core
    pub in_process: bool,
}

impl HostConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let core_binary = lookup(CORE_BIN_ENV)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let request_timeout = match lookup(REQUEST_TIMEOUT_ENV) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    tracing::warn!(
                        op = "host.config.invalid_timeout",
                        value = %raw,
                        "Ignoring invalid request timeout"
                    );
                    Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
                }
            },
            None => Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        };

        let in_process = lookup(IN_PROCESS_ENV)
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            core_binary,
            request_timeout,
            in_process,
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.core_binary, None);
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert!(!config.in_process);
    }

    #[test]
    fn test_overrides() {
        let config = HostConfig::from_lookup(lookup(&[
            (CORE_BIN_ENV, "/opt/chat/chat-desktop-core"),
            (REQUEST_TIMEOUT_ENV, "15"),
            (IN_PROCESS_ENV, "true"),
        ]));
        assert_eq!(config.core_binary, Some(PathBuf::from("/opt/chat/chat-desktop-core")));
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert!(config.in_process);
    }

    #[test]
    fn test_bad_timeout_falls_back() {
        let zero = HostConfig::from_lookup(lookup(&[(REQUEST_TIMEOUT_ENV, "0")]));
        assert_eq!(zero.request_timeout, Duration::from_secs(120));

        let junk = HostConfig::from_lookup(lookup(&[(REQUEST_TIMEOUT_ENV, "soon")]));
        assert_eq!(junk.request_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_baked_identity() {
        assert_eq!(app_slug(), "chat-desktop");
        assert_eq!(app_name(), "Chat Desktop");
    }
}
