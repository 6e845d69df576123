//! Core configuration
//!
//! Defaults are baked at build time from app.config.json; `CHAT_DESKTOP_*`
//! environment variables override them at startup.

use std::path::PathBuf;

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

// Home folder name (e.g., ".chat-desktop")
baked_config!(home_folder, "CHAT_DESKTOP_HOME_FOLDER");

// SQLite file inside the data directory (e.g., "chat.sqlite")
baked_config!(database_file, "CHAT_DESKTOP_DATABASE_FILE");

// Ollama base URL (e.g., "http://localhost:11434")
baked_config!(inference_url, "CHAT_DESKTOP_INFERENCE_URL");

// Model for new chats (e.g., "gemma3:1b")
baked_config!(default_model, "CHAT_DESKTOP_DEFAULT_MODEL");

pub const DATA_HOME_ENV: &str = "CHAT_DESKTOP_DATA_HOME";
pub const ENV_MODE_ENV: &str = "CHAT_DESKTOP_ENV";
pub const OLLAMA_URL_ENV: &str = "CHAT_DESKTOP_OLLAMA_URL";
pub const MODEL_ENV: &str = "CHAT_DESKTOP_MODEL";
pub const RESPONSE_SOURCE_ENV: &str = "CHAT_DESKTOP_RESPONSE_SOURCE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Ollama,
    Static,
}

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub data_dir: PathBuf,
    pub ollama_url: String,
    pub default_model: String,
    pub development: bool,
    pub source: SourceKind,
}

impl CoreConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup (empty values count as unset).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_dir = get(DATA_HOME_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| default_data_dir(get("HOME").or_else(|| get("USERPROFILE"))));

        let development = get(ENV_MODE_ENV)
            .map(|v| v.eq_ignore_ascii_case("development"))
            .unwrap_or(false);

        let source = match get(RESPONSE_SOURCE_ENV).as_deref() {
            Some("static") => SourceKind::Static,
            Some("ollama") => SourceKind::Ollama,
            _ if development => SourceKind::Static,
            _ => SourceKind::Ollama,
        };

        Self {
            data_dir,
            ollama_url: get(OLLAMA_URL_ENV).unwrap_or_else(|| inference_url().to_string()),
            default_model: get(MODEL_ENV).unwrap_or_else(|| default_model().to_string()),
            development,
            source,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(database_file())
    }
}

fn default_data_dir(home: Option<String>) -> PathBuf {
    match home {
        Some(home) => PathBuf::from(home).join(home_folder()),
        None => PathBuf::from(home_folder()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> CoreConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CoreConfig::from_lookup(move |key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_from_baked_values() {
        let cfg = config(&[("HOME", "/home/u")]);
        assert_eq!(cfg.data_dir, PathBuf::from("/home/u").join(home_folder()));
        assert_eq!(cfg.ollama_url, inference_url());
        assert_eq!(cfg.default_model, default_model());
        assert_eq!(cfg.source, SourceKind::Ollama);
        assert!(!cfg.development);
    }

    #[test]
    fn test_env_overrides() {
        let cfg = config(&[
            (DATA_HOME_ENV, "/data"),
            (OLLAMA_URL_ENV, "http://gpu:11434"),
            (MODEL_ENV, "llama3"),
        ]);
        assert_eq!(cfg.database_path(), PathBuf::from("/data").join(database_file()));
        assert_eq!(cfg.ollama_url, "http://gpu:11434");
        assert_eq!(cfg.default_model, "llama3");
    }

    #[test]
    fn test_development_selects_static_source() {
        assert_eq!(config(&[(ENV_MODE_ENV, "development")]).source, SourceKind::Static);
        assert_eq!(config(&[(RESPONSE_SOURCE_ENV, "static")]).source, SourceKind::Static);
        assert_eq!(
            config(&[(ENV_MODE_ENV, "development"), (RESPONSE_SOURCE_ENV, "ollama")]).source,
            SourceKind::Ollama
        );
    }

    #[test]
    fn test_blank_values_ignored() {
        let cfg = config(&[(MODEL_ENV, "  ")]);
        assert_eq!(cfg.default_model, default_model());
    }
}
