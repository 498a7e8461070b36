//! Loads hub configuration from the process environment and an optional `.env` file.
//!
//! Precedence: existing process env > `.env` (current directory, or `override_dir`).
//! This mirrors the teacher crate's env precedence rule, minus its XDG config.toml layer,
//! which this hub has no use for (see DESIGN.md).

mod dotenv;

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Validated hub configuration (§6 Environment configuration).
#[derive(Clone, Debug)]
pub struct HubConfig {
    pub port: u16,
    pub chat_bot_token: String,
    pub hub_public_url: Option<String>,
    pub database_url: Option<String>,
    pub default_chat_id: Option<i64>,
    pub hub_secret: Option<String>,
}

const DEFAULT_PORT: u16 = 9900;

impl HubConfig {
    /// Loads `.env` (if present) then applies env vars not already set in the process
    /// environment, then reads and validates the recognized keys.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Like [`Self::load`] but looks for `.env` in `override_dir` instead of the current
    /// directory. Used by tests.
    pub fn load_from(override_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let dotenv_map = dotenv::load_env_map(override_dir).map_err(ConfigError::DotenvRead)?;
        for (key, value) in &dotenv_map {
            if std::env::var(key).is_err() {
                std::env::set_var(key, value);
            }
        }

        let chat_bot_token = std::env::var("CHAT_BOT_TOKEN")
            .map_err(|_| ConfigError::Missing("CHAT_BOT_TOKEN"))?;
        if chat_bot_token.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "CHAT_BOT_TOKEN",
                value: chat_bot_token,
            });
        }

        let port = match std::env::var("PORT") {
            Ok(raw) => raw.parse::<u16>().map_err(|_| ConfigError::Invalid {
                key: "PORT",
                value: raw,
            })?,
            Err(_) => DEFAULT_PORT,
        };

        let default_chat_id = match std::env::var("DEFAULT_CHAT_ID") {
            Ok(raw) if !raw.trim().is_empty() => {
                Some(raw.parse::<i64>().map_err(|_| ConfigError::Invalid {
                    key: "DEFAULT_CHAT_ID",
                    value: raw,
                })?)
            }
            _ => None,
        };

        Ok(HubConfig {
            port,
            chat_bot_token,
            hub_public_url: std::env::var("HUB_PUBLIC_URL").ok().filter(|s| !s.is_empty()),
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            default_chat_id,
            hub_secret: std::env::var("HUB_SECRET").ok().filter(|s| !s.is_empty()),
        })
    }
}

#[cfg(feature = "tracing-init")]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable mutation races across tests in the same process; serialize them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear() {
        for key in ["CHAT_BOT_TOKEN", "PORT", "HUB_PUBLIC_URL", "DATABASE_URL", "DEFAULT_CHAT_ID", "HUB_SECRET"] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn missing_chat_bot_token_is_fatal() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear();
        let dir = tempfile::tempdir().unwrap();
        let err = HubConfig::load_from(Some(dir.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("CHAT_BOT_TOKEN")));
    }

    #[test]
    fn defaults_port_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear();
        std::env::set_var("CHAT_BOT_TOKEN", "tok123");
        let dir = tempfile::tempdir().unwrap();
        let cfg = HubConfig::load_from(Some(dir.path())).unwrap();
        assert_eq!(cfg.port, DEFAULT_PORT);
        clear();
    }

    #[test]
    fn existing_env_wins_over_dotenv() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear();
        std::env::set_var("CHAT_BOT_TOKEN", "from_env");
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "CHAT_BOT_TOKEN=from_dotenv\n").unwrap();
        let cfg = HubConfig::load_from(Some(dir.path())).unwrap();
        assert_eq!(cfg.chat_bot_token, "from_env");
        clear();
    }

    #[test]
    fn dotenv_applies_when_env_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "CHAT_BOT_TOKEN=from_dotenv\nPORT=1234\n").unwrap();
        let cfg = HubConfig::load_from(Some(dir.path())).unwrap();
        assert_eq!(cfg.chat_bot_token, "from_dotenv");
        assert_eq!(cfg.port, 1234);
        clear();
    }

    #[test]
    fn invalid_port_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear();
        std::env::set_var("CHAT_BOT_TOKEN", "tok");
        std::env::set_var("PORT", "not-a-number");
        let dir = tempfile::tempdir().unwrap();
        let err = HubConfig::load_from(Some(dir.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
        clear();
    }
}
