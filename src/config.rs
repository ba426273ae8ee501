use crate::error::ConfigError;
use std::net::SocketAddr;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://neocore.db";
pub const DEFAULT_HISTORY_KEY: &str = "neocore-chat-history";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub chat_url: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub database_url: String,
    pub history_key: String,
    pub listen_addr: SocketAddr,
}

impl Config {
    /// Reads `.env` (if any) and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!("Ignoring unreadable .env file: {}", e);
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty values count as unset.
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let chat_url = get("NEOCORE_CHAT_URL").ok_or(ConfigError::Missing("NEOCORE_CHAT_URL"))?;
        if !(chat_url.starts_with("http://") || chat_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                name: "NEOCORE_CHAT_URL",
                reason: format!("expected an http(s) URL, got {:?}", chat_url),
            });
        }

        let listen_addr: SocketAddr = get("NEOCORE_LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                name: "NEOCORE_LISTEN_ADDR",
                reason: e.to_string(),
            })?;

        Ok(Self {
            chat_url,
            api_key: get("NEOCORE_API_KEY"),
            model: get("NEOCORE_MODEL"),
            database_url: get("NEOCORE_DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            history_key: get("NEOCORE_HISTORY_KEY")
                .unwrap_or_else(|| DEFAULT_HISTORY_KEY.to_string()),
            listen_addr,
        })
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
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config =
            Config::from_lookup(lookup(&[("NEOCORE_CHAT_URL", "https://x.supabase.co/functions/v1/ai-chat")]))
                .unwrap();
        assert_eq!(config.api_key, None);
        assert_eq!(config.model, None);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.history_key, DEFAULT_HISTORY_KEY);
        assert_eq!(config.listen_addr, "0.0.0.0:3000".parse().unwrap());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("NEOCORE_CHAT_URL", "http://localhost:8080/chat"),
            ("NEOCORE_API_KEY", "secret"),
            ("NEOCORE_MODEL", "gemini-2.5-flash"),
            ("NEOCORE_DATABASE_URL", "sqlite://other.db"),
            ("NEOCORE_HISTORY_KEY", "room-42"),
            ("NEOCORE_LISTEN_ADDR", "127.0.0.1:9000"),
        ]))
        .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.model.as_deref(), Some("gemini-2.5-flash"));
        assert_eq!(config.database_url, "sqlite://other.db");
        assert_eq!(config.history_key, "room-42");
        assert_eq!(config.listen_addr.port(), 9000);
    }

    #[test]
    fn test_missing_or_blank_url() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("NEOCORE_CHAT_URL")));

        let err = Config::from_lookup(lookup(&[("NEOCORE_CHAT_URL", "  ")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::from_lookup(lookup(&[("NEOCORE_CHAT_URL", "ftp://nope")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "NEOCORE_CHAT_URL", .. }));

        let err = Config::from_lookup(lookup(&[
            ("NEOCORE_CHAT_URL", "https://ok"),
            ("NEOCORE_LISTEN_ADDR", "not-an-addr"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "NEOCORE_LISTEN_ADDR", .. }));
    }
}
