//! Service configuration from the environment (after loading `.env`).

use std::time::Duration;

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageKind {
    Postgres,
    Memory,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub max_connections: u32,
    pub nats_url: Option<String>,
    pub storage: StorageKind,
    pub table_suffix: String,
    pub lock_timeout: Option<Duration>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; missing keys take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str, default: &str| lookup(key).filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string());

        let database_url = match lookup("DATABASE_URL").filter(|v| !v.is_empty()) {
            Some(url) => url,
            None => format!(
                "postgres://{}:{}@{}:{}/{}?sslmode=disable",
                get("DB_USER", "postgres"),
                get("DB_PASSWORD", "postgres"),
                get("DB_HOST", "localhost"),
                get("DB_PORT", "5432"),
                get("DB_NAME", "postgres"),
            ),
        };

        let storage = match get("STORAGE", "postgres").to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => StorageKind::Postgres,
            "memory" => StorageKind::Memory,
            other => return Err(ConfigError::Invalid { key: "STORAGE", value: other.to_string() }),
        };

        let lock_timeout = match lookup("CHECKOUT_LOCK_TIMEOUT_MS").filter(|v| !v.is_empty()) {
            Some(ms) => Some(Duration::from_millis(parse("CHECKOUT_LOCK_TIMEOUT_MS", &ms)?)),
            None => None,
        };

        Ok(Self {
            database_url,
            port: parse("PORT", &get("PORT", "8080"))?,
            max_connections: parse("DB_MAX_CONNECTIONS", &get("DB_MAX_CONNECTIONS", "10"))?,
            nats_url: lookup("NATS_URL").filter(|v| !v.is_empty()),
            storage,
            table_suffix: get("TABLE_SUFFIX", ""),
            lock_timeout,
        })
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid { key, value: value.to_string() })
}
