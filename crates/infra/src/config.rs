//! Runtime configuration from the environment.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `AGRINET_STORE` | `memory` | `memory` or `postgres` |
//! | `DATABASE_URL` | unset | Required when `AGRINET_STORE=postgres` |
//! | `AGRINET_MAX_CONFLICT_RETRIES` | `8` | Engine re-read budget on stale versions |
//! | `AGRINET_INBOX_CAPACITY` | `50` | Notifications kept per user |
//! | `AGRINET_LOG_FORMAT` | `json` | `json` or `pretty` |
//!
//! Unparseable values fall back to the default with a warning.

use std::str::FromStr;

use agrinet_observability::LogFormat;

use crate::engine::EngineConfig;
use crate::notify::DEFAULT_INBOX_CAPACITY;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in_memory" => Ok(StoreBackend::Memory),
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            other => Err(format!("unknown store backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketConfig {
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub engine: EngineConfig,
    pub inbox_capacity: usize,
    pub log_format: LogFormat,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::Memory,
            database_url: None,
            engine: EngineConfig::default(),
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            log_format: LogFormat::Json,
        }
    }
}

impl MarketConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            store: parse_or(&lookup, "AGRINET_STORE", defaults.store),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            engine: EngineConfig {
                max_conflict_retries: parse_or(
                    &lookup,
                    "AGRINET_MAX_CONFLICT_RETRIES",
                    defaults.engine.max_conflict_retries,
                ),
            },
            inbox_capacity: parse_or(&lookup, "AGRINET_INBOX_CAPACITY", defaults.inbox_capacity),
            log_format: parse_or(&lookup, "AGRINET_LOG_FORMAT", defaults.log_format),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + core::fmt::Debug,
    T::Err: core::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|err| {
            tracing::warn!(key, value = %raw, error = %err, ?default, "invalid setting; using default");
            default
        }),
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
    fn empty_environment_gives_defaults() {
        assert_eq!(MarketConfig::from_lookup(lookup(&[])), MarketConfig::default());
    }

    #[test]
    fn reads_every_setting() {
        let config = MarketConfig::from_lookup(lookup(&[
            ("AGRINET_STORE", "postgres"),
            ("DATABASE_URL", "postgres://localhost/agrinet"),
            ("AGRINET_MAX_CONFLICT_RETRIES", "3"),
            ("AGRINET_INBOX_CAPACITY", "10"),
            ("AGRINET_LOG_FORMAT", "pretty"),
        ]));
        assert_eq!(config.store, StoreBackend::Postgres);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/agrinet"));
        assert_eq!(config.engine.max_conflict_retries, 3);
        assert_eq!(config.inbox_capacity, 10);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn bad_values_fall_back() {
        let config = MarketConfig::from_lookup(lookup(&[
            ("AGRINET_STORE", "mongo"),
            ("AGRINET_MAX_CONFLICT_RETRIES", "-1"),
        ]));
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.engine.max_conflict_retries, 8);
    }
}
