//! Engine configuration

use std::env;
use std::str::FromStr;

use anyhow::{bail, ensure, Context, Result};

/// Upper bound for `TALEKEEPER_DELIVERED_RETENTION_DAYS` (about a century).
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// Engine configuration loaded from environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Storage backend for quests, companions and the narrative queue
    pub storage: StorageBackend,
    /// SQLite database path (if using the sqlite backend)
    pub db_path: String,
    /// Ring buffer capacity of the event bus history
    pub event_history: usize,
    /// Narrative items handed to one AI context digest
    pub batch_size: usize,
    /// How long to keep delivered narrative items before cleanup (days)
    pub delivered_retention_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown storage backend '{other}' (expected sqlite or memory)"),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::Sqlite,
            db_path: "./data/talekeeper.db".to_string(),
            event_history: 100,
            batch_size: 5,
            delivered_retention_days: 7,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            storage: match lookup("TALEKEEPER_STORAGE") {
                Some(value) => value
                    .parse()
                    .context("TALEKEEPER_STORAGE must be 'sqlite' or 'memory'")?,
                None => defaults.storage,
            },
            db_path: lookup("TALEKEEPER_DB_PATH").unwrap_or(defaults.db_path),
            event_history: parse_or(
                &lookup,
                "TALEKEEPER_EVENT_HISTORY",
                defaults.event_history,
            )
            .context("TALEKEEPER_EVENT_HISTORY must be a non-negative integer")?,
            batch_size: parse_or(&lookup, "TALEKEEPER_BATCH_SIZE", defaults.batch_size)
                .context("TALEKEEPER_BATCH_SIZE must be a non-negative integer")?,
            delivered_retention_days: parse_or(
                &lookup,
                "TALEKEEPER_DELIVERED_RETENTION_DAYS",
                defaults.delivered_retention_days,
            )
            .context("TALEKEEPER_DELIVERED_RETENTION_DAYS must be an integer")?,
        };

        ensure!(
            (0..=MAX_RETENTION_DAYS).contains(&config.delivered_retention_days),
            "TALEKEEPER_DELIVERED_RETENTION_DAYS must be in 0..={MAX_RETENTION_DAYS}, got {}",
            config.delivered_retention_days
        );
        Ok(config)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => Ok(raw.trim().parse::<T>()?),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<EngineConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).expect("defaults");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.event_history, 100);
        assert_eq!(config.db_path, "./data/talekeeper.db");
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("TALEKEEPER_STORAGE", "Memory"),
            ("TALEKEEPER_EVENT_HISTORY", "20"),
            ("TALEKEEPER_BATCH_SIZE", " 3 "),
            ("TALEKEEPER_DELIVERED_RETENTION_DAYS", "30"),
        ])
        .expect("valid config");
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.event_history, 20);
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.delivered_retention_days, 30);
    }

    #[test]
    fn rejects_invalid_numbers_with_context() {
        let err = config_from(&[("TALEKEEPER_BATCH_SIZE", "lots")]).expect_err("invalid");
        assert!(err.to_string().contains("TALEKEEPER_BATCH_SIZE"));
    }

    #[test]
    fn rejects_out_of_range_retention() {
        for days in ["-1", "200000000"] {
            let err = config_from(&[("TALEKEEPER_DELIVERED_RETENTION_DAYS", days)])
                .expect_err("out of range");
            assert!(err.to_string().contains("TALEKEEPER_DELIVERED_RETENTION_DAYS"));
        }
        let config = config_from(&[("TALEKEEPER_DELIVERED_RETENTION_DAYS", "0")])
            .expect("zero");
        assert_eq!(config.delivered_retention_days, 0);
    }

    #[test]
    fn rejects_unknown_backend() {
        assert!(config_from(&[("TALEKEEPER_STORAGE", "postgres")]).is_err());
    }
}
