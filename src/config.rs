//! Service configuration, read from the environment.

use std::{path::PathBuf, sync::Arc};

use thiserror::Error;

use crate::{
    locks::DEFAULT_STRIPES,
    store::{
        LedgerStore, StoreError, in_memory_store::InMemoryLedgerStore,
        sqlite_store::SqliteLedgerStore,
    },
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value `{value}` for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// `wallet.db` under `storage_location`
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the wallet database
    pub storage_location: PathBuf,

    pub store: StoreKind,

    /// Number of wallet lock stripes
    pub lock_stripes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_location: PathBuf::from("data/"),
            store: StoreKind::Sqlite,
            lock_stripes: DEFAULT_STRIPES,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`Config::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(location) = lookup("STORAGE_LOCATION") {
            config.storage_location = PathBuf::from(location);
        }

        if let Some(store) = lookup("WALLET_STORE") {
            config.store = match store.as_str() {
                "sqlite" => StoreKind::Sqlite,
                "memory" => StoreKind::Memory,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: "WALLET_STORE",
                        value: store,
                        reason: "expected `sqlite` or `memory`",
                    });
                }
            };
        }

        if let Some(stripes) = lookup("WALLET_LOCK_STRIPES") {
            config.lock_stripes = match stripes.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: "WALLET_LOCK_STRIPES",
                        value: stripes,
                        reason: "expected a positive integer",
                    });
                }
            };
        }

        Ok(config)
    }

    pub fn open_store(&self) -> Result<Arc<dyn LedgerStore>, StoreError> {
        Ok(match self.store {
            StoreKind::Sqlite => Arc::new(SqliteLedgerStore::open(&self.storage_location)?),
            StoreKind::Memory => Arc::new(InMemoryLedgerStore::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.storage_location, PathBuf::from("data/"));
        assert_eq!(config.store, StoreKind::Sqlite);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("STORAGE_LOCATION", "/var/lib/wallet"),
            ("WALLET_STORE", "memory"),
            ("WALLET_LOCK_STRIPES", "8"),
        ]))
        .unwrap();
        assert_eq!(config.storage_location, PathBuf::from("/var/lib/wallet"));
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.lock_stripes, 8);
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::from_lookup(lookup(&[("WALLET_STORE", "mysql")])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid value `mysql` for WALLET_STORE: expected `sqlite` or `memory`"
        );
        assert!(Config::from_lookup(lookup(&[("WALLET_LOCK_STRIPES", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("WALLET_LOCK_STRIPES", "many")])).is_err());
    }

    #[test]
    fn test_open_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            storage_location: dir.path().join("nested"),
            ..Config::default()
        };
        let store = config.open_store().unwrap();
        assert!(store.wallet(uuid::Uuid::new_v4()).unwrap().is_none());
        assert!(dir.path().join("nested").join("wallet.db").is_file());
    }
}
