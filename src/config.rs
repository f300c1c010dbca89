use std::path::PathBuf;

use crate::store::StoreOptions;

pub const DATA_DIR_VAR: &str = "STAYBOOK_DATA_DIR";
pub const COMPACT_THRESHOLD_VAR: &str = "STAYBOOK_COMPACT_THRESHOLD";
pub const WAL_CHANNEL_VAR: &str = "STAYBOOK_WAL_CHANNEL";

const DEFAULT_DATA_DIR: &str = "./data";
const WAL_FILE: &str = "staybook.wal";

/// Process configuration. Unset or unparsable variables fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub compact_threshold: u64,
    pub wal_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        let store = StoreOptions::default();
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            compact_threshold: store.compact_threshold,
            wal_channel_capacity: store.channel_capacity,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup(DATA_DIR_VAR)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            compact_threshold: lookup(COMPACT_THRESHOLD_VAR)
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
            wal_channel_capacity: lookup(WAL_CHANNEL_VAR)
                .and_then(|s| s.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.wal_channel_capacity),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            compact_threshold: self.compact_threshold,
            channel_capacity: self.wal_channel_capacity,
        }
    }
}
