use std::{path::PathBuf, time::Duration};

use chrono::Utc;

use crate::config::{ResolvedStorageConfig, StorageKind};

const DB_PATH: &str = "WATCHPOST_DB_PATH";

const RETENTION_DAYS: &str = "WATCHPOST_RETENTION_DAYS";

const STORAGE_TIMEOUT: &str = "WATCHPOST_STORAGE_TIMEOUT";

const CONFIG_PATH: &str = "WATCHPOST_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "./config.json";

pub fn get_config_path() -> String {
    std::env::var(CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

/// Current wall-clock time as epoch nanoseconds
pub fn now_nanos() -> i64 {
    Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| Utc::now().timestamp().saturating_mul(1_000_000_000))
}

/// Apply storage overrides from `lookup`. Values that do not parse are
/// ignored; a database path switches the backend to SQLite.
pub fn apply_storage_overrides(
    storage: &mut ResolvedStorageConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    if let Some(path) = lookup(DB_PATH).filter(|p| !p.is_empty()) {
        storage.kind = StorageKind::Sqlite {
            path: PathBuf::from(path),
        };
    }
    storage.retention_days = lookup(RETENTION_DAYS)
        .map_or(storage.retention_days, |res| {
            res.parse().unwrap_or(storage.retention_days)
        });
    if let Some(secs) = lookup(STORAGE_TIMEOUT).and_then(|res| res.parse::<u64>().ok()) {
        storage.connect_timeout = Duration::from_secs(secs);
    }
}

pub fn apply_env_overrides(storage: &mut ResolvedStorageConfig) {
    apply_storage_overrides(storage, |key| std::env::var(key).ok());
}
