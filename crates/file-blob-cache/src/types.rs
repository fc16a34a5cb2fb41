//! Cache types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cached blob as seen when enumerating the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub size: u64,
    pub stored_at: DateTime<Utc>,
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub write_failures: u64,
    pub expired_observed: u64,
    pub swept: u64,
}

/// Result of removing a single key as part of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum DeleteOutcome {
    Removed,
    Absent,
    Failed(String),
}
