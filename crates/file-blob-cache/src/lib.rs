//! File-based blob cache with TTL expiration
//!
//! Stores binary blobs on disk under caller-chosen keys. Entry age comes from
//! the file's modification time, so the store survives restarts without any
//! side index. Writes are staged and renamed into place so concurrent readers
//! never observe a partially written payload.

mod cache;
mod error;
mod types;

pub use cache::BlobCache;
pub use error::{CacheError, Result};
pub use types::{CacheEntry, CacheStats, DeleteOutcome};
