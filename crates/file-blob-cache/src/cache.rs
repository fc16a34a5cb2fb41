//! File-based blob storage with TTL validity checks

use crate::error::{CacheError, Result};
use crate::types::{CacheEntry, CacheStats, DeleteOutcome};
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

const DATA_DIR: &str = "data";
const STAGING_DIR: &str = "tmp";
const STAGING_SUFFIX: &str = "part";
/// Staged writes older than this are left over from a crashed writer
const STALE_STAGING_AGE: Duration = Duration::from_secs(600);
/// Attempts to move a staged write into place when its directory is pruned underneath it
const COMMIT_ATTEMPTS: usize = 3;

/// A blob cache whose entries live as plain files under `<cache_dir>/data`
pub struct BlobCache {
    /// Directory holding committed entries, mirrored by key
    data_dir: PathBuf,
    /// Directory where writes are staged before being renamed into place
    staging_dir: PathBuf,
    /// Maximum age of a valid entry
    ttl: Duration,
    next_staging_id: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    write_failures: AtomicU64,
    expired_observed: AtomicU64,
    swept: AtomicU64,
}

impl BlobCache {
    /// Create a new blob cache rooted at `cache_dir`
    pub fn new(cache_dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        let cache_dir = cache_dir.into();
        Self {
            data_dir: cache_dir.join(DATA_DIR),
            staging_dir: cache_dir.join(STAGING_DIR),
            ttl,
            next_staging_id: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            expired_observed: AtomicU64::new(0),
            swept: AtomicU64::new(0),
        }
    }

    /// Initialize the cache by ensuring its directories exist.
    ///
    /// Staged writes left behind by a previous process are discarded.
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir).await?;
        fs::create_dir_all(&self.staging_dir).await?;
        let discarded = self.discard_staged(Duration::ZERO).await?;
        info!(
            data_dir = ?self.data_dir,
            ttl_secs = self.ttl.as_secs(),
            discarded,
            "Cache initialized"
        );
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Map a key onto its entry file, rejecting keys that could leave `data/`
    fn entry_path(&self, key: &str) -> Result<PathBuf> {
        let malformed = key.is_empty()
            || key.starts_with('/')
            || key.contains('\\')
            || key.contains('\0')
            || key
                .split('/')
                .any(|segment| segment.is_empty() || segment == "." || segment == "..");

        if malformed {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        Ok(self.data_dir.join(key))
    }

    fn staging_path(&self) -> PathBuf {
        let id = self.next_staging_id.fetch_add(1, Ordering::Relaxed);
        self.staging_dir
            .join(format!("{}-{}.{}", std::process::id(), id, STAGING_SUFFIX))
    }

    /// True iff an entry file exists for `key`
    pub async fn exists(&self, key: &str) -> bool {
        match self.entry_path(key) {
            Ok(path) => fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// True iff an entry exists for `key` and is no older than the TTL.
    ///
    /// Expired entries are reported but left on disk for the sweep.
    pub async fn is_valid(&self, key: &str) -> bool {
        let Ok(path) = self.entry_path(key) else {
            return false;
        };

        match entry_age(&path).await {
            Ok(age) if age <= self.ttl => true,
            Ok(age) => {
                self.expired_observed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    key = %key,
                    age_secs = age.as_secs(),
                    ttl_secs = self.ttl.as_secs(),
                    "Cache entry expired"
                );
                false
            }
            Err(_) => false,
        }
    }

    /// Read the full payload stored under `key`
    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.entry_path(key)?;
        fs::read(&path)
            .await
            .map_err(|e| CacheError::from_io(key, e))
    }

    /// Read the payload stored under `key` as UTF-8 text
    pub async fn get_text(&self, key: &str) -> Result<String> {
        let data = self.get(key).await?;
        String::from_utf8(data).map_err(CacheError::InvalidText)
    }

    /// Return the payload if a valid entry exists, recording a hit or a miss.
    ///
    /// An entry removed between the validity check and the read is a miss.
    pub async fn lookup(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.entry_path(key)?;

        if !self.is_valid(key).await {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Cache miss");
            return Ok(None);
        }

        self.read_checked(key).await
    }

    /// Read an entry already judged valid; a concurrent removal is a miss
    async fn read_checked(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.get(key).await {
            Ok(data) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, size = data.len(), "Cache hit");
                Ok(Some(data))
            }
            Err(CacheError::NotFound(_)) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache entry vanished before read");
                Ok(None)
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Store `data` under `key`, replacing any previous payload atomically
    pub async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let written = match self.entry_path(key) {
            Ok(path) => self.write_atomic(key, &path, data).await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, size = data.len(), "Cached blob");
                Ok(())
            }
            Err(e) => {
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Store UTF-8 text under `key`
    pub async fn put_text(&self, key: &str, text: &str) -> Result<()> {
        self.put(key, text.as_bytes()).await
    }

    async fn write_atomic(&self, key: &str, path: &Path, data: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|e| CacheError::from_io(key, e))?;

        let staging = self.staging_path();
        let committed = async {
            fs::write(&staging, data).await?;
            commit(&staging, path).await
        }
        .await;

        if let Err(e) = committed {
            match fs::remove_file(&staging).await {
                Err(cleanup) if cleanup.kind() != io::ErrorKind::NotFound => {
                    warn!(path = ?staging, error = %cleanup, "Failed to remove staged write");
                }
                _ => {}
            }
            return Err(CacheError::from_io(key, e));
        }

        Ok(())
    }

    /// Remove the entry for `key`, returning whether one existed
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.entry_path(key)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key = %key, "Removed cache entry");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::from_io(key, e)),
        }
    }

    /// Remove every key independently; one failure never stops the rest
    pub async fn delete_many<I, S>(&self, keys: I) -> Vec<(String, DeleteOutcome)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut outcomes = Vec::new();

        for key in keys {
            let key = key.as_ref();
            let outcome = match self.delete(key).await {
                Ok(true) => DeleteOutcome::Removed,
                Ok(false) => DeleteOutcome::Absent,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to remove cache entry");
                    DeleteOutcome::Failed(e.to_string())
                }
            };
            outcomes.push((key.to_string(), outcome));
        }

        outcomes
    }

    /// Enumerate all entries; an empty or missing store yields nothing
    pub async fn list(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        let mut pending = vec![self.data_dir.clone()];

        while let Some(dir) = pending.pop() {
            let mut read_dir = match fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(item) = read_dir.next_entry().await? {
                let path = item.path();
                let metadata = match item.metadata().await {
                    Ok(m) => m,
                    // Removed while we were walking
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };

                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !metadata.is_file() {
                    continue;
                }

                let Some(key) = self.key_for(&path) else {
                    continue;
                };
                entries.push(CacheEntry {
                    key,
                    size: metadata.len(),
                    stored_at: DateTime::<Utc>::from(metadata.modified()?),
                });
            }
        }

        Ok(entries)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.data_dir).ok()?;
        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        (!segments.is_empty()).then(|| segments.join("/"))
    }

    /// Remove every entry older than the TTL, returning how many went away.
    ///
    /// Also prunes directories left empty under `data/` and abandoned staged writes.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let mut removed = 0;

        for entry in self.list().await? {
            let Ok(path) = self.entry_path(&entry.key) else {
                continue;
            };

            // Re-check right before removal so a concurrent put is not discarded
            match entry_age(&path).await {
                Ok(age) if age > self.ttl => {}
                _ => continue,
            }

            match fs::remove_file(&path).await {
                Ok(()) => {
                    removed += 1;
                    debug!(key = %entry.key, "Swept expired cache entry");
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(key = %entry.key, error = %e, "Failed to sweep cache entry"),
            }
        }

        if removed > 0 {
            self.swept.fetch_add(removed as u64, Ordering::Relaxed);
            info!(removed, "Swept expired cache entries");
        }

        self.prune_empty_dirs().await;
        if let Err(e) = self.discard_staged(STALE_STAGING_AGE).await {
            warn!(error = %e, "Failed to clean staging directory");
        }

        Ok(removed)
    }

    /// Remove empty directories below `data/`, deepest first.
    ///
    /// Best effort: a directory that is not empty, or that a concurrent put
    /// has just repopulated, is left alone.
    async fn prune_empty_dirs(&self) {
        let mut dirs = Vec::new();
        let mut pending = vec![self.data_dir.clone()];

        while let Some(dir) = pending.pop() {
            let Ok(mut read_dir) = fs::read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(item)) = read_dir.next_entry().await {
                if item.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                    let path = item.path();
                    dirs.push(path.clone());
                    pending.push(path);
                }
            }
        }

        // Children are discovered after their parents
        let mut pruned = 0;
        for dir in dirs.iter().rev() {
            if fs::remove_dir(dir).await.is_ok() {
                pruned += 1;
            }
        }
        if pruned > 0 {
            debug!(pruned, "Pruned empty cache directories");
        }
    }

    /// Delete staged writes at least `min_age` old, returning how many went away
    async fn discard_staged(&self, min_age: Duration) -> Result<usize> {
        let mut read_dir = match fs::read_dir(&self.staging_dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut discarded = 0;
        while let Some(item) = read_dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(STAGING_SUFFIX) {
                continue;
            }
            match entry_age(&path).await {
                Ok(age) if age >= min_age => {}
                _ => continue,
            }

            match fs::remove_file(&path).await {
                Ok(()) => discarded += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = ?path, error = %e, "Failed to discard staged write"),
            }
        }

        if discarded > 0 {
            info!(discarded, "Discarded abandoned staged writes");
        }
        Ok(discarded)
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            expired_observed: self.expired_observed.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
        }
    }
}

/// Move a staged file to `path`, recreating its directory if a sweep pruned it
async fn commit(staging: &Path, path: &Path) -> io::Result<()> {
    let mut attempt = 1;
    loop {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::rename(staging, path).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound && attempt < COMMIT_ATTEMPTS => {
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Time since the file at `path` was last written
async fn entry_age(path: &Path) -> io::Result<Duration> {
    let metadata = fs::metadata(path).await?;
    if !metadata.is_file() {
        return Err(io::Error::from(io::ErrorKind::NotFound));
    }
    let modified = metadata.modified()?;
    Ok(SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO))
}
