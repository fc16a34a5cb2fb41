//! Read-only view of the filesystem root that backs the cache

use crate::error::OriginError;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::debug;

/// A request path resolved inside the root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Canonical location on disk
    pub path: PathBuf,
    /// Normalized path relative to the root, `/`-separated; empty for the root
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Directory(Target),
    File(Target),
    Absent,
}

/// An immediate child of a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Child {
    pub name: String,
    pub is_dir: bool,
}

pub struct Origin {
    root: PathBuf,
    reads: AtomicU64,
}

impl Origin {
    /// Open the origin at `root`, which must already exist
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, OriginError> {
        let root = root.as_ref();
        let canonical = fs::canonicalize(root)
            .await
            .map_err(|e| OriginError::from_io(&root.display().to_string(), e))?;

        Ok(Self {
            root: canonical,
            reads: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of file reads served by the origin so far
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Classify a decoded request path, refusing anything outside the root
    pub async fn resolve(&self, request_path: &str) -> Result<Resolved, OriginError> {
        let segments = normalize(request_path)
            .ok_or_else(|| OriginError::Forbidden(request_path.to_string()))?;
        let candidate = segments
            .iter()
            .fold(self.root.clone(), |path, segment| path.join(segment));

        let canonical = match fs::canonicalize(&candidate).await {
            Ok(path) => path,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
                ) =>
            {
                return Ok(Resolved::Absent)
            }
            Err(e) => return Err(OriginError::from_io(request_path, e)),
        };

        // Symlinks may point anywhere; only the canonical location counts
        if !canonical.starts_with(&self.root) {
            debug!(path = %request_path, resolved = ?canonical, "Rejected path outside web root");
            return Err(OriginError::Forbidden(request_path.to_string()));
        }

        let metadata = match fs::metadata(&canonical).await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Resolved::Absent),
            Err(e) => return Err(OriginError::from_io(request_path, e)),
        };

        let target = Target {
            key: relative_key(&self.root, &canonical),
            path: canonical,
        };

        Ok(if metadata.is_dir() {
            Resolved::Directory(target)
        } else if metadata.is_file() {
            Resolved::File(target)
        } else {
            Resolved::Absent
        })
    }

    pub async fn read_file(&self, target: &Target) -> Result<Vec<u8>, OriginError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        fs::read(&target.path)
            .await
            .map_err(|e| OriginError::from_io(&target.key, e))
    }

    /// Immediate children of a directory, sorted by name
    pub async fn list_children(&self, target: &Target) -> Result<Vec<Child>, OriginError> {
        let mut read_dir = fs::read_dir(&target.path)
            .await
            .map_err(|e| OriginError::from_io(&target.key, e))?;

        let mut children = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| OriginError::from_io(&target.key, e))?
        {
            // Follow symlinks so linked directories still get a trailing slash
            let is_dir = match fs::metadata(entry.path()).await {
                Ok(m) => m.is_dir(),
                Err(_) => entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false),
            };
            children.push(Child {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
            });
        }

        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }
}

/// Lexically normalize a request path. Returns `None` if `..` climbs above the root.
fn normalize(request_path: &str) -> Option<Vec<&str>> {
    let mut segments = Vec::new();
    for segment in request_path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    Some(segments)
}

fn relative_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default()
}
