//! Error types for the blob cache

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum CacheError {
    NotFound(String),
    PermissionDenied(String),
    InvalidKey(String),
    InvalidText(std::string::FromUtf8Error),
    Io(Box<io::Error>),
}

impl CacheError {
    /// Classify an I/O error raised while touching the entry for `key`
    pub(crate) fn from_io(key: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => CacheError::NotFound(key.to_string()),
            io::ErrorKind::PermissionDenied => CacheError::PermissionDenied(key.to_string()),
            _ => CacheError::Io(Box::new(err)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::NotFound(key) => write!(f, "Cache entry not found: {}", key),
            CacheError::PermissionDenied(key) => write!(f, "Permission denied: {}", key),
            CacheError::InvalidKey(key) => write!(f, "Invalid cache key: {:?}", key),
            CacheError::InvalidText(err) => write!(f, "Cached payload is not UTF-8: {}", err),
            CacheError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::InvalidText(err) => Some(err),
            CacheError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for CacheError {
    fn from(err: io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
