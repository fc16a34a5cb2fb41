//! Error types for the file-root proxy

use std::fmt;
use std::io;

/// Failures raised by the filesystem origin
#[derive(Debug)]
pub enum OriginError {
    NotFound(String),
    /// The request resolved to a location outside the configured root
    Forbidden(String),
    PermissionDenied(String),
    Io(Box<io::Error>),
}

impl OriginError {
    pub(crate) fn from_io(path: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => OriginError::NotFound(path.to_string()),
            io::ErrorKind::PermissionDenied => OriginError::PermissionDenied(path.to_string()),
            _ => OriginError::Io(Box::new(err)),
        }
    }
}

impl fmt::Display for OriginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginError::NotFound(path) => write!(f, "Not found: {}", path),
            OriginError::Forbidden(path) => write!(f, "Path escapes web root: {}", path),
            OriginError::PermissionDenied(path) => write!(f, "Permission denied: {}", path),
            OriginError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for OriginError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OriginError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum ProxyError {
    Cache(file_blob_cache::CacheError),
    Origin(OriginError),
    Io(Box<io::Error>),
    Json(serde_json::Error),
    Config(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::Cache(err) => write!(f, "Cache error: {}", err),
            ProxyError::Origin(err) => write!(f, "Origin error: {}", err),
            ProxyError::Io(err) => write!(f, "IO error: {}", err),
            ProxyError::Json(err) => write!(f, "JSON error: {}", err),
            ProxyError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Cache(err) => Some(err),
            ProxyError::Origin(err) => Some(err),
            ProxyError::Io(err) => Some(err.as_ref()),
            ProxyError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<file_blob_cache::CacheError> for ProxyError {
    fn from(err: file_blob_cache::CacheError) -> Self {
        ProxyError::Cache(err)
    }
}

impl From<OriginError> for ProxyError {
    fn from(err: OriginError) -> Self {
        ProxyError::Origin(err)
    }
}

impl From<io::Error> for ProxyError {
    fn from(err: io::Error) -> Self {
        ProxyError::Io(Box::new(err))
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        ProxyError::Json(err)
    }
}

impl From<tracing_subscriber::filter::ParseError> for ProxyError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        ProxyError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
