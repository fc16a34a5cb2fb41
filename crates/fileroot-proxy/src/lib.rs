//! File-root proxy library
//!
//! Serves files from a local directory over a one-request-per-connection
//! HTTP/1.1 exchange, keeping recently served bytes in a disk-backed TTL cache.

pub mod cli;
pub mod config;
pub mod error;
pub mod handler;
pub mod listing;
pub mod mime;
pub mod origin;
pub mod response;
pub mod server;

pub use config::Config;
pub use error::{OriginError, ProxyError, Result};
pub use origin::Origin;
pub use server::{Server, ServerState, SharedState};
