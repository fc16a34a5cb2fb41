//! Per-connection request handling
//!
//! Each connection carries exactly one request line. The handler resolves it
//! against the origin, serves files through the cache, writes one response
//! and closes the connection.

use crate::error::OriginError;
use crate::listing;
use crate::mime;
use crate::origin::{Resolved, Target};
use crate::response::{Response, Status};
use crate::server::ServerState;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Longest request line accepted, including the line terminator
const MAX_REQUEST_LINE: u64 = 8 * 1024;

/// How long to keep draining unread client input after responding
const LINGER: Duration = Duration::from_secs(2);

/// A parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Decoded path with leading separators stripped; empty means the root
    pub path: String,
}

/// Parse `<VERB> <path> <version>`. Only `GET` is accepted.
pub fn parse_request_line(line: &str) -> Option<Request> {
    let mut parts = line.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }

    let raw = parts.next().unwrap_or("/");
    let raw = raw.split(['?', '#']).next().unwrap_or_default();
    let decoded = urlencoding::decode(raw).ok()?;
    if decoded.contains('\0') {
        return None;
    }

    Some(Request {
        path: decoded.trim_start_matches('/').to_string(),
    })
}

/// Serve one connection from request line to close
pub async fn handle_connection(state: &ServerState, mut stream: TcpStream) {
    let peer = stream.peer_addr().ok();
    let line = read_request_line(&mut stream, state.config.request_timeout).await;

    let response = respond(state, line.as_deref()).await;
    info!(
        peer = ?peer,
        request = line.as_deref().map(str::trim_end).unwrap_or(""),
        status = response.status.code(),
        size = response.body.len(),
        "Handled request"
    );

    if let Err(e) = stream.write_all(&response.to_bytes()).await {
        warn!(peer = ?peer, error = %e, "Failed to write response");
        return;
    }
    if let Err(e) = stream.shutdown().await {
        debug!(peer = ?peer, error = %e, "Failed to shut down connection");
        return;
    }
    linger(&mut stream).await;
}

/// Read the request line; `None` on timeout, I/O failure, empty input or oversize
async fn read_request_line(stream: &mut TcpStream, limit: Duration) -> Option<String> {
    let mut reader = BufReader::new(stream).take(MAX_REQUEST_LINE);
    let mut line = String::new();

    match timeout(limit, reader.read_line(&mut line)).await {
        Ok(Ok(0)) => None,
        // A line cut off by EOF is still complete; only the cap is fatal
        Ok(Ok(n)) if n as u64 >= MAX_REQUEST_LINE && !line.ends_with('\n') => {
            debug!(len = n, "Request line too long");
            None
        }
        Ok(Ok(_)) => Some(line),
        Ok(Err(e)) => {
            debug!(error = %e, "Failed to read request line");
            None
        }
        Err(_) => {
            debug!(timeout_secs = limit.as_secs(), "Timed out reading request line");
            None
        }
    }
}

/// Discard whatever the client still sends so closing does not reset the
/// connection before the response is delivered
async fn linger(stream: &mut TcpStream) {
    let mut sink = [0u8; 4096];
    let drain = async {
        let mut total = 0usize;
        while let Ok(n) = stream.read(&mut sink).await {
            total += n;
            if n == 0 || total > 64 * 1024 {
                break;
            }
        }
    };
    let _ = timeout(LINGER, drain).await;
}

/// Produce the response for a request line; `None` means nothing readable arrived
pub async fn respond(state: &ServerState, line: Option<&str>) -> Response {
    let Some(request) = line.and_then(parse_request_line) else {
        debug!(line = ?line, "Malformed request");
        return Response::error(Status::BadRequest);
    };

    match state.origin.resolve(&request.path).await {
        Ok(Resolved::Directory(target)) => list_directory(state, &target).await,
        Ok(Resolved::File(target)) => serve_file(state, &request, &target).await,
        Ok(Resolved::Absent) => {
            debug!(path = %request.path, "File not found");
            Response::error(Status::NotFound)
        }
        Err(OriginError::Forbidden(path)) => {
            warn!(path = %path, "Rejected request outside web root");
            Response::error(Status::Forbidden)
        }
        Err(e) => {
            error!(path = %request.path, error = %e, "Failed to resolve path");
            Response::error(Status::InternalServerError)
        }
    }
}

async fn list_directory(state: &ServerState, target: &Target) -> Response {
    let children = state.origin.list_children(target).await;
    if let Err(e) = &children {
        warn!(path = ?target.path, error = %e, "Failed to list directory");
    }
    Response::html(listing::render(&target.key, children.as_deref().ok()))
}

async fn serve_file(state: &ServerState, request: &Request, target: &Target) -> Response {
    let content_type = mime::content_type_for(Path::new(&request.path));

    match state.cache.lookup(&target.key).await {
        Ok(Some(data)) => {
            debug!(key = %target.key, "Served from cache");
            return Response::ok(content_type, data);
        }
        Ok(None) => {}
        Err(e) => {
            warn!(key = %target.key, error = %e, "Cache read failed, falling back to origin");
        }
    }

    let data = match state.origin.read_file(target).await {
        Ok(data) => data,
        // Deleted between resolution and read
        Err(OriginError::NotFound(_)) => return Response::error(Status::NotFound),
        Err(e) => {
            error!(key = %target.key, error = %e, "Failed to read file from origin");
            return Response::error(Status::InternalServerError);
        }
    };

    if let Err(e) = state.cache.put(&target.key, &data).await {
        warn!(key = %target.key, error = %e, "Failed to cache file");
        if state.config.cache_write_required {
            return Response::error(Status::InternalServerError);
        }
    }

    debug!(key = %target.key, size = data.len(), "Served from origin");
    Response::ok(content_type, data)
}
