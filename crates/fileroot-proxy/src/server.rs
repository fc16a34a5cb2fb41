//! Connection dispatcher
//!
//! Accepted connections go onto a bounded queue drained by a fixed pool of
//! workers. When the queue is full the connection is answered with 503 and
//! closed. Expired cache entries are swept by an independent periodic task.

use crate::config::Config;
use crate::handler;
use crate::origin::Origin;
use crate::response::{Response, Status};
use chrono::{DateTime, Utc};
use file_blob_cache::BlobCache;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Shared state for every connection
pub struct ServerState {
    pub cache: BlobCache,
    pub origin: Origin,
    pub config: Config,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(cache: BlobCache, origin: Origin, config: Config) -> Self {
        Self {
            cache,
            origin,
            config,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

type ConnectionQueue = Arc<Mutex<mpsc::Receiver<TcpStream>>>;

pub struct Server {
    listener: TcpListener,
    state: SharedState,
}

impl Server {
    pub async fn bind(state: SharedState, addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the worker pool goes away
    pub async fn run(self) -> io::Result<()> {
        let config = &self.state.config;
        let (tx, rx) = mpsc::channel::<TcpStream>(config.accept_queue);
        let queue: ConnectionQueue = Arc::new(Mutex::new(rx));

        for id in 0..config.workers {
            tokio::spawn(worker(id, self.state.clone(), queue.clone()));
        }
        tokio::spawn(sweeper(self.state.clone()));

        info!(
            workers = config.workers,
            accept_queue = config.accept_queue,
            sweep_interval_secs = config.sweep_interval.as_secs(),
            "Dispatcher started"
        );

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    // Usually descriptor exhaustion; back off instead of spinning
                    sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            debug!(peer = %peer, "Accepted connection");

            match tx.try_send(stream) {
                Ok(()) => {}
                Err(TrySendError::Full(stream)) => {
                    warn!(peer = %peer, "Accept queue full, rejecting connection");
                    reject_busy(stream).await;
                }
                Err(TrySendError::Closed(_)) => {
                    error!("Worker pool stopped");
                    return Err(io::Error::other("worker pool stopped"));
                }
            }

            if config.sweep_on_accept {
                sweep_once(&self.state).await;
            }
        }
    }
}

async fn worker(id: usize, state: SharedState, queue: ConnectionQueue) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(stream) = next else {
            break;
        };
        handler::handle_connection(&state, stream).await;
    }
    debug!(worker = id, "Worker stopped");
}

async fn reject_busy(mut stream: TcpStream) {
    let response = Response::error(Status::ServiceUnavailable);
    if let Err(e) = stream.write_all(&response.to_bytes()).await {
        debug!(error = %e, "Failed to write busy response");
    }
    let _ = stream.shutdown().await;
}

async fn sweeper(state: SharedState) {
    let mut ticker = interval(state.config.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        sweep_once(&state).await;
    }
}

async fn sweep_once(state: &ServerState) {
    match state.cache.sweep_expired().await {
        Ok(removed) => {
            let stats = state.cache.stats();
            debug!(
                removed,
                hits = stats.hits,
                misses = stats.misses,
                writes = stats.writes,
                write_failures = stats.write_failures,
                uptime_secs = (Utc::now() - state.started_at).num_seconds(),
                "Cache sweep complete"
            );
        }
        Err(e) => warn!(error = %e, "Cache sweep failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};
    use tokio::io::AsyncReadExt;

    struct Running {
        addr: SocketAddr,
        state: SharedState,
        root: TempDir,
        _cache_dir: TempDir,
    }

    async fn start(configure: impl FnOnce(&mut Config)) -> Running {
        let root = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();

        let mut config = Config {
            web_root: root.path().to_path_buf(),
            cache_dir: cache_dir.path().to_path_buf(),
            workers: 4,
            ..Config::default()
        };
        configure(&mut config);

        let cache = BlobCache::new(cache_dir.path(), config.cache_ttl);
        cache.init().await.unwrap();
        let origin = Origin::new(root.path()).await.unwrap();
        let state: SharedState = Arc::new(ServerState::new(cache, origin, config));

        let server = Server::bind(state.clone(), SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        Running {
            addr,
            state,
            root,
            _cache_dir: cache_dir,
        }
    }

    fn write(root: &Path, name: &str, data: &[u8]) {
        let path = root.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    async fn send(addr: SocketAddr, raw: &str) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        response
    }

    fn split(response: &[u8]) -> (String, Vec<u8>) {
        let end = response
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("response has a header terminator");
        (
            String::from_utf8(response[..end].to_vec()).unwrap(),
            response[end + 4..].to_vec(),
        )
    }

    #[tokio::test]
    async fn test_file_is_cached_after_first_request() {
        let server = start(|_| {}).await;
        write(server.root.path(), "style.css", b"h1 { color: teal }");

        let first = send(server.addr, "GET /style.css HTTP/1.1\r\n\r\n").await;
        let (head, body) = split(&first);
        assert!(head.starts_with("HTTP/1.1 200 OK"));
        assert!(head.contains("Content-Type: text/css"));
        assert!(head.contains("Content-Length: 18"));
        assert_eq!(body, b"h1 { color: teal }");
        assert_eq!(server.state.origin.reads(), 1);
        assert!(server.state.cache.exists("style.css").await);

        let second = send(server.addr, "GET /style.css HTTP/1.1\r\n\r\n").await;
        assert_eq!(second, first);
        assert_eq!(server.state.origin.reads(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_returns_404() {
        let server = start(|_| {}).await;

        let response = send(server.addr, "GET /missing.html HTTP/1.1\r\n\r\n").await;
        let (head, body) = split(&response);
        assert!(head.starts_with("HTTP/1.1 404 File Not Found"));
        assert!(String::from_utf8(body).unwrap().contains("404"));
    }

    #[tokio::test]
    async fn test_unknown_verb_returns_400() {
        let server = start(|_| {}).await;

        let response = send(server.addr, "XYZ / HTTP/1.1\r\n\r\n").await;
        let (head, body) = split(&response);
        assert!(head.starts_with("HTTP/1.1 400 Bad Request"));
        assert!(String::from_utf8(body).unwrap().contains("400"));
    }

    #[tokio::test]
    async fn test_empty_connection_returns_400() {
        let server = start(|_| {}).await;

        let mut stream = TcpStream::connect(server.addr).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();

        assert!(String::from_utf8(response).unwrap().contains("400 Bad Request"));
    }

    #[tokio::test]
    async fn test_request_line_ended_by_eof_is_served() {
        let server = start(|_| {}).await;
        write(server.root.path(), "a.txt", b"plain");

        let mut stream = TcpStream::connect(server.addr).await.unwrap();
        stream.write_all(b"GET /a.txt HTTP/1.1").await.unwrap();
        stream.shutdown().await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();

        let (head, body) = split(&response);
        assert!(head.starts_with("HTTP/1.1 200 OK"));
        assert_eq!(body, b"plain");
    }

    #[tokio::test]
    async fn test_oversized_request_line_returns_400() {
        let server = start(|_| {}).await;

        let raw = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(9 * 1024));
        let response = send(server.addr, &raw).await;
        assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 400 Bad Request"));
        assert_eq!(server.state.origin.reads(), 0);
    }

    #[tokio::test]
    async fn test_root_listing() {
        let server = start(|_| {}).await;
        write(server.root.path(), "a.txt", b"a");
        write(server.root.path(), "b/nested.txt", b"n");

        let response = send(server.addr, "GET / HTTP/1.1\r\n\r\n").await;
        let (head, body) = split(&response);
        let html = String::from_utf8(body).unwrap();

        assert!(head.starts_with("HTTP/1.1 200 OK"));
        assert!(head.contains("Content-Type: text/html; charset=UTF-8"));
        assert!(html.contains(">a.txt<"));
        assert!(html.contains(">b/<"));
        assert!(!html.contains("nested.txt"));
    }

    #[tokio::test]
    async fn test_traversal_is_forbidden() {
        let server = start(|_| {}).await;

        let response = send(server.addr, "GET /../../etc/passwd HTTP/1.1\r\n\r\n").await;
        assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 403 Forbidden"));
        assert_eq!(server.state.origin.reads(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_with_503() {
        let server = start(|config| {
            config.workers = 1;
            config.accept_queue = 1;
        })
        .await;

        // Occupies the only worker until it times out
        let _busy = TcpStream::connect(server.addr).await.unwrap();
        sleep(Duration::from_millis(200)).await;
        // Fills the only queue slot
        let _queued = TcpStream::connect(server.addr).await.unwrap();
        sleep(Duration::from_millis(200)).await;

        let mut rejected = TcpStream::connect(server.addr).await.unwrap();
        let mut response = Vec::new();
        rejected.read_to_end(&mut response).await.unwrap();

        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 503 Service Unavailable"));
        assert!(text.contains("503"));
    }

    #[tokio::test]
    async fn test_sweep_on_accept_removes_expired_entries() {
        let server = start(|config| {
            config.cache_ttl = Duration::from_millis(100);
            config.sweep_interval = Duration::from_secs(3600);
            config.sweep_on_accept = true;
        })
        .await;

        // The periodic sweeper fires once at startup; let it pass first
        sleep(Duration::from_millis(50)).await;
        server.state.cache.put("stale.txt", b"old").await.unwrap();
        sleep(Duration::from_millis(300)).await;
        assert!(server.state.cache.exists("stale.txt").await);

        send(server.addr, "GET /missing HTTP/1.1\r\n\r\n").await;

        let mut swept = false;
        for _ in 0..20 {
            if !server.state.cache.exists("stale.txt").await {
                swept = true;
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }
        assert!(swept);
    }

    #[tokio::test]
    async fn test_periodic_sweep_removes_expired_entries() {
        let server = start(|config| {
            config.cache_ttl = Duration::from_millis(100);
            config.sweep_interval = Duration::from_millis(200);
        })
        .await;

        server.state.cache.put("stale.txt", b"old").await.unwrap();

        let mut swept = false;
        for _ in 0..40 {
            sleep(Duration::from_millis(50)).await;
            if !server.state.cache.exists("stale.txt").await {
                swept = true;
                break;
            }
        }
        assert!(swept);
        assert!(server.state.cache.stats().swept >= 1);
    }
}
