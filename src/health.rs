//! Small synchronous HTTP endpoint for health checks and Prometheus scrapes
//!
//! Routes: `/health`, `/ready`, `/metrics`. One request per connection,
//! handled on the accept thread.

use crate::metrics::Metrics;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A response before it is framed as HTTP/1.1
#[derive(Debug, PartialEq, Eq)]
struct Reply {
    status: u16,
    content_type: &'static str,
    body: String,
}

impl Reply {
    fn new(status: u16, content_type: &'static str, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
        }
    }

    fn status_text(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => "Unknown",
        }
    }
}

/// Health server state
pub struct HealthServer {
    metrics: Arc<Metrics>,
    ready: AtomicBool,
    running: AtomicBool,
}

impl HealthServer {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            metrics,
            ready: AtomicBool::new(false),
            running: AtomicBool::new(true),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Bind `addr` and serve until [`stop`](Self::stop) (blocking, run in separate thread)
    pub fn run(&self, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr)?;
        self.serve(listener)
    }

    pub fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        listener.set_nonblocking(true)?;
        let local: Option<SocketAddr> = listener.local_addr().ok();
        info!(addr = ?local, "Health server listening");

        while self.running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = self.handle_connection(stream) {
                        debug!(%peer, error = %e, "Health connection error");
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    error!(error = %e, "Health server accept error");
                }
            }
        }

        info!("Health server stopped");
        Ok(())
    }

    fn handle_connection(&self, mut stream: TcpStream) -> std::io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;

        let mut request_line = String::new();
        BufReader::new(&stream).read_line(&mut request_line)?;

        let reply = self.route(&request_line);
        let response = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            reply.status,
            reply.status_text(),
            reply.content_type,
            reply.body.len(),
            reply.body
        );
        stream.write_all(response.as_bytes())?;
        stream.flush()
    }

    /// Parse simple HTTP request: "GET /path HTTP/1.1"
    fn route(&self, request_line: &str) -> Reply {
        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
            return Reply::new(400, "text/plain", "Bad Request");
        };
        if method != "GET" {
            return Reply::new(405, "text/plain", "Method Not Allowed");
        }

        match path {
            "/health" | "/healthz" => {
                Reply::new(200, "application/json", r#"{"status":"healthy"}"#)
            }
            "/ready" | "/readyz" if self.is_ready() => {
                Reply::new(200, "application/json", r#"{"status":"ready"}"#)
            }
            "/ready" | "/readyz" => {
                Reply::new(503, "application/json", r#"{"status":"not ready"}"#)
            }
            "/metrics" => match self.metrics.gather() {
                Ok(body) => Reply::new(200, "text/plain; version=0.0.4", body),
                Err(e) => {
                    error!(error = %e, "Failed to encode metrics");
                    Reply::new(500, "text/plain", "metrics unavailable")
                }
            },
            _ => Reply::new(404, "text/plain", "Not Found"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn server() -> HealthServer {
        HealthServer::new(Arc::new(Metrics::new().unwrap()))
    }

    #[test]
    fn test_ready_state() {
        let server = server();
        assert_eq!(server.route("GET /ready HTTP/1.1\r\n").status, 503);
        server.set_ready(true);
        assert_eq!(server.route("GET /readyz HTTP/1.1\r\n").status, 200);
    }

    #[test]
    fn test_routes() {
        let server = server();
        assert_eq!(server.route("GET /health HTTP/1.1").status, 200);
        assert_eq!(server.route("POST /health HTTP/1.1").status, 405);
        assert_eq!(server.route("GET /nope HTTP/1.1").status, 404);
        assert_eq!(server.route("garbage").status, 400);

        let metrics = server.route("GET /metrics HTTP/1.1");
        assert_eq!(metrics.status, 200);
        assert!(metrics.body.contains("lodecache_active_connections"));
    }

    #[test]
    fn test_serves_over_tcp() {
        let server = Arc::new(server());
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let runner = Arc::clone(&server);
        let handle = std::thread::spawn(move || runner.serve(listener));

        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(b"GET /health HTTP/1.1\r\n\r\n").unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with(r#"{"status":"healthy"}"#));

        server.stop();
        handle.join().unwrap().unwrap();
    }
}
