//! TCP front end for the memcached text protocol
//!
//! The accept loop only admits or turns away sockets; everything after
//! admission lives in [`connection`]. On cancellation the listener is dropped
//! first and then the server waits for open connections to hand back their
//! permits, so a caller that shuts the cache down afterwards never races a
//! command still in flight.

mod connection;
pub mod handler;

use crate::cache::CacheEngine;
use crate::config::ServerConfig;
use crate::metrics::Metrics;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long shutdown waits for open connections to finish
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

pub struct Server {
    pub(crate) config: ServerConfig,
    pub(crate) engine: Arc<CacheEngine>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) cancel_token: CancellationToken,
    permits: Arc<Semaphore>,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        engine: Arc<CacheEngine>,
        metrics: Arc<Metrics>,
        cancel_token: CancellationToken,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_connections));
        Self {
            config,
            engine,
            metrics,
            cancel_token,
            permits,
        }
    }

    /// Bind the configured address and serve until cancelled
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let addr: SocketAddr = self.config.listen_addr.parse()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve an already bound listener until cancelled, then drain
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        info!(
            addr = %listener.local_addr()?,
            max_connections = self.config.max_connections,
            "Server listening"
        );

        while let Some(accepted) = self.next_connection(&listener).await {
            match accepted {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(e) => {
                    error!(error = %e, "Accept error");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }

        drop(listener);
        self.drain().await;
        Ok(())
    }

    /// Next accepted socket, or `None` once shutdown has been requested
    async fn next_connection(
        &self,
        listener: &TcpListener,
    ) -> Option<io::Result<(TcpStream, SocketAddr)>> {
        tokio::select! {
            biased;
            () = self.cancel_token.cancelled() => None,
            accepted = listener.accept() => Some(accepted),
        }
    }

    /// Hand the socket to its own task, or close it when every slot is taken
    fn admit(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            self.metrics.rejected_connections.inc();
            warn!(
                %peer,
                limit = self.config.max_connections,
                "Connection limit reached, rejecting"
            );
            return;
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
        }
        self.metrics.total_connections.inc();
        self.metrics.active_connections.inc();
        debug!(%peer, "Accepted connection");

        let server = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = connection::handle(server, stream, permit).await {
                debug!(%peer, error = %e, "Connection error");
            }
        });
    }

    /// Wait until every admitted connection has released its permit
    async fn drain(&self) {
        let Ok(all) = u32::try_from(self.config.max_connections) else {
            warn!("Connection limit too large to drain, skipping");
            return;
        };
        info!(
            open = self.metrics.active_connections.get(),
            "Server shutting down, draining connections"
        );

        match tokio::time::timeout(DRAIN_TIMEOUT, self.permits.acquire_many(all)).await {
            Ok(Ok(_permits)) => info!("All connections closed"),
            Ok(Err(_)) => warn!("Connection permits closed while draining"),
            Err(_) => warn!(
                open = self.metrics.active_connections.get(),
                "Timed out waiting for connections to close"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EventBus;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    async fn spawn_server(
        config: ServerConfig,
    ) -> (
        SocketAddr,
        Arc<Metrics>,
        CancellationToken,
        tokio::task::JoinHandle<anyhow::Result<()>>,
    ) {
        let engine = Arc::new(CacheEngine::new(EventBus::new()));
        let metrics = Arc::new(Metrics::new().unwrap());
        let cancel = CancellationToken::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(Server::new(config, engine, metrics.clone(), cancel.clone()));
        (addr, metrics, cancel, tokio::spawn(server.serve(listener)))
    }

    async fn stored(stream: &mut TcpStream) {
        stream.write_all(b"set k 0 0 1\r\nv\r\n").await.unwrap();
        let mut reply = [0u8; 8];
        stream.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"STORED\r\n");
    }

    #[tokio::test]
    async fn test_connections_over_limit_are_closed() {
        let config = ServerConfig {
            max_connections: 1,
            ..ServerConfig::default()
        };
        let (addr, metrics, cancel, _task) = spawn_server(config).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        stored(&mut first).await;

        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut rest = Vec::new();
        timeout(Duration::from_secs(5), second.read_to_end(&mut rest))
            .await
            .expect("rejected socket was not closed")
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(metrics.rejected_connections.get(), 1);
        assert_eq!(metrics.active_connections.get(), 1);

        // the admitted connection keeps working
        stored(&mut first).await;
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_cancel_drains_open_connections() {
        let (addr, metrics, cancel, task) = spawn_server(ServerConfig::default()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        stored(&mut client).await;
        assert_eq!(metrics.active_connections.get(), 1);

        cancel.cancel();
        timeout(Duration::from_secs(5), task)
            .await
            .expect("server did not finish draining")
            .unwrap()
            .unwrap();
        assert_eq!(metrics.active_connections.get(), 0);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
