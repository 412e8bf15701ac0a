//! Connection handling for individual client connections
//!
//! Commands are executed strictly in the order they are decoded. Any decode
//! failure or error result ends the connection once the error line has been
//! written: the stream position can no longer be trusted.

use super::Server;
use super::handler;
use crate::protocol::{CacheResult, Command, Decoder, ResponseWriter};
use bytes::BytesMut;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, error};

/// Handle a single client connection
pub async fn handle(
    server: Arc<Server>,
    mut stream: TcpStream,
    _permit: OwnedSemaphorePermit,
) -> anyhow::Result<()> {
    let result = serve(&server, &mut stream).await;
    server.metrics.active_connections.dec();
    result
}

async fn serve(server: &Server, stream: &mut TcpStream) -> anyhow::Result<()> {
    let mut read_buf = BytesMut::with_capacity(server.config.read_buffer_size);
    let mut response = ResponseWriter::new(server.config.write_buffer_size);
    let mut decoder = Decoder::new(server.config.max_item_size);
    let idle_secs = server.config.idle_timeout_secs;
    let idle_timeout = (idle_secs > 0).then(|| Duration::from_secs(idle_secs));

    loop {
        let read = tokio::select! {
            _ = server.cancel_token.cancelled() => {
                return Ok(());
            }
            result = read_some(stream, &mut read_buf, idle_timeout) => result,
        };

        match read {
            Ok(Some(0)) => {
                // Connection closed
                return Ok(());
            }
            Ok(Some(n)) => {
                server.metrics.bytes_read.inc_by(n as u64);
            }
            Ok(None) => {
                server.metrics.idle_timeouts.inc();
                debug!("Closing idle connection");
                return Ok(());
            }
            Err(e) => {
                debug!(error = %e, "Read error");
                return Ok(());
            }
        }

        let close = process_buffer(server, &mut decoder, &mut read_buf, &mut response);

        if !response.is_empty() {
            server
                .metrics
                .bytes_written
                .inc_by(response.buffer().len() as u64);
            stream.write_all(response.buffer()).await?;
            response.clear();
        }

        if close {
            stream.shutdown().await?;
            return Ok(());
        }
    }
}

/// Read once, giving up after `idle_timeout`. `Ok(None)` means the timeout fired.
async fn read_some(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    idle_timeout: Option<Duration>,
) -> std::io::Result<Option<usize>> {
    match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, stream.read_buf(buf)).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        },
        None => stream.read_buf(buf).await.map(Some),
    }
}

/// Execute every complete command in `read_buf`, encoding replies into
/// `response`. Returns true if the connection must be closed.
fn process_buffer(
    server: &Server,
    decoder: &mut Decoder,
    read_buf: &mut BytesMut,
    response: &mut ResponseWriter,
) -> bool {
    loop {
        match decoder.decode_next(read_buf) {
            Ok(Some(cmd)) => {
                let noreply = cmd.is_noreply();
                let result = dispatch(server, cmd);
                let failed = matches!(result, CacheResult::Error { .. });
                if !noreply || failed {
                    response.write_result(&result);
                }
                if failed {
                    return true;
                }
            }
            Ok(None) => return false,
            Err(e) => {
                server.metrics.protocol_errors.inc();
                debug!(error = %e, "Closing connection after protocol error");
                response.write_result(&CacheResult::from(&e));
                return true;
            }
        }
    }
}

fn dispatch(server: &Server, cmd: Command) -> CacheResult {
    handler::record(&server.metrics, &cmd);
    let name = cmd.name();
    let timer = server.metrics.cmd_latency.start_timer();

    let result = panic::catch_unwind(AssertUnwindSafe(|| handler::execute(&server.engine, cmd)))
        .unwrap_or_else(|_| {
            error!(command = name, "Command execution panicked");
            server.metrics.server_errors.inc();
            CacheResult::server_error("internal error")
        });

    timer.observe_duration();
    result
}
