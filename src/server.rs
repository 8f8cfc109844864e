use crate::session::{ProxyContext, Session};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Bind `addr` with the configured accept backlog.
pub async fn bind(addr: &str, backlog: u32) -> io::Result<TcpListener> {
    let resolved = tokio::net::lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("cannot resolve {addr}")))?;
    let socket = match resolved {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(resolved)?;
    socket.listen(backlog)
}

/// Accept connections until `shutdown` fires.
///
/// Accepted sockets go through a bounded intake queue to a single dispatcher
/// that spawns one session task per connection. The dispatcher holds a permit
/// per live session, so once `client_connections` sessions are resident it
/// stops draining, the queue fills and accepting blocks.
pub async fn run_listener(
    listener: TcpListener,
    ctx: ProxyContext,
    shutdown: CancellationToken,
) -> io::Result<()> {
    let name = ctx.config.name.clone();
    let capacity = ctx.config.client_connections.max(1);
    info!(cluster = %name, addr = %listener.local_addr()?, "proxy listening");

    let (intake_tx, intake_rx) = mpsc::channel::<(TcpStream, SocketAddr)>(capacity);
    let dispatcher = tokio::spawn(dispatch(intake_rx, ctx, capacity));

    let mut failures = 0u32;
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        failures = 0;
                        let _ = stream.set_nodelay(true);
                        if intake_tx.send((stream, peer)).await.is_err() {
                            error!(cluster = %name, "dispatcher stopped, closing listener");
                            break;
                        }
                    }
                    Err(e) => {
                        // Usually EMFILE/ENFILE.
                        failures = failures.saturating_add(1);
                        let delay = accept_backoff(failures);
                        error!(cluster = %name, error = %e, retry_in = ?delay, "accept error");
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = shutdown.cancelled() => break,
                        }
                    }
                }
            }
            _ = shutdown.cancelled() => {
                info!(cluster = %name, "listener shutting down");
                break;
            }
        }
    }

    // Live sessions are not drained; they end with the process.
    drop(intake_tx);
    dispatcher.abort();
    Ok(())
}

/// Delay before retrying after `failures` consecutive accept errors.
fn accept_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_BASE
        .saturating_mul(1 << exponent)
        .min(ACCEPT_BACKOFF_MAX)
}

async fn dispatch(
    mut intake: mpsc::Receiver<(TcpStream, SocketAddr)>,
    ctx: ProxyContext,
    capacity: usize,
) {
    let permits = Arc::new(Semaphore::new(capacity));
    while let Some((stream, peer)) = intake.recv().await {
        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        debug!(peer = %peer, "dispatching connection");
        let session = Session::new(stream, peer.to_string(), ctx.clone());
        tokio::spawn(async move {
            session.run().await;
            drop(permit);
        });
    }
}
