use crate::cluster::SharedCluster;
use crate::config::ClusterConfig;
use crate::error::ProxyError;
use crate::monitor::SharedMetrics;
use crate::policy::{self, CommandClass, LocalCommand};
use crate::reply;
use crate::resp::{Request, RequestDecoder, RespValue};
use bytes::BytesMut;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error};

/// Everything a session shares with the other sessions of its listener.
#[derive(Clone)]
pub struct ProxyContext {
    pub config: Arc<ClusterConfig>,
    pub cluster: SharedCluster,
    pub metrics: SharedMetrics,
}

enum Flow {
    Continue,
    Close,
}

/// One client connection. Requests are answered strictly in arrival order.
pub struct Session<S> {
    stream: S,
    peer: String,
    buf: BytesMut,
    decoder: RequestDecoder,
    out: Vec<u8>,
    ctx: ProxyContext,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: impl Into<String>, ctx: ProxyContext) -> Self {
        Session {
            stream,
            peer: peer.into(),
            buf: BytesMut::with_capacity(4096),
            decoder: RequestDecoder::new(),
            out: Vec::with_capacity(4096),
            ctx,
        }
    }

    /// Serve requests until the client leaves, the transport fails or the
    /// client breaks framing, then close the connection.
    pub async fn run(mut self) {
        debug!(peer = %self.peer, "connection opened");
        if let Err(e) = self.serve().await {
            debug!(peer = %self.peer, error = %e, "connection error");
        }
        let _ = self.stream.flush().await;
        let _ = self.stream.shutdown().await;
        debug!(peer = %self.peer, "connection closed");
    }

    async fn serve(&mut self) -> io::Result<()> {
        loop {
            // Drain every complete request already buffered before reading more.
            loop {
                match self.decoder.decode(&mut self.buf) {
                    Ok(Some(request)) => {
                        if let Flow::Close = self.handle(request).await? {
                            return Ok(());
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(peer = %self.peer, error = %e, "protocol error");
                        let reply = RespValue::error(format!("ERR Protocol error: {e}"));
                        let _ = self.write_reply(&reply).await;
                        return Ok(());
                    }
                }
            }

            let read_timeout = self.ctx.config.read_timeout;
            let n = with_timeout(read_timeout, self.stream.read_buf(&mut self.buf)).await?;
            if n == 0 {
                return Ok(());
            }
        }
    }

    async fn handle(&mut self, request: Request) -> io::Result<Flow> {
        let started = Instant::now();
        let command = request.command_name();

        let reply = match policy::classify(&command) {
            CommandClass::Local(LocalCommand::Quit) => return Ok(Flow::Close),
            CommandClass::Local(LocalCommand::Ping) => RespValue::pong(),
            CommandClass::Forbidden => {
                debug!(peer = %self.peer, command = %command, "rejected forbidden command");
                RespValue::error(ProxyError::Forbidden(command.clone()).to_resp_error())
            }
            CommandClass::PassThrough => self.forward(&command, request).await,
        };

        self.write_reply(&reply).await?;
        self.ctx.metrics.record(&self.ctx.config.name, started.elapsed());
        Ok(Flow::Continue)
    }

    /// Prefix, execute and encode one request. A panic or an unencodable
    /// backend reply becomes an error reply for this request only.
    async fn forward(&self, command: &str, request: Request) -> RespValue {
        let ctx = &self.ctx;
        let attempt = AssertUnwindSafe(async {
            let mut args = request.into_args();
            policy::prefix_key(ctx.config.prefix(), &mut args);
            let result = ctx.cluster.execute(command, &args).await;
            reply::encode(command, result)
        })
        .catch_unwind()
        .await;

        match attempt {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                error!(peer = %self.peer, command, error = %e, "bad backend reply");
                RespValue::error(e.to_resp_error())
            }
            Err(panic) => {
                error!(
                    peer = %self.peer,
                    command,
                    panic = %panic_message(&*panic),
                    "request processing panicked"
                );
                RespValue::error(ProxyError::Internal(command.to_string()).to_resp_error())
            }
        }
    }

    /// Serialize the whole reply, then write and flush it in one go.
    async fn write_reply(&mut self, reply: &RespValue) -> io::Result<()> {
        self.out.clear();
        reply.write_to(&mut self.out);
        let write_timeout = self.ctx.config.write_timeout;
        let stream = &mut self.stream;
        let out = &self.out;
        with_timeout(write_timeout, async move {
            stream.write_all(out).await?;
            stream.flush().await
        })
        .await
    }
}

/// Await `fut`, failing with `TimedOut` if a limit is set and exceeded.
async fn with_timeout<T>(
    limit: Option<Duration>,
    fut: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "client i/o timed out"))?,
        None => fut.await,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
