//! LDT1 daemon: accept loop and per-connection request dispatcher.
//!
//! Each connection is a loop of one request, its response(s), and the next
//! request. A clean disconnect between requests ends the loop quietly; any
//! other failure is reported to the peer as a single ERR packet and the
//! connection is closed.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::codec::{read_packet, write_packet, Packet};
use crate::config::ServerConfig;
use crate::error::LdtError;
use crate::listing;
use crate::logger::{Logger, NoopLogger, TextLogger};
use crate::protocol::{frame, timeouts};
use crate::sandbox::Sandbox;
use crate::streamer::{self, ByteRange};

/// Everything a connection handler needs; cheap to clone per connection.
#[derive(Clone)]
pub struct ServerContext {
    pub sandbox: Arc<Sandbox>,
    pub idle_timeout: Duration,
    pub write_timeout: Duration,
    pub logger: Arc<dyn Logger>,
}

impl ServerContext {
    pub fn new(sandbox: Sandbox) -> Self {
        Self {
            sandbox: Arc::new(sandbox),
            idle_timeout: timeouts::ms(timeouts::IDLE_MS),
            write_timeout: timeouts::ms(timeouts::WRITE_BASE_MS),
            logger: Arc::new(NoopLogger),
        }
    }

    pub fn from_config(cfg: &ServerConfig) -> Result<Self> {
        let sandbox = Sandbox::new(&cfg.root)
            .with_context(|| format!("Failed to open root directory: {}", cfg.root.display()))?;
        // Choose logger once; zero overhead in hot paths with NoopLogger
        let logger: Arc<dyn Logger> = match cfg.log_file {
            Some(ref p) => match TextLogger::new(p) {
                Ok(l) => Arc::new(l),
                Err(e) => {
                    warn!(path = %p.display(), error = %e, "request log disabled");
                    Arc::new(NoopLogger)
                }
            },
            None => Arc::new(NoopLogger),
        };
        Ok(Self {
            sandbox: Arc::new(sandbox),
            idle_timeout: cfg.idle_timeout(),
            write_timeout: cfg.write_timeout(),
            logger,
        })
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }
}

/// Bind the configured address and serve forever.
pub async fn serve(cfg: &ServerConfig) -> Result<()> {
    let ctx = ServerContext::from_config(cfg)?;
    let bind = cfg.bind_addr();
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {}", bind))?;
    serve_listener(listener, ctx, cfg.max_connections).await
}

/// Serve on an already bound listener, at most `max_connections` at a time.
pub async fn serve_listener(
    listener: TcpListener,
    ctx: ServerContext,
    max_connections: usize,
) -> Result<()> {
    let permits = Arc::new(Semaphore::new(max_connections.max(1)));
    info!(
        addr = %listener.local_addr()?,
        root = %ctx.sandbox.root().display(),
        max_connections,
        "ldtd listening"
    );
    loop {
        // Hold off accepting until a slot is free
        let permit = permits.clone().acquire_owned().await?;
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };
        let _ = stream.set_nodelay(true);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer, &ctx).await;
            drop(permit);
        });
    }
}

/// Serve one connection until the peer leaves or a request fails.
/// Returns the number of requests answered successfully.
pub async fn handle_connection<S>(mut stream: S, peer: SocketAddr, ctx: &ServerContext) -> u64
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!(%peer, "connection opened");
    ctx.logger.connected(peer);

    let mut served = 0u64;
    let outcome = loop {
        let req = match read_packet(&mut stream, ctx.idle_timeout).await {
            Ok(p) => p,
            Err(e) if e.is_disconnect() => break Ok(()),
            Err(e) => break Err(e),
        };
        if let Err(e) = dispatch(&mut stream, peer, req, ctx).await {
            break Err(e);
        }
        served += 1;
    };

    if let Err(e) = outcome {
        let msg = e.to_string();
        warn!(%peer, error = %msg, "request failed; closing connection");
        ctx.logger.error(peer, &msg);
        let _ = write_packet(&mut stream, frame::ERR, msg.as_bytes(), ctx.write_timeout).await;
    }
    let _ = stream.shutdown().await;
    debug!(%peer, requests = served, "connection closed");
    ctx.logger.disconnected(peer, served);
    served
}

async fn dispatch<S>(
    stream: &mut S,
    peer: SocketAddr,
    req: Packet,
    ctx: &ServerContext,
) -> crate::error::Result<()>
where
    S: AsyncWrite + Unpin,
{
    match req.kind {
        frame::LIST => {
            let path = req.text().replace('\\', "/");
            let sandbox = ctx.sandbox.clone();
            let dir = path.clone();
            let items = tokio::task::spawn_blocking(move || listing::list(&sandbox, &dir))
                .await
                .map_err(|e| {
                    LdtError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
                })?;
            let body = listing::encode_records(&items);
            write_packet(stream, frame::LIST_RESP, body.as_bytes(), ctx.write_timeout).await?;
            debug!(%peer, path = %path, entries = items.len(), "LIST");
            ctx.logger.list(peer, &path, items.len());
        }
        frame::GET => {
            let range = ByteRange::parse(&req.text())?;
            let summary = streamer::stream(&ctx.sandbox, &range, stream, ctx.write_timeout).await?;
            debug!(
                %peer,
                path = %range.path,
                start = summary.start,
                end = summary.end,
                bytes = summary.sent,
                "GET"
            );
            ctx.logger
                .get(peer, &range.path, summary.start, summary.end, summary.sent);
        }
        other => {
            return Err(LdtError::Protocol(format!(
                "unexpected request type 0x{:02x} ({})",
                other,
                frame::name(other)
            )));
        }
    }
    Ok(())
}
