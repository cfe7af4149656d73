//! HTTP CONNECT tunnel handler.
//!
//! Handles `CONNECT host:port HTTP/1.1` requests by:
//! 1. Parsing the target authority
//! 2. Warning when the host was never reached over plain HTTP
//! 3. Establishing a TCP connection to the target
//! 4. Returning `200 Connection Established`
//! 5. Relaying bytes in both directions until either side finishes
//!
//! The proxy never terminates TLS, so tunnelled indexer traffic cannot be
//! rewritten. Failures before the handshake close the client connection
//! without a response.

use crate::audit;
use crate::error::{ProxyError, Result};
use crate::registry::HostRegistry;
use crate::request::ParsedRequestLine;
use crate::timeouts;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Handshake sent once the target connection is up.
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Chunk size for each relay read.
const RELAY_CHUNK: usize = 8192;

/// Shared context passed from the server to the tunnel handler.
pub struct TunnelCtx<'a> {
    /// Hosts known to be reachable over plain HTTP (read only here)
    pub registry: &'a HostRegistry,
    /// Timeout for the target TCP connect
    pub connect_timeout: Duration,
    /// Idle timeout for every relay read and write
    pub io_timeout: Option<Duration>,
}

/// Handle an HTTP CONNECT request.
///
/// `request` is the initial segment beginning with the CONNECT line.
pub async fn handle_connect(
    request: &str,
    stream: &mut TcpStream,
    ctx: &TunnelCtx<'_>,
) -> Result<()> {
    let (host, port) = parse_connect_target(request)?;
    debug!("CONNECT request to {}:{}", host, port);

    let known_host = !warn_if_unknown_host(ctx.registry, &host);

    let mut upstream = match timeouts::connect(&host, port, ctx.connect_timeout).await {
        Ok(s) => s,
        Err(e) => {
            warn!("Failed to connect to target {}:{}: {}", host, port, e);
            audit::log_failed(audit::ProxyMode::Tunnel, &host, port, &e.to_string());
            return Err(ProxyError::UpstreamConnect {
                host,
                reason: e.to_string(),
            });
        }
    };

    timeouts::idle(ctx.io_timeout, "handshake write", async {
        stream.write_all(CONNECTION_ESTABLISHED).await?;
        stream.flush().await
    })
    .await?;
    audit::log_tunnel_opened(&host, port, known_host);

    let (client_read, client_write) = stream.split();
    let (target_read, target_write) = upstream.split();
    let outcome = relay(
        client_read,
        client_write,
        target_read,
        target_write,
        ctx.io_timeout,
    )
    .await;

    audit::log_tunnel_closed(&host, port, outcome.to_target, outcome.to_client);
    match outcome.error {
        Some(e) => Err(ProxyError::Relay(e)),
        None => Ok(()),
    }
}

/// Warn that `host` must be configured as `http://` unless it has already
/// been reached over plain HTTP. Returns whether the warning fired.
///
/// Tunnels never register their host: only plain HTTP reaches the gateway.
fn warn_if_unknown_host(registry: &HostRegistry, host: &str) -> bool {
    if registry.contains(host) {
        return false;
    }
    warn!(
        "IMPORTANT! Indexer {} needs to be set to http:// instead of https://. \
         Umlaut search adaptation will not work for {}!",
        host, host
    );
    true
}

/// Parse the target host and port from a CONNECT request.
///
/// Expected format: "CONNECT host:port HTTP/1.1". A missing colon or a
/// non-numeric port is an error; there is no default port.
fn parse_connect_target(request: &str) -> Result<(String, u16)> {
    let line = ParsedRequestLine::parse(request)?;
    let authority = line.target.as_str();

    let (host, port_str) = authority.rsplit_once(':').ok_or_else(|| {
        ProxyError::HttpParse(format!("missing port in CONNECT target: {}", authority))
    })?;
    let port = port_str.parse::<u16>().map_err(|_| {
        ProxyError::HttpParse(format!("invalid port in CONNECT target: {}", authority))
    })?;

    // [::1]:443 -> ::1
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return Err(ProxyError::HttpParse(format!(
            "missing host in CONNECT target: {}",
            authority
        )));
    }
    Ok((host.to_string(), port))
}

/// How a tunnel session ended.
#[derive(Debug, Default)]
pub(crate) struct RelayOutcome {
    pub to_target: u64,
    pub to_client: u64,
    /// First non-disconnect I/O error, if any
    pub error: Option<io::Error>,
}

/// Pump bytes client<->target until either direction ends.
///
/// When one direction sees end-of-stream or an error, the other is dropped
/// and both write sides are shut down, so neither peer is left waiting.
pub(crate) async fn relay<CR, CW, TR, TW>(
    mut client_read: CR,
    mut client_write: CW,
    mut target_read: TR,
    mut target_write: TW,
    io_timeout: Option<Duration>,
) -> RelayOutcome
where
    CR: AsyncRead + Unpin,
    CW: AsyncWrite + Unpin,
    TR: AsyncRead + Unpin,
    TW: AsyncWrite + Unpin,
{
    let mut outcome = RelayOutcome::default();

    let result = tokio::select! {
        res = pump(&mut client_read, &mut target_write, io_timeout, &mut outcome.to_target) => {
            ("client->target", res)
        }
        res = pump(&mut target_read, &mut client_write, io_timeout, &mut outcome.to_client) => {
            ("target->client", res)
        }
    };

    match result {
        (direction, Ok(())) => debug!("Tunnel {} reached end of stream", direction),
        (direction, Err(e)) if timeouts::is_disconnect(&e) => {
            debug!("Tunnel {} disconnected: {}", direction, e)
        }
        (direction, Err(e)) => {
            debug!("Tunnel {} failed: {}", direction, e);
            outcome.error = Some(e);
        }
    }

    let _ = client_write.shutdown().await;
    let _ = target_write.shutdown().await;
    outcome
}

/// Copy one direction in bounded chunks, flushing after every write.
async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    io_timeout: Option<Duration>,
    copied: &mut u64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; RELAY_CHUNK];
    loop {
        let n = timeouts::idle(io_timeout, "relay read", reader.read(&mut buf)).await?;
        if n == 0 {
            return Ok(());
        }
        timeouts::idle(io_timeout, "relay write", async {
            writer.write_all(&buf[..n]).await?;
            writer.flush().await
        })
        .await?;
        *copied += n as u64;
    }
}
