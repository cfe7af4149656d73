//! Minimal HTTP/1.1 client for the local gateway.
//!
//! The gateway is a plain-HTTP endpoint on a fixed local address that
//! answers `/_/<host><path-and-query>` with the normalized result of the
//! original indexer request. Every request is a single `GET` on a fresh
//! connection with `Connection: close`.

use crate::audit::redact_query;
use crate::config::GatewayConfig;
use crate::error::{ProxyError, Result};
use crate::timeouts;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Path prefix under which the gateway serves rewritten requests.
pub const GATEWAY_PATH_PREFIX: &str = "/_/";

/// Read chunk size for gateway responses.
const READ_CHUNK: usize = 8192;

/// Maximum gateway response size (64 MiB).
const MAX_RESPONSE_SIZE: usize = 64 * 1024 * 1024;

/// Status and body returned by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    pub status: u16,
    /// Reason phrase from the status line, possibly empty.
    pub reason: String,
    pub body: Vec<u8>,
}

impl GatewayResponse {
    /// 2xx status.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Client for the gateway endpoint.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    host: String,
    port: u16,
    connect_timeout: Duration,
    io_timeout: Option<Duration>,
}

impl GatewayClient {
    #[must_use]
    pub fn new(
        config: &GatewayConfig,
        connect_timeout: Duration,
        io_timeout: Option<Duration>,
    ) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            connect_timeout,
            io_timeout,
        }
    }

    /// Request path on the gateway for an original host and path-and-query.
    ///
    /// `("example.com", "/api?t=search")` -> `/_/example.com/api?t=search`
    #[must_use]
    pub fn gateway_path(original_host: &str, path_and_query: &str) -> String {
        format!("{}{}{}", GATEWAY_PATH_PREFIX, original_host, path_and_query)
    }

    /// Absolute gateway URI for an original host and path-and-query.
    #[must_use]
    pub fn outbound_uri(&self, original_host: &str, path_and_query: &str) -> String {
        format!(
            "http://{}:{}{}",
            self.host,
            self.port,
            Self::gateway_path(original_host, path_and_query)
        )
    }

    /// Issue `GET <path>` to the gateway, carrying only `User-Agent`.
    ///
    /// Any transport or framing failure is a [`ProxyError::Forward`].
    pub async fn get(&self, path: &str, user_agent: Option<&str>) -> Result<GatewayResponse> {
        let logged_path = redact_query(path);
        let target = format!("http://{}:{}{}", self.host, self.port, logged_path);
        let fail = |reason: String| ProxyError::Forward {
            target: target.clone(),
            reason,
        };

        let mut stream = timeouts::connect(&self.host, self.port, self.connect_timeout)
            .await
            .map_err(|e| fail(format!("connect: {}", e)))?;

        let mut request = format!(
            "GET {} HTTP/1.1\r\nHost: {}:{}\r\n",
            path, self.host, self.port
        );
        if let Some(ua) = user_agent {
            request.push_str(&format!("User-Agent: {}\r\n", header_value(ua)));
        }
        request.push_str("Connection: close\r\n\r\n");

        timeouts::idle(self.io_timeout, "gateway write", async {
            stream.write_all(request.as_bytes()).await?;
            stream.flush().await
        })
        .await
        .map_err(|e| fail(format!("write: {}", e)))?;

        // Stop as soon as the framing says the response is complete; the
        // gateway may keep the socket open after it.
        let mut raw = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = timeouts::idle(self.io_timeout, "gateway read", stream.read(&mut chunk))
                .await
                .map_err(|e| fail(format!("read: {}", e)))?;
            if raw.len() + n > MAX_RESPONSE_SIZE {
                return Err(fail("response too large".to_string()));
            }
            raw.extend_from_slice(&chunk[..n]);

            let eof = n == 0;
            if let Some(response) = parse_response(&raw, eof).map_err(&fail)? {
                debug!("Gateway returned {} bytes for {}", raw.len(), logged_path);
                return Ok(response);
            }
            if eof {
                return Err(fail("incomplete response".to_string()));
            }
        }
    }
}

/// Strip control characters so a copied value cannot start a new header line.
fn header_value(value: &str) -> String {
    value.chars().filter(|c| !c.is_control()).collect()
}

/// Parse a gateway response from the bytes read so far.
///
/// Returns `Ok(None)` while more bytes are needed. With `eof` set an
/// incomplete response is an error, and a body without Content-Length or
/// chunked framing runs to the end of the data.
fn parse_response(
    mut data: &[u8],
    eof: bool,
) -> std::result::Result<Option<GatewayResponse>, String> {
    loop {
        let Some(head_end) = find(data, b"\r\n\r\n") else {
            return if eof {
                Err("incomplete response head".to_string())
            } else {
                Ok(None)
            };
        };
        let head = String::from_utf8_lossy(&data[..head_end]);
        let rest = &data[head_end + 4..];

        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap_or("");
        let (status, reason) = parse_status_line(status_line)?;

        // Interim responses precede the real one on the same connection.
        if (100..200).contains(&status) && status != 101 {
            data = rest;
            continue;
        }

        let mut content_length = None;
        let mut chunked = false;
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim();
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = Some(
                        value
                            .trim()
                            .parse::<usize>()
                            .map_err(|_| format!("invalid Content-Length: {}", value.trim()))?,
                    );
                } else if name.eq_ignore_ascii_case("transfer-encoding")
                    && value.to_ascii_lowercase().contains("chunked")
                {
                    chunked = true;
                }
            }
        }

        let body = if status == 204 || status == 304 {
            Some(Vec::new())
        } else if chunked {
            decode_chunked(rest)?
        } else if let Some(len) = content_length {
            if rest.len() >= len {
                Some(rest[..len].to_vec())
            } else if eof {
                return Err(format!("truncated body: {} of {} bytes", rest.len(), len));
            } else {
                None
            }
        } else if eof {
            Some(rest.to_vec())
        } else {
            None
        };

        return match body {
            Some(body) => Ok(Some(GatewayResponse {
                status,
                reason,
                body,
            })),
            None if eof => Err("truncated chunked body".to_string()),
            None => Ok(None),
        };
    }
}

/// Parse "HTTP/1.1 200 OK" into (200, "OK").
fn parse_status_line(line: &str) -> std::result::Result<(u16, String), String> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/") {
        return Err(format!("malformed status line: {}", line));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..1000).contains(code))
        .ok_or_else(|| format!("malformed status line: {}", line))?;
    let reason = parts.next().unwrap_or("").trim().to_string();
    Ok((status, reason))
}

/// Decode a chunked transfer-encoded body. Trailers are discarded.
///
/// Returns `Ok(None)` until the terminating zero-size chunk has arrived.
fn decode_chunked(mut data: &[u8]) -> std::result::Result<Option<Vec<u8>>, String> {
    let mut body = Vec::new();
    loop {
        let Some(line_end) = find(data, b"\r\n") else {
            return Ok(None);
        };
        let size_line = String::from_utf8_lossy(&data[..line_end]);
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| format!("invalid chunk size: {}", size_str))?;
        data = &data[line_end + 2..];
        if size == 0 {
            return Ok(Some(body));
        }
        let end = size
            .checked_add(2)
            .filter(|end| *end <= MAX_RESPONSE_SIZE)
            .ok_or_else(|| format!("chunk size too large: {}", size_str))?;
        if data.len() < end {
            return Ok(None);
        }
        body.extend_from_slice(&data[..size]);
        data = &data[end..];
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn parse_at_eof(data: &[u8]) -> std::result::Result<GatewayResponse, String> {
        parse_response(data, true).map(|resp| resp.unwrap())
    }

    /// Accept one request, answer with `response`, then hold the socket
    /// open until the returned sender is dropped. Yields the request text.
    async fn spawn_gateway(
        response: &'static [u8],
    ) -> (
        u16,
        tokio::sync::oneshot::Sender<()>,
        tokio::task::JoinHandle<String>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (hold_tx, hold_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while find(&buf, b"\r\n\r\n").is_none() {
                let n = sock.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
            }
            sock.write_all(response).await.unwrap();
            let _ = hold_rx.await;
            String::from_utf8(buf).unwrap()
        });
        (port, hold_tx, server)
    }

    fn local_client(port: u16) -> GatewayClient {
        let config = GatewayConfig {
            host: "127.0.0.1".to_string(),
            port,
        };
        GatewayClient::new(&config, Duration::from_secs(5), None)
    }

    #[test]
    fn test_gateway_path() {
        assert_eq!(
            GatewayClient::gateway_path("example.com", "/path?x=1"),
            "/_/example.com/path?x=1"
        );
    }

    #[test]
    fn test_outbound_uri() {
        let client = GatewayClient::new(&GatewayConfig::default(), Duration::from_secs(1), None);
        assert_eq!(
            client.outbound_uri("indexer.example", "/api?t=tvsearch&q=Der%20Bergdoktor"),
            "http://localhost:5005/_/indexer.example/api?t=tvsearch&q=Der%20Bergdoktor"
        );
    }

    #[test]
    fn test_parse_response_content_length() {
        let resp = parse_at_eof(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello").unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.reason, "OK");
        assert_eq!(resp.body, b"hello");
        assert!(resp.is_success());
    }

    #[test]
    fn test_parse_response_until_eof() {
        let resp = parse_at_eof(b"HTTP/1.0 200 OK\r\n\r\n<rss/>").unwrap();
        assert_eq!(resp.body, b"<rss/>");
    }

    #[test]
    fn test_parse_response_chunked() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Trailer: y\r\n\r\n";
        let resp = parse_at_eof(raw).unwrap();
        assert_eq!(resp.body, b"Wikipedia");
    }

    #[test]
    fn test_parse_response_skips_interim() {
        let raw = b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
        let resp = parse_at_eof(raw).unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(resp.reason, "Not Found");
        assert!(!resp.is_success());
    }

    #[test]
    fn test_parse_response_errors() {
        assert!(parse_at_eof(b"").is_err());
        assert!(parse_at_eof(b"garbage\r\n\r\n").is_err());
        assert!(parse_at_eof(b"HTTP/1.1 abc OK\r\n\r\n").is_err());
        assert!(parse_at_eof(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort").is_err());
        assert!(parse_at_eof(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n").is_err());
    }

    #[test]
    fn test_parse_response_waits_for_framed_body() {
        let partial = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhel";
        assert_eq!(parse_response(partial, false).unwrap(), None);
        let full = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        assert_eq!(parse_response(full, false).unwrap().unwrap().body, b"hello");

        let chunked = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nok\r\n";
        assert_eq!(parse_response(chunked, false).unwrap(), None);
        assert!(parse_response(chunked, true).is_err());

        let unframed = b"HTTP/1.0 200 OK\r\n\r\n<rss";
        assert_eq!(parse_response(unframed, false).unwrap(), None);
        assert_eq!(parse_response(b"HTTP/1.1 200", false).unwrap(), None);
    }

    #[test]
    fn test_parse_response_rejects_oversized_chunk() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nabc";
        assert!(parse_response(raw, true).is_err());
        assert!(parse_response(raw, false).is_err());
    }

    #[tokio::test]
    async fn test_get_sends_only_user_agent() {
        let (port, hold, server) =
            spawn_gateway(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;
        let resp = local_client(port)
            .get("/_/a.example/api?t=caps", Some("Prowlarr/1.0"))
            .await
            .unwrap();
        assert_eq!(resp.body, b"ok");
        drop(hold);

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /_/a.example/api?t=caps HTTP/1.1\r\n"));
        assert!(request.contains("\r\nUser-Agent: Prowlarr/1.0\r\n"));
        assert!(request.contains("\r\nConnection: close\r\n"));
    }

    #[tokio::test]
    async fn test_get_returns_once_body_complete_on_open_socket() {
        let (port, hold, _server) =
            spawn_gateway(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;
        let resp = tokio::time::timeout(
            Duration::from_secs(3),
            local_client(port).get("/_/a.example/", None),
        )
        .await
        .expect("get must not wait for the gateway to close")
        .unwrap();
        assert_eq!(resp.body, b"ok");
        drop(hold);
    }

    #[tokio::test]
    async fn test_get_chunked_returns_on_final_chunk() {
        let (port, hold, _server) = spawn_gateway(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nrss\r\n0\r\n\r\n",
        )
        .await;
        let resp = tokio::time::timeout(
            Duration::from_secs(3),
            local_client(port).get("/_/a.example/", None),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(resp.body, b"rss");
        drop(hold);
    }

    #[tokio::test]
    async fn test_get_strips_control_chars_from_user_agent() {
        let (port, hold, server) =
            spawn_gateway(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
        local_client(port)
            .get("/_/a.example/", Some("Prowlarr\nX-Injected: 1"))
            .await
            .unwrap();
        drop(hold);

        let request = server.await.unwrap();
        assert!(!request.contains("\nX-Injected"));
        assert!(request.contains("\r\nUser-Agent: ProwlarrX-Injected: 1\r\n"));
    }

    #[tokio::test]
    async fn test_get_unreachable_is_forward_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let config = GatewayConfig {
            host: "127.0.0.1".to_string(),
            port,
        };
        let client = GatewayClient::new(&config, Duration::from_secs(5), None);
        let err = client
            .get("/_/a.example/api?t=search&apikey=secret", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Forward { .. }));
        assert!(!err.to_string().contains("secret"));
    }
}
