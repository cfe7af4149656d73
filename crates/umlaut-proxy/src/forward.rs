//! Rewrite-and-forward handler for plain HTTP requests.
//!
//! A proxy-aware client sends `GET http://indexer.example/api?t=search HTTP/1.1`.
//! The request is rewritten to `GET /_/indexer.example/api?t=search` on the
//! gateway, which performs the umlaut-aware search, and the gateway's answer
//! is relayed back as a minimal HTTP/1.1 response.
//!
//! Only the `User-Agent` header is forwarded; every other client header is
//! dropped.

use crate::audit;
use crate::error::{ProxyError, Result};
use crate::gateway::{GatewayClient, GatewayResponse};
use crate::registry::HostRegistry;
use crate::request::{parse_headers, ParsedRequestLine};
use crate::timeouts;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

const INTERNAL_ERROR_RESPONSE: &[u8] = b"HTTP/1.1 500 Internal Server Error\r\n\r\n";

/// Shared context passed from the server to the forward handler.
pub struct ForwardCtx<'a> {
    /// Registry that records every host reached over plain HTTP
    pub registry: &'a HostRegistry,
    /// Client for the gateway endpoint
    pub gateway: &'a GatewayClient,
    /// Idle timeout for writes back to the client
    pub io_timeout: Option<Duration>,
}

/// A client request rewritten for the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenRequest {
    pub method: String,
    /// Host of the original absolute URI
    pub host: String,
    /// Port of the original URI, explicit or the scheme default
    pub port: u16,
    /// Path and query of the original URI, as sent by the client
    pub path_and_query: String,
    pub user_agent: Option<String>,
}

impl RewrittenRequest {
    /// Build from the initial segment of a non-CONNECT connection.
    ///
    /// The request target must be an absolute URI; anything else is a
    /// parse error.
    pub fn from_initial(request: &str, raw: &[u8]) -> Result<Self> {
        let line = ParsedRequestLine::parse(request)?;
        let headers = parse_headers(raw);

        let uri = url::Url::parse(&line.target).map_err(|e| {
            ProxyError::HttpParse(format!("invalid request target '{}': {}", line.target, e))
        })?;
        let host = uri
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                ProxyError::HttpParse(format!("missing host in request target: {}", line.target))
            })?
            .to_string();
        let port = uri.port_or_known_default().unwrap_or(80);

        Ok(Self {
            method: line.method,
            host,
            port,
            path_and_query: raw_path_and_query(&line.target),
            user_agent: headers.get("User-Agent").cloned(),
        })
    }

    /// Path of this request on the gateway.
    #[must_use]
    pub fn gateway_path(&self) -> String {
        GatewayClient::gateway_path(&self.host, &self.path_and_query)
    }
}

/// Handle a non-CONNECT request.
///
/// Parse and gateway failures are answered with `500 Internal Server Error`.
/// The caller closes the client stream on return.
pub async fn handle_forward<S>(
    request: &str,
    raw: &[u8],
    stream: &mut S,
    ctx: &ForwardCtx<'_>,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let rewritten = match RewrittenRequest::from_initial(request, raw) {
        Ok(r) => r,
        Err(e) => {
            warn!("HTTP proxy error: {}", e);
            return write_response(stream, INTERNAL_ERROR_RESPONSE, ctx.io_timeout).await;
        }
    };

    if ctx.registry.add(&rewritten.host) {
        debug!("Registered known host {}", rewritten.host);
    }

    let gateway_path = rewritten.gateway_path();
    debug!(
        "Forwarding {} {} to {}",
        rewritten.method,
        rewritten.host,
        ctx.gateway
            .outbound_uri(&rewritten.host, &audit::redact_query(&rewritten.path_and_query))
    );

    let response = match ctx
        .gateway
        .get(&gateway_path, rewritten.user_agent.as_deref())
        .await
    {
        Ok(r) => r,
        Err(e) => {
            warn!("HTTP proxy error: {}", e);
            audit::log_failed(
                audit::ProxyMode::Forward,
                &rewritten.host,
                rewritten.port,
                &e.to_string(),
            );
            return write_response(stream, INTERNAL_ERROR_RESPONSE, ctx.io_timeout).await;
        }
    };

    audit::log_forwarded(
        &rewritten.host,
        &rewritten.method,
        &rewritten.path_and_query,
        response.status,
    );
    write_response(stream, &client_response(&response), ctx.io_timeout).await
}

/// Render the gateway's answer for the client.
///
/// Success becomes `200 OK` with the full body; any other status is echoed
/// without a body.
#[must_use]
pub fn client_response(response: &GatewayResponse) -> Vec<u8> {
    if response.is_success() {
        let mut out = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
            response.body.len()
        )
        .into_bytes();
        out.extend_from_slice(&response.body);
        out
    } else if response.reason.is_empty() {
        format!("HTTP/1.1 {}\r\n\r\n", response.status).into_bytes()
    } else {
        format!("HTTP/1.1 {} {}\r\n\r\n", response.status, response.reason).into_bytes()
    }
}

/// Path and query of an absolute URI exactly as written, without fragment.
///
/// "http://a.example:8080/api?t=caps" -> "/api?t=caps"
/// "http://a.example?x=1"             -> "/?x=1"
fn raw_path_and_query(target: &str) -> String {
    let after_scheme = target.split_once("://").map_or(target, |(_, rest)| rest);
    let without_fragment = after_scheme.split('#').next().unwrap_or("");
    match without_fragment.find(|c: char| c == '/' || c == '?') {
        Some(i) if without_fragment[i..].starts_with('/') => without_fragment[i..].to_string(),
        Some(i) => format!("/{}", &without_fragment[i..]),
        None => "/".to_string(),
    }
}

async fn write_response<S>(
    stream: &mut S,
    bytes: &[u8],
    io_timeout: Option<Duration>,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    timeouts::idle(io_timeout, "client write", async {
        stream.write_all(bytes).await?;
        stream.flush().await
    })
    .await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    const SAMPLE: &str =
        "GET http://example.com/path?x=1 HTTP/1.1\r\nHost: example.com\r\nUser-Agent: test-agent\r\nAccept: */*\r\n\r\n";

    #[test]
    fn test_rewrite_absolute_uri() {
        let r = RewrittenRequest::from_initial(SAMPLE, SAMPLE.as_bytes()).unwrap();
        assert_eq!(r.method, "GET");
        assert_eq!(r.host, "example.com");
        assert_eq!(r.port, 80);
        assert_eq!(r.path_and_query, "/path?x=1");
        assert_eq!(r.user_agent.as_deref(), Some("test-agent"));
        assert_eq!(r.gateway_path(), "/_/example.com/path?x=1");
    }

    #[test]
    fn test_rewrite_without_user_agent() {
        let req = "GET http://a.example/api HTTP/1.1\r\n\r\n";
        let r = RewrittenRequest::from_initial(req, req.as_bytes()).unwrap();
        assert!(r.user_agent.is_none());
    }

    #[test]
    fn test_rewrite_keeps_explicit_port() {
        let req = "GET http://a.example:9117/api HTTP/1.1\r\n\r\n";
        let r = RewrittenRequest::from_initial(req, req.as_bytes()).unwrap();
        assert_eq!(r.host, "a.example");
        assert_eq!(r.port, 9117);
        assert_eq!(r.gateway_path(), "/_/a.example/api");
    }

    #[test]
    fn test_rewrite_rejects_relative_target() {
        let req = "GET /api?t=caps HTTP/1.1\r\nHost: a.example\r\n\r\n";
        let err = RewrittenRequest::from_initial(req, req.as_bytes()).unwrap_err();
        assert!(matches!(err, ProxyError::HttpParse(_)));
    }

    #[test]
    fn test_raw_path_and_query() {
        assert_eq!(raw_path_and_query("http://a.example:8080/api?t=caps"), "/api?t=caps");
        assert_eq!(raw_path_and_query("http://a.example?x=1"), "/?x=1");
        assert_eq!(raw_path_and_query("http://a.example"), "/");
        assert_eq!(raw_path_and_query("http://a.example/p#frag"), "/p");
        assert_eq!(
            raw_path_and_query("http://a.example/api?q=M%C3%BCnchen+Tatort&apikey=k"),
            "/api?q=M%C3%BCnchen+Tatort&apikey=k"
        );
    }

    #[test]
    fn test_client_response_success() {
        let resp = GatewayResponse {
            status: 201,
            reason: "Created".to_string(),
            body: b"<rss/>".to_vec(),
        };
        assert_eq!(
            client_response(&resp),
            b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\n<rss/>".to_vec()
        );
    }

    #[test]
    fn test_client_response_error_has_no_body() {
        let resp = GatewayResponse {
            status: 404,
            reason: "Not Found".to_string(),
            body: b"ignored".to_vec(),
        };
        assert_eq!(client_response(&resp), b"HTTP/1.1 404 Not Found\r\n\r\n".to_vec());

        let bare = GatewayResponse {
            status: 502,
            reason: String::new(),
            body: Vec::new(),
        };
        assert_eq!(client_response(&bare), b"HTTP/1.1 502\r\n\r\n".to_vec());
    }

    #[tokio::test]
    async fn test_parse_failure_answers_500_without_registering() {
        let registry = HostRegistry::new();
        let gateway = GatewayClient::new(&GatewayConfig::default(), Duration::from_secs(1), None);
        let ctx = ForwardCtx {
            registry: &registry,
            gateway: &gateway,
            io_timeout: None,
        };
        let req = "GET not-a-uri HTTP/1.1\r\n\r\n";
        let mut out = Vec::new();
        handle_forward(req, req.as_bytes(), &mut out, &ctx).await.unwrap();
        assert_eq!(out, INTERNAL_ERROR_RESPONSE);
        assert!(registry.is_empty());
    }
}
