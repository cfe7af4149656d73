//! Audit logging for proxy requests.
//!
//! Logs every tunnel and forwarded request with structured fields via
//! `tracing`. Request bodies and header values other than the host are
//! never included, and credential query parameters are masked with
//! [`redact_query`].

use tracing::info;

/// Proxy path for audit logging.
#[derive(Debug, Clone, Copy)]
pub enum ProxyMode {
    /// CONNECT tunnel (opaque relay)
    Tunnel,
    /// Plain HTTP request rewritten to the gateway
    Forward,
}

impl std::fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyMode::Tunnel => write!(f, "tunnel"),
            ProxyMode::Forward => write!(f, "forward"),
        }
    }
}

/// Log an established tunnel.
pub fn log_tunnel_opened(host: &str, port: u16, known_host: bool) {
    info!(
        target: "umlaut_proxy::audit",
        mode = %ProxyMode::Tunnel,
        host = host,
        port = port,
        known_host = known_host,
        decision = "relay",
        "tunnel established"
    );
}

/// Log a closed tunnel with byte counts per direction.
pub fn log_tunnel_closed(host: &str, port: u16, to_target: u64, to_client: u64) {
    info!(
        target: "umlaut_proxy::audit",
        mode = %ProxyMode::Tunnel,
        host = host,
        port = port,
        bytes_to_target = to_target,
        bytes_to_client = to_client,
        "tunnel closed"
    );
}

/// Log a request that could not be completed.
pub fn log_failed(mode: ProxyMode, host: &str, port: u16, reason: &str) {
    info!(
        target: "umlaut_proxy::audit",
        mode = %mode,
        host = host,
        port = port,
        decision = "fail",
        reason = reason,
        "proxy request failed"
    );
}

/// Log a forwarded request with the gateway's status.
pub fn log_forwarded(host: &str, method: &str, path_and_query: &str, status: u16) {
    info!(
        target: "umlaut_proxy::audit",
        mode = %ProxyMode::Forward,
        host = host,
        method = method,
        path = %redact_query(path_and_query),
        status = status,
        "gateway response"
    );
}

/// Query parameters whose values are indexer credentials.
const SECRET_PARAMS: &[&str] = &["apikey", "api_key", "passkey", "token", "password"];

/// Mask the values of credential parameters in a path-and-query.
///
/// "/api?t=search&apikey=abc" -> "/api?t=search&apikey=REDACTED"
#[must_use]
pub fn redact_query(path_and_query: &str) -> String {
    let Some((path, query)) = path_and_query.split_once('?') else {
        return path_and_query.to_string();
    };
    let params: Vec<String> = query
        .split('&')
        .map(|param| match param.split_once('=') {
            Some((name, _)) if is_secret(name) => format!("{}=REDACTED", name),
            _ => param.to_string(),
        })
        .collect();
    format!("{}?{}", path, params.join("&"))
}

fn is_secret(name: &str) -> bool {
    SECRET_PARAMS
        .iter()
        .any(|secret| name.eq_ignore_ascii_case(secret))
}
