//! Error types for the umlaut-proxy crate.

use thiserror::Error;

/// Errors that can occur in the indexer proxy.
///
/// Everything except [`ProxyError::Bind`] is local to one client
/// connection and is logged at the connection boundary, never propagated
/// to the accept loop.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Proxy bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Client read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("HTTP parse error: {0}")]
    HttpParse(String),

    #[error("Upstream connection failed to {host}: {reason}")]
    UpstreamConnect { host: String, reason: String },

    #[error("Gateway request for {target} failed: {reason}")]
    Forward { target: String, reason: String },

    #[error("Tunnel relay error: {0}")]
    Relay(#[source] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
