//! Proxy configuration types.
//!
//! Defines the listening address, the gateway endpoint that receives
//! rewritten requests, the pre-seeded known hosts, and the optional
//! hardening knobs (timeouts, connection limit, cancellation on stop).

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Default listening port for the proxy.
pub const DEFAULT_PROXY_PORT: u16 = 5006;

/// Default port of the local gateway that serves `/_/<host>/...` requests.
pub const DEFAULT_GATEWAY_PORT: u16 = 5005;

/// Hostname of the upstream indexer manager, known to be reached over plain HTTP.
pub const DEFAULT_KNOWN_HOST: &str = "prowlarr.servarr.com";

/// Configuration for the proxy server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Bind address (default: 0.0.0.0)
    pub bind_addr: IpAddr,

    /// Bind port (0 = OS-assigned ephemeral port)
    pub bind_port: u16,

    /// Gateway that receives rewritten plain HTTP requests.
    pub gateway: GatewayConfig,

    /// Hosts seeded into the registry at startup. Tunnels to these hosts
    /// do not trigger the "switch to http://" warning.
    pub known_hosts: Vec<String>,

    /// Timeout for outbound TCP connects (tunnel targets and gateway).
    pub connect_timeout_secs: u64,

    /// Per-operation idle timeout for socket reads and writes.
    /// `None` leaves slow or silent peers unbounded.
    pub io_timeout_secs: Option<u64>,

    /// Maximum concurrent connections (0 = unlimited).
    pub max_connections: usize,

    /// When set, in-flight connections are cancelled on shutdown instead of
    /// being left to run to completion.
    pub cancel_on_shutdown: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
            bind_port: DEFAULT_PROXY_PORT,
            gateway: GatewayConfig::default(),
            known_hosts: vec![DEFAULT_KNOWN_HOST.to_string()],
            connect_timeout_secs: 30,
            io_timeout_secs: None,
            max_connections: 0,
            cancel_on_shutdown: false,
        }
    }
}

impl ProxyConfig {
    /// Outbound connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Socket idle timeout, if configured.
    #[must_use]
    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_secs.map(Duration::from_secs)
    }
}

/// Address of the gateway endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway hostname (default: localhost)
    pub host: String,

    /// Gateway port (default: 5005)
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_GATEWAY_PORT,
        }
    }
}

impl GatewayConfig {
    /// `host:port` authority, as used in the outbound URI and `Host` header.
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
