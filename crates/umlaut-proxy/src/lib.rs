//! Transparent indexer proxy for umlaut-aware searches.
//!
//! Media-automation clients only know how to talk to a fixed indexer host.
//! Pointing their HTTP proxy at `umlaut-proxy` makes the local umlaut
//! gateway reachable without reconfiguring every indexer. Each connection
//! is classified from its first segment:
//!
//! 1. **CONNECT tunnel** (`connect`) - `CONNECT host:port` requests get a
//!    raw TCP tunnel. HTTPS is relayed opaquely and can never be rewritten,
//!    so tunnels to hosts not seen over plain HTTP log a warning.
//!
//! 2. **Rewrite and forward** (`forward`) - Any other request with an
//!    absolute URI, e.g. `GET http://indexer.example/api?t=search`, is
//!    rewritten to `GET http://<gateway>/_/indexer.example/api?t=search`
//!    carrying only the client's `User-Agent`, and the gateway's answer is
//!    relayed back.
//!
//! Hosts reached over plain HTTP are recorded in a shared [`HostRegistry`].

pub mod audit;
pub mod classify;
pub mod config;
pub mod connect;
pub mod error;
pub mod forward;
pub mod gateway;
pub mod registry;
pub mod request;
pub mod server;
mod timeouts;

pub use config::{GatewayConfig, ProxyConfig};
pub use error::{ProxyError, Result};
pub use registry::HostRegistry;
pub use server::{start, ProxyHandle};
