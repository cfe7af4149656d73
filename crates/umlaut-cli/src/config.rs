//! Configuration loading for the umlaut-proxy CLI
//!
//! Precedence, lowest to highest:
//! - Built-in defaults (`ProxyConfig::default()`)
//! - JSON config file given with `--config`
//! - CLI flags

use crate::cli::Cli;
use std::path::Path;
use umlaut_proxy::{ProxyConfig, ProxyError, Result};

/// Load a `ProxyConfig` from a JSON file. Missing fields take defaults.
pub fn load_file(path: &Path) -> Result<ProxyConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ProxyError::Config(format!("failed to read {}: {}", path.display(), e))
    })?;
    parse(&content).map_err(|e| ProxyError::Config(format!("{}: {}", path.display(), e)))
}

fn parse(content: &str) -> std::result::Result<ProxyConfig, serde_json::Error> {
    serde_json::from_str(content)
}

/// Build the effective configuration from the file (if any) and flags.
pub fn resolve(cli: &Cli) -> Result<ProxyConfig> {
    let mut config = match cli.config {
        Some(ref path) => load_file(path)?,
        None => ProxyConfig::default(),
    };
    apply_flags(&mut config, cli);
    Ok(config)
}

fn apply_flags(config: &mut ProxyConfig, cli: &Cli) {
    if let Some(addr) = cli.bind {
        config.bind_addr = addr;
    }
    if let Some(port) = cli.port {
        config.bind_port = port;
    }
    if let Some(ref host) = cli.gateway_host {
        config.gateway.host = host.clone();
    }
    if let Some(port) = cli.gateway_port {
        config.gateway.port = port;
    }
    for host in &cli.known_hosts {
        if !config.known_hosts.contains(host) {
            config.known_hosts.push(host.clone());
        }
    }
    if let Some(max) = cli.max_connections {
        config.max_connections = max;
    }
    if let Some(secs) = cli.io_timeout {
        config.io_timeout_secs = Some(secs);
    }
    if cli.cancel_on_shutdown {
        config.cancel_on_shutdown = true;
    }
}
