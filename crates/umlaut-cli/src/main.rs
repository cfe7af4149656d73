//! umlaut-proxy CLI - Indexer proxy for umlaut-aware searches
//!
//! Loads configuration, starts the proxy on a tokio runtime, and runs until
//! Ctrl-C.

mod cli;
mod config;

use clap::Parser;
use cli::Cli;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use umlaut_proxy::{ProxyError, Result};

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    if let Err(e) = run(cli) {
        error!("{}", e);
        eprintln!("umlaut-proxy: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let proxy_config = config::resolve(&cli)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| ProxyError::Config(format!("Failed to start proxy runtime: {}", e)))?;

    rt.block_on(async {
        let handle = umlaut_proxy::start(proxy_config).await?;
        info!(
            "Known plain-HTTP hosts: {}",
            handle.registry().snapshot().join(", ")
        );

        tokio::signal::ctrl_c().await?;
        info!("Interrupt received, stopping proxy");
        handle.stop().await;
        Ok::<(), ProxyError>(())
    })
}
