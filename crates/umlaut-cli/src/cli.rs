//! CLI argument definitions for umlaut-proxy
//!
//! Uses clap for argument parsing. Flags override values from the
//! optional JSON config file.

use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

/// umlaut-proxy - Indexer proxy for umlaut-aware searches
///
/// Point the automation client's HTTP proxy at this listener. Plain HTTP
/// indexer requests are rewritten to the local gateway; HTTPS is tunnelled
/// unchanged.
#[derive(Parser, Debug)]
#[command(name = "umlaut-proxy")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    # Listen on the default port 5006, gateway on localhost:5005
    umlaut-proxy

    # Load settings from a file, override the port
    umlaut-proxy --config /etc/umlaut/proxy.json --port 8080

    # Treat additional indexers as known plain-HTTP hosts
    umlaut-proxy --known-host indexer.local --known-host nzb.example
")]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<IpAddr>,

    /// Port to listen on
    #[arg(long, short = 'p', value_name = "PORT")]
    pub port: Option<u16>,

    /// Gateway host that receives rewritten requests
    #[arg(long, value_name = "HOST")]
    pub gateway_host: Option<String>,

    /// Gateway port
    #[arg(long, value_name = "PORT")]
    pub gateway_port: Option<u16>,

    /// Additional host known to be reached over plain HTTP (repeatable)
    #[arg(long = "known-host", value_name = "HOST")]
    pub known_hosts: Vec<String>,

    /// Maximum concurrent connections (0 = unlimited)
    #[arg(long, value_name = "N")]
    pub max_connections: Option<usize>,

    /// Idle timeout in seconds for socket reads and writes
    #[arg(long, value_name = "SECS")]
    pub io_timeout: Option<u64>,

    /// Cancel in-flight connections when shutting down
    #[arg(long)]
    pub cancel_on_shutdown: bool,

    /// Verbose logging (debug level unless RUST_LOG is set)
    #[arg(long, short = 'v')]
    pub verbose: bool,
}
