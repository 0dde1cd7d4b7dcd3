//! Command-line argument parsing.

use std::net::SocketAddr;

use clap::Parser;

/// Mesh overlay node.
///
/// Lines read from stdin are broadcast to every peer; whatever the peers
/// send comes out on stdout after passing through the middleware chain.
#[derive(Parser, Debug, Clone)]
#[command(name = "mesh-node")]
#[command(about = "Peer-to-peer mesh overlay node")]
#[command(version)]
pub struct Cli {
    /// Listen address for inbound peers.
    #[arg(long, default_value = "0.0.0.0:9333")]
    pub listen: SocketAddr,

    /// Comma-separated list of seed peers (host:port).
    #[arg(long, value_delimiter = ',')]
    pub seeds: Vec<String>,

    /// Dial seeds while fewer than this many outbound peers are active.
    #[arg(long, default_value_t = mesh_overlay::DEFAULT_MIN_PEERS)]
    pub min_peers: usize,

    /// Never let seed dials push active outbound peers past this.
    #[arg(long, default_value_t = mesh_overlay::DEFAULT_MAX_PEERS)]
    pub max_peers: usize,

    /// Seconds between maintenance ticks.
    #[arg(long, default_value_t = 5)]
    pub maintenance_interval: u64,

    /// Give up on a dial after this many seconds (no limit by default).
    #[arg(long)]
    pub dial_timeout: Option<u64>,

    /// Comma-separated built-in middleware applied to incoming data, in order.
    #[arg(long, value_delimiter = ',', default_value = "lines")]
    pub middleware: Vec<String>,

    /// Treat each stdin line as a JSON document and reject invalid ones.
    #[arg(long)]
    pub json: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
