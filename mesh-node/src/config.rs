//! Node configuration.

use std::net::SocketAddr;
use std::time::Duration;

use mesh_overlay::{OverlayConfig, OverlayResult};

use crate::cli::Cli;

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Listen address for inbound peers.
    pub listen_addr: SocketAddr,

    /// Overlay settings.
    pub overlay: OverlayConfig,

    /// Built-in middleware names, in wiring order.
    pub middleware: Vec<String>,

    /// Validate stdin lines as JSON.
    pub json_input: bool,

    /// Log level.
    pub log_level: String,
}

impl NodeConfig {
    /// Create a node configuration from CLI arguments.
    ///
    /// Fails on unparsable seeds or inconsistent peer bounds.
    pub fn from_cli(cli: &Cli) -> OverlayResult<Self> {
        let mut overlay = OverlayConfig::new()
            .with_min_peers(cli.min_peers)
            .with_max_peers(cli.max_peers)
            .with_seed_strs(cli.seeds.as_slice())?
            .with_maintenance_interval(Duration::from_secs(cli.maintenance_interval));
        if let Some(secs) = cli.dial_timeout {
            overlay = overlay.with_dial_timeout(Duration::from_secs(secs));
        }
        overlay.validate()?;

        Ok(Self {
            listen_addr: cli.listen,
            overlay,
            middleware: cli.middleware.clone(),
            json_input: cli.json,
            log_level: cli.log_level.clone(),
        })
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9333)),
            overlay: OverlayConfig::default(),
            middleware: vec!["lines".to_string()],
            json_input: false,
            log_level: "info".to_string(),
        }
    }
}
