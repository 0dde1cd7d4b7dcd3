//! Overlay configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OverlayError, OverlayResult};
use crate::peer::PeerAddr;

/// Default lower bound of active outbound connections.
pub const DEFAULT_MIN_PEERS: usize = 3;

/// Default upper bound of active outbound connections.
pub const DEFAULT_MAX_PEERS: usize = 12;

/// Default interval between maintenance ticks.
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(5);

/// Default size of a single read from a peer link.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// A statically configured peer address used to (re)establish outbound connectivity.
pub type SeedAddress = PeerAddr;

/// Configuration for an overlay instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Below this many active outbound connections the maintainer dials seeds.
    pub min_peers: usize,

    /// Dials started by the maintainer never push active outbound past this.
    pub max_peers: usize,

    /// Seed addresses, dialed in order.
    pub seeds: Vec<SeedAddress>,

    /// Interval between maintenance ticks.
    pub maintenance_interval: Duration,

    /// Maximum bytes taken from a link per read.
    pub read_buffer_size: usize,

    /// Optional bound on how long a dial may stay in `connecting`.
    /// `None` keeps a stuck dial in its slot until the transport gives up.
    pub dial_timeout: Option<Duration>,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            min_peers: DEFAULT_MIN_PEERS,
            max_peers: DEFAULT_MAX_PEERS,
            seeds: Vec::new(),
            maintenance_interval: DEFAULT_MAINTENANCE_INTERVAL,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            dial_timeout: None,
        }
    }
}

impl OverlayConfig {
    /// Create a configuration with default bounds and no seeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lower bound of active outbound connections.
    pub fn with_min_peers(mut self, count: usize) -> Self {
        self.min_peers = count;
        self
    }

    /// Set the upper bound of active outbound connections.
    pub fn with_max_peers(mut self, count: usize) -> Self {
        self.max_peers = count;
        self
    }

    /// Set the seed list.
    pub fn with_seeds(mut self, seeds: Vec<SeedAddress>) -> Self {
        self.seeds = seeds;
        self
    }

    /// Parse and set the seed list from `host:port` strings.
    pub fn with_seed_strs<S: AsRef<str>>(mut self, seeds: &[S]) -> OverlayResult<Self> {
        self.seeds = parse_seeds(seeds)?;
        Ok(self)
    }

    /// Set the maintenance interval.
    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Set the per-read buffer size.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Bound the time a dial may take.
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = Some(timeout);
        self
    }

    /// Check the semantic constraints serde cannot express.
    pub fn validate(&self) -> OverlayResult<()> {
        if self.min_peers > self.max_peers {
            return Err(OverlayError::Configuration(format!(
                "min_peers ({}) must not exceed max_peers ({})",
                self.min_peers, self.max_peers
            )));
        }
        if self.maintenance_interval.is_zero() {
            return Err(OverlayError::Configuration(
                "maintenance_interval must be non-zero".to_string(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(OverlayError::Configuration(
                "read_buffer_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a list of `host:port` strings.
pub fn parse_seeds<S: AsRef<str>>(seeds: &[S]) -> OverlayResult<Vec<SeedAddress>> {
    seeds.iter().map(|s| s.as_ref().parse()).collect()
}
