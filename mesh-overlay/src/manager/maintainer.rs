//! Seed-driven outbound connectivity.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::{OverlayConfig, SeedAddress};
use crate::overlay::Overlay;
use crate::peer::{PeerAddr, PeerConnection};
use crate::transport::Transport;

/// Pick the seeds one maintenance tick should dial.
///
/// `active` are outbound connections past `connecting`, `in_flight` are
/// outbound dials still pending. Nothing is dialed once `active` reaches
/// either bound; below that, seeds are taken in order until
/// `active + in_flight + dials == max_peers`.
pub fn plan_dials(
    active: &[Arc<PeerConnection>],
    in_flight: &[Arc<PeerConnection>],
    config: &OverlayConfig,
) -> Vec<SeedAddress> {
    let count = active.len();
    if count >= config.max_peers || count >= config.min_peers {
        return Vec::new();
    }

    let has_loopback_peer = active.iter().any(|c| c.remote().is_some_and(PeerAddr::is_loopback));
    let targets = |list: &[Arc<PeerConnection>], seed: &SeedAddress| {
        list.iter().any(|c| c.remote().is_some_and(|r| r.matches(seed)))
    };

    config
        .seeds
        .iter()
        .filter(|seed| !(seed.is_loopback() && has_loopback_peer))
        .filter(|seed| !targets(active, *seed))
        .filter(|seed| !targets(in_flight, *seed))
        .take(config.max_peers.saturating_sub(count + in_flight.len()))
        .cloned()
        .collect()
}

/// Periodically dials seeds while active outbound connectivity is low.
pub struct NetworkMaintainer<T: Transport> {
    overlay: Overlay<T>,
}

impl<T: Transport> NetworkMaintainer<T> {
    /// Create a maintainer for `overlay`.
    pub fn new(overlay: Overlay<T>) -> Self {
        Self { overlay }
    }

    /// Run one maintenance pass. Returns the seeds that were dialed.
    pub fn tick(&self) -> Vec<SeedAddress> {
        let config = self.overlay.config();
        let (active, in_flight) = self.overlay.with_registry(|registry| {
            let in_flight: Vec<_> = registry
                .outbound()
                .iter()
                .filter(|c| c.state().is_connecting())
                .cloned()
                .collect();
            (registry.active_outbound(), in_flight)
        });

        let planned = plan_dials(&active, &in_flight, &config);
        tracing::debug!(
            active = active.len(),
            in_flight = in_flight.len(),
            dials = planned.len(),
            "Maintenance tick"
        );

        for seed in &planned {
            tracing::debug!(seed = %seed, "Dialing seed");
            self.overlay.connect(seed.clone());
        }
        planned
    }

    /// Tick immediately, then every `maintenance_interval`, until shutdown.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut timer = interval(self.overlay.config().maintenance_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Network maintainer shutting down");
                    break;
                }

                _ = timer.tick() => {
                    self.tick();
                }
            }
        }
    }
}
