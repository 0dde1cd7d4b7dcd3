//! Per-connection pipeline wiring.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::TransformError;
use crate::middleware::{MiddlewareContext, Outlet, Transform, TransformFactory};
use crate::peer::{PeerConnection, PeerId};
use crate::protocol::Payload;

/// The running stages of one connection.
///
/// Items sent to [`Pipeline::head`] come out of the sink in the same order.
/// The stages shut down in order once every head sender is dropped.
#[derive(Debug)]
pub struct Pipeline {
    head: mpsc::UnboundedSender<Payload>,
    stages: Vec<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Instantiate `factories` for `peer` and wire them into `sink`.
    ///
    /// Instances are created in order, then chained, then their init hooks
    /// run in order. Only after every hook succeeded are the stage tasks
    /// spawned, so a failure leaves nothing running.
    pub fn build(
        factories: &[Arc<dyn TransformFactory>],
        peer: &Arc<PeerConnection>,
        ctx: &MiddlewareContext,
        sink: mpsc::UnboundedSender<Payload>,
    ) -> Result<Self, TransformError> {
        let mut instances = Vec::with_capacity(factories.len());
        for factory in factories {
            instances.push(factory.create(peer)?);
        }

        let (head, head_rx) = mpsc::unbounded_channel();
        let mut inputs = vec![head_rx];
        let mut outlets = Vec::with_capacity(instances.len());
        for _ in 1..instances.len() {
            let (tx, rx) = mpsc::unbounded_channel();
            outlets.push(Outlet::new(tx));
            inputs.push(rx);
        }
        outlets.push(Outlet::new(sink.clone()));

        for instance in instances.iter_mut() {
            instance.init(ctx, peer)?;
        }

        let peer_id = peer.id();
        let stages: Vec<String> = instances.iter().map(|t| t.name().to_string()).collect();
        let tasks: Vec<JoinHandle<()>> = if instances.is_empty() {
            inputs
                .into_iter()
                .map(|rx| tokio::spawn(forward(rx, sink.clone())))
                .collect()
        } else {
            instances
                .into_iter()
                .zip(inputs)
                .zip(outlets)
                .map(|((instance, rx), outlet)| tokio::spawn(run_stage(peer_id, instance, rx, outlet)))
                .collect()
        };

        tracing::debug!(peer = %peer_id, stages = ?stages, "Pipeline wired");

        Ok(Self { head, stages, tasks })
    }

    /// A sender feeding the first stage.
    pub fn head(&self) -> mpsc::UnboundedSender<Payload> {
        self.head.clone()
    }

    /// Stage names, in wiring order.
    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Close this handle's head sender and wait for every stage to drain.
    ///
    /// Other head clones must be dropped too, or this waits forever.
    pub async fn join(self) {
        drop(self.head);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

async fn run_stage(
    peer: PeerId,
    mut transform: Box<dyn Transform>,
    mut input: mpsc::UnboundedReceiver<Payload>,
    mut out: Outlet,
) {
    while let Some(item) = input.recv().await {
        if let Err(e) = transform.transform(item, &mut out) {
            tracing::warn!(peer = %peer, middleware = transform.name(), error = %e, "Dropping item");
        }
    }

    if let Err(e) = transform.finish(&mut out) {
        tracing::warn!(peer = %peer, middleware = transform.name(), error = %e, "Flush failed");
    }
    tracing::trace!(peer = %peer, middleware = transform.name(), emitted = out.emitted(), "Stage finished");
}

async fn forward(mut input: mpsc::UnboundedReceiver<Payload>, sink: mpsc::UnboundedSender<Payload>) {
    while let Some(item) = input.recv().await {
        if sink.send(item).is_err() {
            break;
        }
    }
}
