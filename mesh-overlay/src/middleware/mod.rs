//! Per-connection middleware.
//!
//! A [`TransformFactory`] is registered once on the overlay; every time a
//! connection reaches `connected`, each factory is asked for a fresh
//! [`Transform`] and the instances are chained in registration order:
//!
//! ```text
//! link reads ──▶ [stage 0] ──▶ [stage 1] ──▶ ... ──▶ [stage n-1] ──▶ Inbox
//! ```
//!
//! Each stage runs in its own task and talks to its neighbours over FIFO
//! channels, so a connection's output keeps the order of its input.

pub mod builtin;
pub mod pipeline;

use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{OverlayResult, TransformError};
use crate::events::{EventBus, OverlayEvent};
use crate::peer::PeerConnection;
use crate::protocol::Payload;

pub use builtin::{from_fn, resolve_builtin, Builtin, BUILTIN_NAMES};
pub use pipeline::Pipeline;

/// Output side of a stage.
#[derive(Debug)]
pub struct Outlet {
    tx: mpsc::UnboundedSender<Payload>,
    emitted: u64,
}

impl Outlet {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Payload>) -> Self {
        Self { tx, emitted: 0 }
    }

    /// Emit an item downstream. Returns `false` once downstream is gone.
    pub fn push(&mut self, item: impl Into<Payload>) -> bool {
        let sent = self.tx.send(item.into()).is_ok();
        if sent {
            self.emitted += 1;
        }
        sent
    }

    /// Number of items emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

/// A stream transform bound to one connection.
pub trait Transform: Send + 'static {
    /// Name used in logs.
    fn name(&self) -> &str {
        "transform"
    }

    /// Per-connection init hook, run once the whole chain is wired and
    /// before any item flows.
    fn init(&mut self, _ctx: &MiddlewareContext, _peer: &Arc<PeerConnection>) -> Result<(), TransformError> {
        Ok(())
    }

    /// Process one item, emitting zero or more items.
    fn transform(&mut self, item: Payload, out: &mut Outlet) -> Result<(), TransformError>;

    /// Called once after the input ended.
    fn finish(&mut self, _out: &mut Outlet) -> Result<(), TransformError> {
        Ok(())
    }
}

/// Produces a fresh [`Transform`] per connection.
pub trait TransformFactory: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str {
        "middleware"
    }

    /// Registration hook, run once when the factory is added to an overlay
    /// and before it is appended to the stack.
    fn on_register(&self, _ctx: &MiddlewareContext) -> OverlayResult<()> {
        Ok(())
    }

    /// Build the transform for `peer`.
    fn create(&self, peer: &Arc<PeerConnection>) -> Result<Box<dyn Transform>, TransformError>;
}

impl<F> TransformFactory for F
where
    F: Fn(&Arc<PeerConnection>) -> Box<dyn Transform> + Send + Sync + 'static,
{
    fn create(&self, peer: &Arc<PeerConnection>) -> Result<Box<dyn Transform>, TransformError> {
        Ok(self(peer))
    }
}

/// The ordered, append-only factory list of one overlay.
#[derive(Clone, Default)]
pub struct MiddlewareStack {
    factories: Arc<RwLock<Vec<Arc<dyn TransformFactory>>>>,
}

impl MiddlewareStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the factory's registration hook, then append it.
    ///
    /// The lock is not held while the hook runs, so a hook may register
    /// further factories; those land before the factory itself.
    pub fn register(&self, factory: Arc<dyn TransformFactory>, ctx: &MiddlewareContext) -> OverlayResult<()> {
        factory.on_register(ctx)?;
        tracing::debug!(middleware = factory.name(), "Middleware registered");
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(factory);
        Ok(())
    }

    /// Copy of the current factory list, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<dyn TransformFactory>> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names of the registered factories, in order.
    pub fn names(&self) -> Vec<String> {
        self.snapshot().iter().map(|f| f.name().to_string()).collect()
    }

    /// Number of registered factories.
    pub fn len(&self) -> usize {
        self.factories.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no factory is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for MiddlewareStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareStack").field("factories", &self.names()).finish()
    }
}

/// What middleware may do to the overlay it is plugged into.
#[derive(Debug, Clone)]
pub struct MiddlewareContext {
    overlay_id: Uuid,
    stack: MiddlewareStack,
    events: EventBus,
}

impl MiddlewareContext {
    pub(crate) fn new(overlay_id: Uuid, stack: MiddlewareStack, events: EventBus) -> Self {
        Self {
            overlay_id,
            stack,
            events,
        }
    }

    /// Id of the overlay instance.
    pub fn overlay_id(&self) -> Uuid {
        self.overlay_id
    }

    /// Register another factory on the same overlay.
    pub fn register_factory(&self, factory: impl TransformFactory) -> OverlayResult<()> {
        self.stack.register(Arc::new(factory), self)
    }

    /// Publish an application-level notice to overlay observers.
    pub fn notify(&self, topic: impl Into<String>, payload: Value) {
        self.events.emit(OverlayEvent::Notice {
            topic: topic.into(),
            payload,
        });
    }
}
