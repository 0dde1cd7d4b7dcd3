//! The overlay: many peer links seen as one duplex stream.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::{OverlayConfig, SeedAddress};
use crate::error::{OverlayError, OverlayResult};
use crate::events::{EventBus, OverlayEvent};
use crate::manager::{run_listener, ConnectionRegistry, ListenHandle, NetworkMaintainer};
use crate::middleware::{
    resolve_builtin, Builtin, MiddlewareContext, MiddlewareStack, Pipeline, TransformFactory, BUILTIN_NAMES,
};
use crate::peer::{
    drive_link, ConnectionDirection, DisconnectReason, PeerAddr, PeerCommand, PeerConnection, PeerId, PeerState,
};
use crate::protocol::Payload;
use crate::transport::{Link, Listener, TcpTransport, Transport};

/// Read side of an overlay: the merged output of every connection's pipeline.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<Payload>,
}

impl Inbox {
    /// Wait for the next item. `None` once the overlay shut down and every
    /// pipeline drained.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.rx.recv().await
    }

    /// Take the next item if one is ready.
    pub fn try_recv(&mut self) -> Option<Payload> {
        self.rx.try_recv().ok()
    }
}

struct Inner<T> {
    id: Uuid,
    transport: T,
    config: RwLock<OverlayConfig>,
    options: Mutex<HashMap<String, Value>>,
    registry: Mutex<ConnectionRegistry>,
    stack: MiddlewareStack,
    events: EventBus,
    inbox_tx: Mutex<Option<mpsc::UnboundedSender<Payload>>>,
    shutdown_tx: broadcast::Sender<()>,
    shut_down: AtomicBool,
    next_peer_id: AtomicU64,
    maintainer: Mutex<Option<JoinHandle<()>>>,
}

/// A peer-to-peer overlay.
///
/// Cheap to clone; every clone drives the same instance. Background tasks
/// hold clones too, so the instance lives until [`Overlay::shutdown`].
pub struct Overlay<T: Transport = TcpTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for Overlay<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Overlay<TcpTransport> {
    /// Create a TCP overlay.
    pub fn new(config: OverlayConfig) -> OverlayResult<(Self, Inbox)> {
        Self::with_transport(TcpTransport, config)
    }
}

impl<T: Transport> Overlay<T> {
    /// Create an overlay on top of `transport`.
    ///
    /// The middleware stack starts with a single passthrough entry. Nothing
    /// runs until [`Overlay::listen`], [`Overlay::connect`] or
    /// [`Overlay::start`] is called.
    pub fn with_transport(transport: T, config: OverlayConfig) -> OverlayResult<(Self, Inbox)> {
        config.validate()?;

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        let overlay = Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                transport,
                config: RwLock::new(config),
                options: Mutex::new(HashMap::new()),
                registry: Mutex::new(ConnectionRegistry::new()),
                stack: MiddlewareStack::new(),
                events: EventBus::new(),
                inbox_tx: Mutex::new(Some(inbox_tx)),
                shutdown_tx,
                shut_down: AtomicBool::new(false),
                next_peer_id: AtomicU64::new(1),
                maintainer: Mutex::new(None),
            }),
        };
        overlay.use_middleware(Builtin::PASSTHROUGH)?;

        tracing::debug!(id = %overlay.id(), "Overlay created");
        Ok((overlay, Inbox { rx: inbox_rx }))
    }

    /// Instance id.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Copy of the live configuration.
    pub fn config(&self) -> OverlayConfig {
        self.inner
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Capability handle given to middleware hooks.
    pub fn context(&self) -> MiddlewareContext {
        MiddlewareContext::new(self.inner.id, self.inner.stack.clone(), self.inner.events.clone())
    }

    /// Register one middleware factory.
    ///
    /// Its registration hook runs first; a hook error aborts the call and
    /// the factory is not added.
    pub fn use_middleware(&self, factory: impl TransformFactory) -> OverlayResult<&Self> {
        self.inner.stack.register(Arc::new(factory), &self.context())?;
        Ok(self)
    }

    /// Register factories in order. Stops at the first hook error.
    pub fn use_all<I>(&self, factories: I) -> OverlayResult<&Self>
    where
        I: IntoIterator<Item = Arc<dyn TransformFactory>>,
    {
        let ctx = self.context();
        for factory in factories {
            self.inner.stack.register(factory, &ctx)?;
        }
        Ok(self)
    }

    /// Register built-in middleware by name.
    ///
    /// Every name is resolved before anything is registered, so an unknown
    /// name leaves the stack untouched.
    pub fn use_named<S: AsRef<str>>(&self, names: &[S]) -> OverlayResult<&Self> {
        let resolved = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                resolve_builtin(name).ok_or_else(|| {
                    OverlayError::Configuration(format!(
                        "unknown middleware '{}', expected one of: {}",
                        name,
                        BUILTIN_NAMES.join(", ")
                    ))
                })
            })
            .collect::<OverlayResult<Vec<Builtin>>>()?;

        self.use_all(resolved.into_iter().map(|b| Arc::new(b) as Arc<dyn TransformFactory>))
    }

    /// Names of the registered middleware, in wiring order.
    pub fn middleware_names(&self) -> Vec<String> {
        self.inner.stack.names()
    }

    /// Store an option.
    ///
    /// `min_peers`, `max_peers` and `seeds` update the live configuration
    /// and are type-checked; a bound change that would leave `min_peers`
    /// above `max_peers` is rejected and nothing is stored. Other keys are
    /// kept as given.
    pub fn set(&self, key: &str, value: Value) -> OverlayResult<Value> {
        match key {
            "min_peers" | "max_peers" => {
                let count = value
                    .as_u64()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| {
                        OverlayError::Configuration(format!("{} must be a non-negative integer, got {}", key, value))
                    })?;
                let mut config = self.inner.config.write().unwrap_or_else(PoisonError::into_inner);
                let mut updated = config.clone();
                if key == "min_peers" {
                    updated.min_peers = count;
                } else {
                    updated.max_peers = count;
                }
                updated.validate()?;
                *config = updated;
            }
            "seeds" => {
                let seeds = value
                    .as_array()
                    .ok_or_else(|| OverlayError::Configuration(format!("seeds must be an array, got {}", value)))?
                    .iter()
                    .map(|seed| match seed.as_str() {
                        Some(s) => s.parse::<SeedAddress>(),
                        None => Err(OverlayError::Configuration(format!(
                            "seed must be a \"host:port\" string, got {}",
                            seed
                        ))),
                    })
                    .collect::<OverlayResult<Vec<_>>>()?;
                self.inner
                    .config
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .seeds = seeds;
            }
            _ => {
                self.inner
                    .options
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key.to_string(), value.clone());
            }
        }
        Ok(value)
    }

    /// Read an option back.
    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            "min_peers" => Some(Value::from(self.config().min_peers)),
            "max_peers" => Some(Value::from(self.config().max_peers)),
            "seeds" => {
                let seeds: Vec<String> = self.config().seeds.iter().map(ToString::to_string).collect();
                Some(Value::from(seeds))
            }
            _ => self
                .inner
                .options
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(key)
                .cloned(),
        }
    }

    /// Bind a listener and accept inbound peers until shutdown.
    pub async fn listen(&self, addr: SocketAddr) -> OverlayResult<ListenHandle> {
        if self.is_shut_down() {
            return Err(OverlayError::Shutdown);
        }

        let listener = self.inner.transport.listen(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "Starting server");

        let task = tokio::spawn(run_listener(
            self.clone(),
            listener,
            self.inner.shutdown_tx.subscribe(),
        ));
        Ok(ListenHandle::new(local_addr, task))
    }

    /// Dial `addr` in the background.
    ///
    /// The returned connection is tracked right away in `connecting` state;
    /// writes made before the link is up are queued. A failed dial is logged
    /// and the connection silently dropped from the registry.
    pub fn connect(&self, addr: PeerAddr) -> Arc<PeerConnection> {
        let (conn, commands) = PeerConnection::new(
            self.next_peer_id(),
            ConnectionDirection::Outbound,
            Some(addr.clone()),
            PeerState::Connecting,
        );
        self.with_registry_mut(|registry| registry.add(ConnectionDirection::Outbound, conn.clone()));
        tracing::debug!(peer = %conn.id(), addr = %addr, "Connecting to peer");

        let overlay = self.clone();
        let pending = conn.clone();
        tokio::spawn(async move { overlay.dial(pending, addr, commands).await });

        conn
    }

    /// Deduplicated snapshot of the tracked connections.
    pub fn peers(&self) -> Vec<Arc<PeerConnection>> {
        self.with_registry(ConnectionRegistry::list)
    }

    /// Like [`Overlay::peers`], calling `visitor` for each entry.
    ///
    /// The visitor runs after the registry lock is released, so it may call
    /// back into the overlay.
    pub fn peers_with<F>(&self, visitor: F) -> Vec<Arc<PeerConnection>>
    where
        F: FnMut(&Arc<PeerConnection>),
    {
        let everyone = self.peers();
        everyone.iter().for_each(visitor);
        everyone
    }

    /// Close one connection.
    pub fn disconnect(&self, peer: PeerId) -> OverlayResult<()> {
        let conn = self
            .with_registry(|registry| registry.get(peer))
            .ok_or(OverlayError::PeerNotFound(peer))?;
        conn.disconnect()
    }

    /// Observe connection and middleware notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<OverlayEvent> {
        self.inner.events.subscribe()
    }

    /// Broadcast an item to every peer.
    ///
    /// The item is encoded once and queued on each connection returned by
    /// [`Overlay::peers`]. Returns how many connections accepted it; an
    /// encoding failure is logged and counts as zero.
    pub fn write(&self, item: impl Into<Payload>) -> usize {
        let payload = item.into();
        let encoded = match payload.encode() {
            Ok(text) => Bytes::from(text),
            Err(e) => {
                tracing::error!(kind = payload.kind(), error = %e, "Failed to encode payload, skipping write");
                return 0;
            }
        };

        let peers = self.peers();
        let mut delivered = 0;
        for peer in &peers {
            match peer.send(encoded.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::debug!(peer = %peer.id(), error = %e, "Skipping peer"),
            }
        }

        tracing::trace!(peers = peers.len(), delivered, bytes = encoded.len(), "Broadcast");
        delivered
    }

    /// Serialize `value` as JSON and broadcast it.
    pub fn write_value<V: Serialize + ?Sized>(&self, value: &V) -> usize {
        match Payload::from_serialize(value) {
            Ok(payload) => self.write(payload),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize value, skipping write");
                0
            }
        }
    }

    /// Spawn the network maintainer. It ticks immediately.
    ///
    /// Returns `false` if it was already running or the overlay is shut down.
    pub fn start(&self) -> bool {
        let mut slot = self.inner.maintainer.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() || self.is_shut_down() {
            return false;
        }

        let maintainer = NetworkMaintainer::new(self.clone());
        *slot = Some(tokio::spawn(maintainer.run(self.inner.shutdown_tx.subscribe())));
        tracing::info!(id = %self.id(), "Network maintainer started");
        true
    }

    /// Stop listeners and the maintainer and close every connection.
    ///
    /// The [`Inbox`] ends once the remaining pipelines drained.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(id = %self.id(), "Shutting down overlay");

        let _ = self.inner.shutdown_tx.send(());
        self.inner.inbox_tx.lock().unwrap_or_else(PoisonError::into_inner).take();

        for conn in self.with_registry_mut(ConnectionRegistry::drain) {
            let _ = conn.disconnect();
        }

        let maintainer = self.inner.maintainer.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = maintainer {
            let _ = task.await;
        }
    }

    /// Whether [`Overlay::shutdown`] was called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    pub(crate) fn with_registry<R>(&self, f: impl FnOnce(&ConnectionRegistry) -> R) -> R {
        f(&self.inner.registry.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn with_registry_mut<R>(&self, f: impl FnOnce(&mut ConnectionRegistry) -> R) -> R {
        f(&mut self.inner.registry.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn next_peer_id(&self) -> PeerId {
        PeerId::new(self.inner.next_peer_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Track an accepted link and wire it up.
    pub(crate) fn accept_link(&self, link: Link) {
        if self.is_shut_down() {
            tracing::debug!(remote = ?link.remote, "Dropping inbound link during shutdown");
            return;
        }

        let (conn, commands) = PeerConnection::new(
            self.next_peer_id(),
            ConnectionDirection::Inbound,
            link.remote.clone(),
            PeerState::Connected,
        );
        conn.set_handle(link.handle);
        tracing::info!(peer = %conn, "Inbound connection");

        self.with_registry_mut(|registry| registry.add(ConnectionDirection::Inbound, conn.clone()));
        self.establish(conn, link, commands);
    }

    async fn dial(
        &self,
        conn: Arc<PeerConnection>,
        addr: PeerAddr,
        commands: mpsc::UnboundedReceiver<PeerCommand>,
    ) {
        let link = match self.open_link(&addr).await {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!(peer = %conn.id(), error = %e, "Failed to connect to peer");
                self.discard(&conn);
                return;
            }
        };

        conn.set_handle(link.handle);
        if self.is_shut_down() || !conn.transition_to(PeerState::Connected) {
            tracing::debug!(peer = %conn.id(), "Dial completed after close");
            self.discard(&conn);
            return;
        }
        tracing::info!(peer = %conn, "Outbound connection");
        self.establish(conn, link, commands);
    }

    async fn open_link(&self, addr: &PeerAddr) -> OverlayResult<Link> {
        let dial = self.inner.transport.dial(addr);
        let result = match self.config().dial_timeout {
            Some(limit) => timeout(limit, dial)
                .await
                .map_err(|_| OverlayError::DialTimeout { addr: addr.clone() })?,
            None => dial.await,
        };
        result.map_err(|source| OverlayError::Dial {
            addr: addr.clone(),
            source,
        })
    }

    /// Wire the pipeline of a connected peer and run its link.
    fn establish(
        &self,
        conn: Arc<PeerConnection>,
        link: Link,
        commands: mpsc::UnboundedReceiver<PeerCommand>,
    ) {
        let sink = self.inner.inbox_tx.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let sink = match sink {
            Some(sink) => sink,
            None => {
                self.discard(&conn);
                return;
            }
        };

        let factories = self.inner.stack.snapshot();
        let pipeline = match Pipeline::build(&factories, &conn, &self.context(), sink) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                tracing::error!(peer = %conn.id(), error = %e, "Failed to wire middleware");
                self.discard(&conn);
                return;
            }
        };

        self.inner.events.emit(OverlayEvent::PeerConnected {
            peer: conn.id(),
            addr: conn.remote().cloned(),
        });

        let overlay = self.clone();
        let read_buffer_size = self.config().read_buffer_size;
        tokio::spawn(async move {
            let reason = drive_link(conn.clone(), link, commands, pipeline.head(), read_buffer_size).await;
            overlay.closed(&conn, &reason);
            pipeline.join().await;
        });
    }

    /// Drop a connection that never made it to `connected`.
    fn discard(&self, conn: &PeerConnection) {
        self.with_registry_mut(|registry| registry.remove(conn));
        conn.transition_to(PeerState::Closed);
    }

    fn closed(&self, conn: &PeerConnection, reason: &DisconnectReason) {
        self.with_registry_mut(|registry| registry.remove(conn));
        if conn.transition_to(PeerState::Closed) {
            tracing::info!(peer = %conn.id(), reason = %reason, "Peer disconnected");
            self.inner.events.emit(OverlayEvent::PeerDisconnected {
                peer: conn.id(),
                addr: conn.remote().cloned(),
            });
        }
    }
}

impl<T: Transport> fmt::Debug for Overlay<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overlay")
            .field("id", &self.inner.id)
            .field("middleware", &self.inner.stack)
            .field("peers", &self.peers().len())
            .finish_non_exhaustive()
    }
}
