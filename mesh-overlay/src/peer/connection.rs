//! Peer connection handle and per-link read/write loop.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::codec::{BytesCodec, FramedRead};

use crate::error::{OverlayError, OverlayResult};
use crate::peer::{ConnectionDirection, HandleId, PeerAddr, PeerId, PeerState};
use crate::protocol::Payload;
use crate::transport::Link;

/// Command sent to a connection's link loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCommand {
    /// Write these bytes to the peer.
    Send(Bytes),
    /// Close the link.
    Disconnect,
}

/// Why a link loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The remote end closed the stream.
    RemoteClosed,
    /// We asked the link to close.
    LocalClosed,
    /// Reading or writing failed.
    Error(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::RemoteClosed => write!(f, "remote closed"),
            DisconnectReason::LocalClosed => write!(f, "local close"),
            DisconnectReason::Error(e) => write!(f, "error: {}", e),
        }
    }
}

/// A transport connection plus the metadata the overlay tracks for it.
///
/// Shared as `Arc<PeerConnection>`; the registry owns the long-lived
/// reference and everything else holds transient clones.
pub struct PeerConnection {
    id: PeerId,
    direction: ConnectionDirection,
    remote: Option<PeerAddr>,
    handle: OnceLock<HandleId>,
    state: Mutex<PeerState>,
    command_tx: mpsc::UnboundedSender<PeerCommand>,
}

impl PeerConnection {
    /// Create a connection in the given initial state.
    ///
    /// Returns the receiving end of its command channel, which the link loop
    /// drains once a transport stream is attached. Commands sent before that
    /// are queued.
    pub fn new(
        id: PeerId,
        direction: ConnectionDirection,
        remote: Option<PeerAddr>,
        state: PeerState,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PeerCommand>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            id,
            direction,
            remote,
            handle: OnceLock::new(),
            state: Mutex::new(state),
            command_tx,
        });
        (conn, command_rx)
    }

    /// Identity of this connection.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Direction of the connection.
    pub fn direction(&self) -> ConnectionDirection {
        self.direction
    }

    /// Remote address, when the transport knows it.
    pub fn remote(&self) -> Option<&PeerAddr> {
        self.remote.as_ref()
    }

    /// Transport handle, once a stream is attached.
    pub fn handle(&self) -> Option<HandleId> {
        self.handle.get().copied()
    }

    /// Attach the transport handle. Only the first call has an effect.
    pub fn set_handle(&self, handle: HandleId) -> bool {
        self.handle.set(handle).is_ok()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PeerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next` if the transition is legal.
    ///
    /// Returns `false` when the transition was refused, which makes every
    /// transition (and the notification tied to it) happen at most once.
    pub fn transition_to(&self, next: PeerState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.can_transition_to(next) {
            return false;
        }
        tracing::debug!(peer = %self.id, from = %*state, to = %next, "Peer state transition");
        *state = next;
        true
    }

    /// Check if this is an outbound connection.
    pub fn is_outbound(&self) -> bool {
        self.direction == ConnectionDirection::Outbound
    }

    /// Check if this is an inbound connection.
    pub fn is_inbound(&self) -> bool {
        self.direction == ConnectionDirection::Inbound
    }

    /// Queue bytes for the peer. Never blocks.
    pub fn send(&self, data: Bytes) -> OverlayResult<()> {
        self.command_tx
            .send(PeerCommand::Send(data))
            .map_err(|_| OverlayError::ChannelSend(format!("{} command channel closed", self.id)))
    }

    /// Ask the link loop to close the connection.
    pub fn disconnect(&self) -> OverlayResult<()> {
        self.command_tx
            .send(PeerCommand::Disconnect)
            .map_err(|_| OverlayError::ChannelSend(format!("{} command channel closed", self.id)))
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("remote", &self.remote)
            .field("handle", &self.handle())
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.remote {
            Some(addr) => write!(f, "{} ({}, {}, {})", self.id, addr, self.direction, self.state()),
            None => write!(f, "{} (?, {}, {})", self.id, self.direction, self.state()),
        }
    }
}

/// Run the read/write loop of one link until it ends.
///
/// Reads are pushed into `head` (the first pipeline stage) as
/// [`Payload::Bytes`] chunks in arrival order; queued commands are written
/// to the stream. The loop ends on remote close, I/O error, or a
/// [`PeerCommand::Disconnect`].
pub async fn drive_link(
    conn: Arc<PeerConnection>,
    link: Link,
    mut commands: mpsc::UnboundedReceiver<PeerCommand>,
    head: mpsc::UnboundedSender<Payload>,
    read_buffer_size: usize,
) -> DisconnectReason {
    let (read_half, mut write_half) = tokio::io::split(link.stream);
    let mut frames = FramedRead::with_capacity(read_half, BytesCodec::new(), read_buffer_size);

    loop {
        tokio::select! {
            frame = frames.next() => {
                match frame {
                    Some(Ok(chunk)) => {
                        if head.send(Payload::Bytes(chunk.freeze())).is_err() {
                            tracing::debug!(peer = %conn.id(), "Pipeline gone, dropping read");
                        }
                    }
                    Some(Err(e)) => return DisconnectReason::Error(e.to_string()),
                    None => return DisconnectReason::RemoteClosed,
                }
            }

            command = commands.recv() => {
                match command {
                    Some(PeerCommand::Send(data)) => {
                        if let Err(e) = write_half.write_all(&data).await {
                            return DisconnectReason::Error(e.to_string());
                        }
                    }
                    Some(PeerCommand::Disconnect) | None => {
                        let _ = write_half.shutdown().await;
                        return DisconnectReason::LocalClosed;
                    }
                }
            }
        }
    }
}
