//! Transport seam.
//!
//! The overlay never touches sockets directly. It asks a [`Transport`] to
//! dial or to listen, and receives [`Link`]s: a duplex byte stream plus the
//! remote address and an opaque handle id used for deduplication.
//!
//! ```text
//! Transport::listen(addr) ──▶ Listener::accept() ──▶ Link (inbound)
//! Transport::dial(addr)   ────────────────────────▶ Link (outbound)
//! ```

pub mod tcp;

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::peer::{HandleId, PeerAddr};

pub use tcp::{TcpLinkListener, TcpTransport};

/// Process-wide counter for transport handle ids.
static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh transport handle id.
pub fn next_handle_id() -> HandleId {
    HandleId(HANDLE_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Byte stream carried by a link.
pub trait LinkStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> LinkStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// An established transport connection.
pub struct Link {
    /// Duplex byte stream.
    pub stream: Box<dyn LinkStream>,
    /// Remote address, if the transport knows it.
    pub remote: Option<PeerAddr>,
    /// Opaque handle id.
    pub handle: HandleId,
}

impl Link {
    /// Wrap a stream into a link.
    pub fn new(stream: impl LinkStream, remote: Option<PeerAddr>, handle: HandleId) -> Self {
        Self {
            stream: Box::new(stream),
            remote,
            handle,
        }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("remote", &self.remote)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Accepts inbound links.
pub trait Listener: Send + 'static {
    /// Wait for the next inbound link.
    fn accept(&mut self) -> impl Future<Output = io::Result<Link>> + Send;

    /// Address this listener is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Listen and dial primitives the overlay is built on.
pub trait Transport: Send + Sync + 'static {
    /// Listener type produced by [`Transport::listen`].
    type Listener: Listener;

    /// Bind a listener.
    fn listen(&self, addr: SocketAddr) -> impl Future<Output = io::Result<Self::Listener>> + Send;

    /// Open an outbound link.
    fn dial(&self, addr: &PeerAddr) -> impl Future<Output = io::Result<Link>> + Send;
}
