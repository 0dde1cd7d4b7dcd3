//! TCP transport.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

use crate::peer::PeerAddr;
use crate::transport::{next_handle_id, Link, Listener, Transport};

/// Transport over plain TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl TcpTransport {
    /// Create a TCP transport.
    pub fn new() -> Self {
        Self
    }
}

/// Bound TCP listener yielding inbound links.
#[derive(Debug)]
pub struct TcpLinkListener {
    inner: TcpListener,
}

fn into_link(stream: TcpStream, remote: PeerAddr) -> Link {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::warn!(addr = %remote, error = %e, "Failed to set TCP_NODELAY");
    }
    Link::new(stream, Some(remote), next_handle_id())
}

impl Listener for TcpLinkListener {
    async fn accept(&mut self) -> io::Result<Link> {
        let (stream, addr) = self.inner.accept().await?;
        Ok(into_link(stream, PeerAddr::from(addr)))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

impl Transport for TcpTransport {
    type Listener = TcpLinkListener;

    async fn listen(&self, addr: SocketAddr) -> io::Result<TcpLinkListener> {
        let inner = TcpListener::bind(addr).await?;
        Ok(TcpLinkListener { inner })
    }

    async fn dial(&self, addr: &PeerAddr) -> io::Result<Link> {
        let stream = TcpStream::connect((addr.host.as_str(), addr.port)).await?;
        Ok(into_link(stream, addr.clone()))
    }
}
