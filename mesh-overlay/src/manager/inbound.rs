//! Inbound connection listener.

use std::net::SocketAddr;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::overlay::Overlay;
use crate::transport::{Listener, Transport};

/// A running accept loop.
#[derive(Debug)]
pub struct ListenHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ListenHandle {
    pub(crate) fn new(local_addr: SocketAddr, task: JoinHandle<()>) -> Self {
        Self { local_addr, task }
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting. Established connections are left alone.
    pub fn stop(&self) {
        self.task.abort();
    }

    /// Wait for the accept loop to end.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Accept links until shutdown, handing each one to the overlay.
pub async fn run_listener<T: Transport>(
    overlay: Overlay<T>,
    mut listener: T::Listener,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("Inbound listener shutting down");
                break;
            }

            result = listener.accept() => {
                match result {
                    Ok(link) => overlay.accept_link(link),
                    Err(e) => {
                        tracing::warn!(error = %e, "Error accepting connection");
                    }
                }
            }
        }
    }
}
