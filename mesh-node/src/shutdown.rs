//! Graceful shutdown coordination.
//!
//! A node stops on SIGINT/SIGTERM (Ctrl+C elsewhere) or when something
//! holding its [`ShutdownTx`] fires it, whichever comes first.

use std::fmt;
use std::io;

use tokio::sync::broadcast;

/// Shutdown signal sender.
pub type ShutdownTx = broadcast::Sender<()>;

/// Shutdown signal receiver.
pub type ShutdownRx = broadcast::Receiver<()>;

/// Create a shutdown channel.
pub fn shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    broadcast::channel(1)
}

/// What ended a [`wait_for_shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    /// The process received this signal.
    Signal(&'static str),
    /// The shutdown channel fired (or every sender was dropped).
    Requested,
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownCause::Signal(name) => write!(f, "{}", name),
            ShutdownCause::Requested => write!(f, "shutdown requested"),
        }
    }
}

/// Wait for an OS signal or for `rx` to fire.
///
/// Fails only if the signal handlers cannot be installed.
pub async fn wait_for_shutdown(rx: &mut ShutdownRx) -> io::Result<ShutdownCause> {
    tokio::select! {
        signal = os_signal() => signal.map(ShutdownCause::Signal),
        _ = rx.recv() => Ok(ShutdownCause::Requested),
    }
}

#[cfg(unix)]
async fn os_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => Ok("SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn os_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}
