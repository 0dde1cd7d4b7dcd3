//! Overlay error types.

use std::io;
use thiserror::Error;

use crate::peer::{PeerAddr, PeerId};

/// Error raised by a middleware transform, its factory or one of its hooks.
#[derive(Debug, Error)]
#[error("{middleware}: {message}")]
pub struct TransformError {
    /// Name of the middleware that failed.
    pub middleware: String,
    /// Human readable reason.
    pub message: String,
}

impl TransformError {
    /// Create a transform error for the named middleware.
    pub fn new(middleware: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            middleware: middleware.into(),
            message: message.into(),
        }
    }
}

/// Overlay-level errors.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// I/O error from the transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid middleware registration or option value.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Outbound connection attempt failed.
    #[error("Failed to dial {addr}: {source}")]
    Dial {
        addr: PeerAddr,
        #[source]
        source: io::Error,
    },

    /// Outbound connection attempt did not complete in time.
    #[error("Dial timeout to {addr}")]
    DialTimeout { addr: PeerAddr },

    /// Broadcast payload could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A middleware factory or hook failed.
    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    /// Peer is not tracked by the registry.
    #[error("Peer not found: {0}")]
    PeerNotFound(PeerId),

    /// Channel send error.
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Overlay is shutting down.
    #[error("Overlay shutting down")]
    Shutdown,
}

/// Result type for overlay operations.
pub type OverlayResult<T> = Result<T, OverlayError>;
