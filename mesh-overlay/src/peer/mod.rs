//! Peer connection management.
//!
//! This module provides:
//! - Peer identification and addressing
//! - Connection state machine
//! - Per-link read/write loop

pub mod connection;
pub mod info;
pub mod state;

// Re-export main types
pub use connection::{drive_link, DisconnectReason, PeerCommand, PeerConnection};
pub use info::{ConnectionDirection, HandleId, PeerAddr, PeerId};
pub use state::PeerState;
