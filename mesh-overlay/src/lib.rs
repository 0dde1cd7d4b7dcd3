//! Peer-to-peer overlay networking.
//!
//! This crate turns a set of independent peer links into one logical duplex
//! stream:
//!
//! - Inbound and outbound connections are tracked and deduplicated
//! - A maintainer dials configured seeds while outbound connectivity is low
//! - Every connection gets its own chain of middleware transforms
//! - Reads from all pipelines merge into one [`Inbox`]; writes go to every peer
//!
//! # Architecture
//!
//! Each connection runs in its own tokio task, and each middleware stage of
//! its pipeline runs in another. Stages are linked by FIFO channels.
//!
//! ```text
//! Overlay
//! ├── Listener Task (accept inbound)
//! ├── Maintainer Task (dial seeds every interval)
//! ├── Link Task 1 (read/write loop) ──▶ stage 0 ──▶ ... ──▶ Inbox
//! └── Link Task 2 (read/write loop) ──▶ stage 0 ──▶ ... ──▶ Inbox
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use mesh_overlay::{Overlay, OverlayConfig};
//!
//! let config = OverlayConfig::new().with_seed_strs(&["10.0.0.1:9000"])?;
//! let (overlay, mut inbox) = Overlay::new(config)?;
//! overlay.use_named(&["lines"])?;
//! overlay.listen("0.0.0.0:9000".parse()?).await?;
//! overlay.start();
//!
//! overlay.write("hello");
//! while let Some(item) = inbox.recv().await {
//!     println!("{}", item.encode()?);
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;

pub mod manager;
pub mod middleware;
pub mod overlay;
pub mod peer;
pub mod protocol;
pub mod transport;

// Re-export main types
pub use config::{OverlayConfig, SeedAddress, DEFAULT_MAX_PEERS, DEFAULT_MIN_PEERS};
pub use error::{OverlayError, OverlayResult, TransformError};
pub use events::OverlayEvent;
pub use manager::{ConnectionRegistry, ListenHandle, NetworkMaintainer};
pub use middleware::{MiddlewareContext, Outlet, Transform, TransformFactory};
pub use overlay::{Inbox, Overlay};
pub use peer::{ConnectionDirection, PeerAddr, PeerConnection, PeerId, PeerState};
pub use protocol::Payload;
pub use transport::{Link, Listener, TcpTransport, Transport};
