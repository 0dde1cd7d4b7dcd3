//! Connection management.
//!
//! - [`registry`] tracks who we are connected to
//! - [`inbound`] runs the accept loop
//! - [`maintainer`] dials seeds to keep outbound connectivity up

pub mod inbound;
pub mod maintainer;
pub mod registry;

pub use inbound::{run_listener, ListenHandle};
pub use maintainer::{plan_dials, NetworkMaintainer};
pub use registry::ConnectionRegistry;
