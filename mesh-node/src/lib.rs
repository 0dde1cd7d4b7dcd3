//! Mesh overlay node library.
//!
//! This library provides the components of the `mesh-node` binary: CLI
//! parsing, configuration, the stdin/stdout bridge and shutdown handling.
//! It is also used by the integration tests.

pub mod cli;
pub mod config;
pub mod node;
pub mod shutdown;
