//! Payloads carried by the overlay.
//!
//! There is no wire framing: bytes read from a link enter the pipeline as
//! they arrive, and writes go out as their string encoding.

pub mod payload;

pub use payload::Payload;
