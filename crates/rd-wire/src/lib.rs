//! rd-sync Wire Protocol - framing, serialization and routing
//!
//! This crate implements the byte-level half of the protocol:
//! - Primitive buffers (little-endian scalars, LEB128 varints)
//! - Frames: `[entity id: varint][length: varint][payload]`
//! - The positional serialization contract and polymorphic registry
//! - The message broker routing frames to bound entities
//! - The wire: single outbound writer plus inbound decoding

pub mod broker;
pub mod buffer;
pub mod frame;
pub mod marshal;
pub mod serializers;
pub mod wire;

pub use broker::*;
pub use buffer::*;
pub use frame::*;
pub use marshal::*;
pub use serializers::*;
pub use wire::*;
