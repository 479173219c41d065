//! rd-sync Reactive Layer - shared live object model
//!
//! This crate implements the state-carrying half of the protocol:
//! - The protocol instance tying identities, serializers and the wire together
//! - Binding of primitives to the message broker
//! - Reactive primitives: property, signal, list, set, map
//! - Extension roots that identify and bind a group of primitives at once

pub mod bindable;
pub mod ext;
pub mod list;
pub mod map;
pub mod property;
pub mod protocol;
pub mod set;
pub mod signal;
pub mod source;

pub use bindable::*;
pub use ext::*;
pub use list::*;
pub use map::*;
pub use property::*;
pub use protocol::*;
pub use set::*;
pub use signal::*;
pub use source::*;
