//! DemoRoot model
//!
//! Glue binding one application entity into the protocol: a root with a
//! property of each flavor, collections, a signal, a call and a nested
//! settings entity, plus the polymorphic payloads it carries.

pub mod payloads;
pub mod root;
pub mod settings;

pub use payloads::*;
pub use root::*;
pub use settings::*;
