//! rd-sync Core - Fundamental types and primitives
//!
//! This crate defines the substrate shared by every layer of the model-sync
//! protocol:
//! - Hierarchical entity identifiers (RdId, IdScope, Identities)
//! - Lifetimes: scoped, ordered cleanup and cancellation
//! - Lifetime-bound async channels
//! - The single logical execution queue (Scheduler)
//! - Protocol configuration and errors

pub mod channel;
pub mod config;
pub mod error;
pub mod id;
pub mod lifetime;
pub mod scheduler;

pub use channel::AsyncChannel;
pub use config::*;
pub use error::*;
pub use id::*;
pub use lifetime::*;
pub use scheduler::*;
