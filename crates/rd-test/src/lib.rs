//! Test harness for the reactive sync protocol
//!
//! This crate provides:
//! - A seeded simulated link reordering frames across entities
//! - A two-process harness pairing a client and a server protocol
//! - Logging setup for tests
//! - End-to-end scenarios and property tests

pub mod link;
pub mod logging;
pub mod pair;

pub use link::*;
pub use logging::*;
pub use pair::*;

#[cfg(test)]
mod laws;
#[cfg(test)]
mod scenarios;
