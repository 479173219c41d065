//! Transport layer for the reactive sync protocol
//!
//! This crate provides:
//! - A stream transport over any tokio `AsyncRead + AsyncWrite` (TCP, duplex pipes)
//! - A scheduler draining protocol work on a single tokio task

pub mod scheduler;
pub mod stream;

pub use scheduler::TokioScheduler;
pub use stream::*;
