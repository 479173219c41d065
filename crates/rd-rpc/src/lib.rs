//! rd-sync RPC - calls and endpoints on top of the reactive protocol
//!
//! A call is a single bound entity carrying three kinds of payload:
//! requests, cancellations and responses, all keyed by a correlation id
//! allocated from the protocol's dynamic id space.

pub mod call;
pub mod endpoint;
pub mod task;

pub use call::*;
pub use endpoint::*;
pub use task::*;
