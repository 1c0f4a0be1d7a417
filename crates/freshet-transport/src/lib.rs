//! Point-to-point messaging contract between pipeline processes.
//!
//! Every process owns exactly one inbound mailbox addressed by its
//! [`ProcessId`](freshet_core::ProcessId). The contract is deliberately
//! narrow: bounded mailboxes, non-blocking or blocking sends, and timed
//! receives. The in-memory hub is the reference implementation and the
//! backbone of the end-to-end tests.

pub mod memory;
pub mod pubsub;

pub use memory::{InMemoryHub, MemoryEndpoint};
pub use pubsub::PubSubTransport;
