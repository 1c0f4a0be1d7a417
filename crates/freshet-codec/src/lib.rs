//! Microbatch builder and wire codec.
//!
//! A producer accumulates rows and acknowledgment references into a
//! [`batch::MicrobatchBuilder`] under byte and row budgets, serializes it
//! with [`wire::pack_microbatch`], and consumers decode the mirror image
//! with [`wire::unpack_microbatch`] into a read-only [`batch::Microbatch`]
//! whose rows are zero-copy views into the receive buffer.

pub mod batch;
pub mod error;
pub mod schema;
pub mod wire;

pub use batch::{BatchLimits, Microbatch, MicrobatchBuilder};
pub use error::CodecError;
pub use schema::{ColumnDesc, TupleSchema};
