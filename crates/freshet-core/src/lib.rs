//! Core freshet primitives shared across crates.
//!
//! Includes process/query identifiers, batch and delivery-level tags, the
//! query-id bitmap, and the tagged acknowledgment-slot reference.

pub mod queryset;
pub mod types;

pub use queryset::QuerySet;
pub use types::{AckRef, BatchKind, DeliveryLevel, GroupHash, ProcessId, ProcessRole, QueryId};
