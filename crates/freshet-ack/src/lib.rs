//! Process-wide acknowledgment registry.
//!
//! A fixed arena of slots with atomic delivery counters tracks how many
//! rows of a send have been received and acknowledged by worker and
//! combiner processes. Producers claim a slot by CAS, attach tagged
//! references to outgoing batches, wait on the derived predicates, and
//! release the slot; consumers bump counters through re-validated tags
//! only, which makes slot reclamation safe without any reader
//! coordination.

pub mod registry;
pub mod signals;
pub mod wait;

pub use registry::{AckCounters, AckError, AckRegistry, AckRole};
pub use signals::GroupSignals;
pub use wait::WaitOutcome;
