use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use thiserror::Error;
use tracing::warn;

use freshet_core::{AckRef, DeliveryLevel};

use crate::signals::GroupSignals;

/// Mask selecting the 62-bit nonce portion of a slot id.
const NONCE_MASK: u64 = 0x3FFF_FFFF_FFFF_FFFF;

/// Errors returned by registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AckError {
    /// The claim scan was interrupted by the cooperative shutdown flag.
    #[error("ack slot claim interrupted by shutdown")]
    ShuttingDown,
}

/// Which consumer role is posting an acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckRole {
    Worker,
    Combiner,
}

/// Snapshot of one slot's delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckCounters {
    pub sent_worker_rows: u64,
    pub sent_combiner_rows: u64,
    pub worker_received: u64,
    pub worker_acks: u64,
    pub combiner_acks: u64,
}

/// One arena entry. An id of zero means the slot is free; a non-zero id
/// carries the delivery level in its top two bits and a random nonce in
/// the rest. Counters are only meaningful while the id matches the value
/// the claiming producer observed.
#[derive(Debug)]
struct AckSlot {
    id: AtomicU64,
    sent_worker_rows: AtomicU64,
    sent_combiner_rows: AtomicU64,
    worker_received: AtomicU64,
    worker_acks: AtomicU64,
    combiner_acks: AtomicU64,
}

impl AckSlot {
    fn new() -> Self {
        Self {
            id: AtomicU64::new(0),
            sent_worker_rows: AtomicU64::new(0),
            sent_combiner_rows: AtomicU64::new(0),
            worker_received: AtomicU64::new(0),
            worker_acks: AtomicU64::new(0),
            combiner_acks: AtomicU64::new(0),
        }
    }

    fn reset_counters(&self) {
        self.sent_worker_rows.store(0, Ordering::Relaxed);
        self.sent_combiner_rows.store(0, Ordering::Relaxed);
        self.worker_received.store(0, Ordering::Relaxed);
        self.worker_acks.store(0, Ordering::Relaxed);
        self.combiner_acks.store(0, Ordering::Relaxed);
    }
}

/// Fixed arena of acknowledgment slots plus the monotonic claim cursor.
///
/// The whole structure is one allocation with no interior pointers,
/// initialized once at process-group startup and shared for the group's
/// lifetime. All cross-process mutation goes through the atomics; there
/// are no locks and no multi-field critical sections.
#[derive(Debug)]
pub struct AckRegistry {
    cursor: AtomicU64,
    slots: Box<[AckSlot]>,
}

impl AckRegistry {
    /// Creates a registry with `capacity` slots, sized for the maximum
    /// number of concurrently producing backends.
    pub fn new(capacity: usize) -> Self {
        let slots: Vec<AckSlot> = (0..capacity.max(1)).map(|_| AckSlot::new()).collect();
        Self {
            cursor: AtomicU64::new(0),
            slots: slots.into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claims a free slot for a send at `level`.
    ///
    /// Generates a candidate id (never zero) and scans from the claim
    /// cursor, CASing each slot's id from zero. The scan is intentionally
    /// unbounded under sustained slot exhaustion, but it observes the
    /// shutdown flag so a stuck producer still terminates cleanly.
    pub fn claim(
        &self,
        level: DeliveryLevel,
        signals: &GroupSignals,
    ) -> Result<AckRef, AckError> {
        let mut rng = rand::thread_rng();
        let mut nonce = rng.gen::<u64>() & NONCE_MASK;
        if level == DeliveryLevel::FireAndForget && nonce == 0 {
            // Zero is reserved for "free".
            nonce = 1;
        }
        let id = (level.to_bits() << 62) | nonce;

        let mut attempts: u64 = 0;
        loop {
            if signals.is_shutting_down() {
                return Err(AckError::ShuttingDown);
            }

            let index =
                (self.cursor.fetch_add(1, Ordering::Relaxed) % self.slots.len() as u64) as usize;
            let slot = &self.slots[index];

            if slot
                .id
                .compare_exchange(0, id, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                // Reset after the claim succeeds, never before: a racing
                // release may only touch a slot we do not yet own.
                slot.reset_counters();
                return Ok(AckRef {
                    slot: index as u64,
                    tag: id,
                });
            }

            attempts += 1;
            if attempts % self.slots.len() as u64 == 0 {
                warn!(attempts, "all ack slots are held; continuing to scan");
            }
        }
    }

    /// Frees a claimed slot.
    ///
    /// No reader coordination: a consumer still holding a reference will
    /// simply fail tag re-validation after the slot is reclaimed.
    pub fn release(&self, ack: &AckRef) {
        if let Some(slot) = self.slots.get(ack.slot as usize) {
            slot.id.store(0, Ordering::Release);
        }
    }

    /// True while the slot's current id matches the reference's tag.
    pub fn validate(&self, ack: &AckRef) -> bool {
        self.slot(ack).is_some()
    }

    pub fn add_sent_worker_rows(&self, ack: &AckRef, n: u64) {
        if let Some(slot) = self.slot(ack) {
            slot.sent_worker_rows.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn add_sent_combiner_rows(&self, ack: &AckRef, n: u64) {
        if let Some(slot) = self.slot(ack) {
            slot.sent_combiner_rows.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn add_worker_received(&self, ack: &AckRef, n: u64) {
        if let Some(slot) = self.slot(ack) {
            slot.worker_received.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Posts `n` acknowledgments from the given consumer role.
    pub fn add_acks(&self, ack: &AckRef, role: AckRole, n: u64) {
        if let Some(slot) = self.slot(ack) {
            match role {
                AckRole::Worker => slot.worker_acks.fetch_add(n, Ordering::Relaxed),
                AckRole::Combiner => slot.combiner_acks.fetch_add(n, Ordering::Relaxed),
            };
        }
    }

    /// Every row sent to workers has been received by one.
    pub fn is_received(&self, ack: &AckRef) -> bool {
        match self.slot(ack) {
            Some(slot) => {
                slot.worker_received.load(Ordering::Relaxed)
                    >= slot.sent_worker_rows.load(Ordering::Relaxed)
            }
            None => false,
        }
    }

    /// Workers and combiners have both acknowledged everything sent to
    /// them.
    pub fn is_fully_acked(&self, ack: &AckRef) -> bool {
        match self.slot(ack) {
            Some(slot) => {
                slot.worker_acks.load(Ordering::Relaxed)
                    >= slot.sent_worker_rows.load(Ordering::Relaxed)
                    && slot.combiner_acks.load(Ordering::Relaxed)
                        >= slot.sent_combiner_rows.load(Ordering::Relaxed)
            }
            None => false,
        }
    }

    /// Counter snapshot, `None` if the reference no longer validates.
    pub fn counters(&self, ack: &AckRef) -> Option<AckCounters> {
        self.slot(ack).map(|slot| AckCounters {
            sent_worker_rows: slot.sent_worker_rows.load(Ordering::Relaxed),
            sent_combiner_rows: slot.sent_combiner_rows.load(Ordering::Relaxed),
            worker_received: slot.worker_received.load(Ordering::Relaxed),
            worker_acks: slot.worker_acks.load(Ordering::Relaxed),
            combiner_acks: slot.combiner_acks.load(Ordering::Relaxed),
        })
    }

    /// Tag-validated slot lookup; the heart of reclamation safety.
    fn slot(&self, ack: &AckRef) -> Option<&AckSlot> {
        let slot = self.slots.get(ack.slot as usize)?;
        if slot.id.load(Ordering::Acquire) == ack.tag {
            Some(slot)
        } else {
            None
        }
    }
}
