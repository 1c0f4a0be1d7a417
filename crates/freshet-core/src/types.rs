/// Identifier of a continuous query registered in the catalog.
pub type QueryId = u32;
/// Transport-level identifier of one process endpoint.
pub type ProcessId = u64;
/// Hash that shards combiner output over workers by aggregation group.
pub type GroupHash = u64;

/// Payload shape of a microbatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// Rows destined for one or more worker-evaluated queries.
    WorkerRows,
    /// Partial-aggregate rows destined for a single combiner-evaluated query.
    CombinerRows,
    /// Rowless flush marker carrying only acknowledgment references.
    Flush,
}

impl BatchKind {
    /// Wire tag for this kind.
    pub fn to_u8(self) -> u8 {
        match self {
            BatchKind::WorkerRows => 0,
            BatchKind::CombinerRows => 1,
            BatchKind::Flush => 2,
        }
    }

    /// Parses a wire tag.
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(BatchKind::WorkerRows),
            1 => Some(BatchKind::CombinerRows),
            2 => Some(BatchKind::Flush),
            _ => None,
        }
    }
}

/// Requested delivery guarantee for a send, encoded in the top two bits of
/// an acknowledgment-slot id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeliveryLevel {
    /// No confirmation; the send returns as soon as the batch is written.
    FireAndForget,
    /// Confirmed once every worker has received the rows.
    Received,
    /// Confirmed once workers and combiners have committed the rows.
    Committed,
    /// Committed, plus combiners have flushed downstream state.
    Flush,
}

impl DeliveryLevel {
    /// Two-bit encoding used in slot ids.
    pub fn to_bits(self) -> u64 {
        match self {
            DeliveryLevel::FireAndForget => 0,
            DeliveryLevel::Received => 1,
            DeliveryLevel::Committed => 2,
            DeliveryLevel::Flush => 3,
        }
    }

    /// Decodes the two-bit slot-id prefix.
    pub fn from_bits(bits: u64) -> Self {
        match bits & 0x3 {
            0 => DeliveryLevel::FireAndForget,
            1 => DeliveryLevel::Received,
            2 => DeliveryLevel::Committed,
            _ => DeliveryLevel::Flush,
        }
    }
}

/// Role of a process in the continuous-query topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// Client write process (INSERT/COPY path); not part of any write cycle.
    Client,
    /// Per-row/per-group evaluation process.
    Worker,
    /// Partial-aggregate merge process.
    Combiner,
    /// Relay process that forwards batches on behalf of saturated senders.
    Queue,
}

/// Tagged reference to an acknowledgment slot: arena index plus the id the
/// referencing process observed at claim time.
///
/// Never owns the slot; consumers must re-validate the tag against the
/// slot's current id before trusting its counters, since a released slot
/// may be reclaimed under a different id at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckRef {
    /// Position of the slot in the shared arena.
    pub slot: u64,
    /// Slot id observed when the reference was taken.
    pub tag: u64,
}

impl AckRef {
    /// Delivery level encoded in the referenced slot id.
    pub fn level(&self) -> DeliveryLevel {
        DeliveryLevel::from_bits(self.tag >> 62)
    }
}

#[cfg(test)]
mod tests {
    use super::{AckRef, BatchKind, DeliveryLevel};

    #[test]
    fn batch_kind_tags_round_trip() {
        for kind in [
            BatchKind::WorkerRows,
            BatchKind::CombinerRows,
            BatchKind::Flush,
        ] {
            assert_eq!(BatchKind::from_u8(kind.to_u8()), Some(kind));
        }
        assert_eq!(BatchKind::from_u8(3), None);
    }

    #[test]
    fn delivery_level_bits_round_trip() {
        for level in [
            DeliveryLevel::FireAndForget,
            DeliveryLevel::Received,
            DeliveryLevel::Committed,
            DeliveryLevel::Flush,
        ] {
            assert_eq!(DeliveryLevel::from_bits(level.to_bits()), level);
        }
    }

    #[test]
    fn ack_ref_level_reads_top_two_bits() {
        let r = AckRef {
            slot: 7,
            tag: (DeliveryLevel::Committed.to_bits() << 62) | 0x1234,
        };
        assert_eq!(r.level(), DeliveryLevel::Committed);
    }
}
