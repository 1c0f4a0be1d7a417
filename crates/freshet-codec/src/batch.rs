use bytes::{BufMut, Bytes, BytesMut};
use freshet_core::{AckRef, BatchKind, GroupHash, QuerySet};

use crate::error::CodecError;
use crate::schema::TupleSchema;
use crate::wire;

/// Default serialized-size budget for one microbatch.
pub const DEFAULT_BYTE_BUDGET: usize = 1024 * 1024;
/// Default row-count budget for one microbatch.
pub const DEFAULT_ROW_BUDGET: u32 = 250;
/// Default headroom reserved for acknowledgment references.
pub const DEFAULT_ACK_RESERVE: usize = 2048;

/// Size of one packed ack reference: tag plus slot index.
const PACKED_ACK_SIZE: usize = 16;
/// Per-row length prefix.
const ROW_LEN_PREFIX: usize = 4;
/// Trailing group hash carried by each CombinerRows row.
const GROUP_HASH_SIZE: usize = 8;

/// Budgets applied while building a microbatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Hard cap on the packed batch, acks included.
    pub byte_budget: usize,
    /// Maximum rows per batch.
    pub row_budget: u32,
    /// Bytes of `byte_budget` held back for ack references.
    pub ack_reserve: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            byte_budget: DEFAULT_BYTE_BUDGET,
            row_budget: DEFAULT_ROW_BUDGET,
            ack_reserve: DEFAULT_ACK_RESERVE,
        }
    }
}

impl BatchLimits {
    /// Budget available to everything except the ack reserve.
    pub fn max_packed_size(&self) -> usize {
        self.byte_budget.saturating_sub(self.ack_reserve)
    }
}

/// Accumulates outgoing rows and ack references under byte/row budgets.
///
/// Builders are reused across send cycles: [`MicrobatchBuilder::reset`]
/// clears content but keeps allocated capacity.
#[derive(Debug)]
pub struct MicrobatchBuilder {
    pub(crate) kind: BatchKind,
    pub(crate) queries: QuerySet,
    pub(crate) schema: Option<TupleSchema>,
    pub(crate) record_schemas: Vec<(i32, TupleSchema)>,
    pub(crate) acks: Vec<AckRef>,
    pub(crate) buf: BytesMut,
    pub(crate) nrows: u32,
    overhead: usize,
    limits: BatchLimits,
}

impl MicrobatchBuilder {
    /// Creates a builder and precomputes a conservative upper bound on the
    /// packed size of everything except row content.
    ///
    /// `record_schemas` carries the sub-schema for each composite column,
    /// keyed by the column's type modifier; resolving those from the type
    /// catalog is the caller's concern.
    pub fn new(
        kind: BatchKind,
        queries: QuerySet,
        schema: Option<TupleSchema>,
        record_schemas: Vec<(i32, TupleSchema)>,
        limits: BatchLimits,
    ) -> Result<Self, CodecError> {
        // kind tag + ack count + row count
        let mut overhead = 1 + 4 + 4;

        match kind {
            BatchKind::WorkerRows => {
                if queries.is_empty() {
                    return Err(CodecError::InvalidBatch(
                        "worker batch requires at least one target query",
                    ));
                }
                let schema = schema
                    .as_ref()
                    .ok_or(CodecError::InvalidBatch("worker batch requires a schema"))?;
                schema.validate()?;
                overhead += 4 + 8 * queries.words().len();
                overhead += schema.max_packed_size();
                overhead += 4;
                for (_, nested) in &record_schemas {
                    nested.validate()?;
                    overhead += 4 + nested.max_packed_size();
                }
            }
            BatchKind::CombinerRows => {
                if queries.len() != 1 {
                    return Err(CodecError::InvalidBatch(
                        "combiner batch targets exactly one query",
                    ));
                }
                if schema.is_some() || !record_schemas.is_empty() {
                    return Err(CodecError::InvalidBatch(
                        "combiner batch carries no schema",
                    ));
                }
                overhead += 4;
            }
            BatchKind::Flush => {
                if !queries.is_empty() || schema.is_some() || !record_schemas.is_empty() {
                    return Err(CodecError::InvalidBatch(
                        "flush batch carries no queries or schema",
                    ));
                }
            }
        }

        if overhead > limits.max_packed_size() {
            return Err(CodecError::OverheadExceedsBudget {
                overhead,
                budget: limits.byte_budget,
            });
        }

        Ok(Self {
            kind,
            queries,
            schema,
            record_schemas,
            acks: Vec::new(),
            buf: BytesMut::new(),
            nrows: 0,
            overhead,
            limits,
        })
    }

    /// Appends one row's raw bytes, plus the group hash for CombinerRows
    /// batches.
    ///
    /// Returns `Ok(false)` when the row or byte budget is reached; the
    /// caller must pack and send this batch, reset it, and retry. A row
    /// that can never fit in any batch is a configuration error.
    pub fn add_row(&mut self, row: &[u8], group_hash: GroupHash) -> Result<bool, CodecError> {
        let mut row_size = ROW_LEN_PREFIX + row.len();
        if self.kind == BatchKind::CombinerRows {
            row_size += GROUP_HASH_SIZE;
        }

        if row_size > self.limits.max_packed_size() {
            return Err(CodecError::RowTooLarge {
                size: row_size,
                budget: self.limits.max_packed_size(),
            });
        }

        if self.nrows >= self.limits.row_budget {
            return Ok(false);
        }
        if self.packed_bound() + row_size > self.limits.max_packed_size() {
            return Ok(false);
        }

        self.buf.put_u32_le(row.len() as u32);
        self.buf.put_slice(row);
        if self.kind == BatchKind::CombinerRows {
            self.buf.put_u64_le(group_hash);
        }
        self.nrows += 1;
        Ok(true)
    }

    /// Attaches one ack reference; only meaningful before packing.
    pub fn add_ack(&mut self, ack: AckRef) {
        self.acks.push(ack);
    }

    /// Attaches a list of ack references.
    ///
    /// Tag validity is not checked here; callers holding a registry filter
    /// stale references before attaching them.
    pub fn add_acks(&mut self, acks: impl IntoIterator<Item = AckRef>) {
        self.acks.extend(acks);
    }

    pub fn is_empty(&self) -> bool {
        self.nrows == 0
    }

    pub fn row_count(&self) -> u32 {
        self.nrows
    }

    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    pub fn queries(&self) -> &QuerySet {
        &self.queries
    }

    pub fn acks(&self) -> &[AckRef] {
        &self.acks
    }

    /// Clears row content and the ack list, keeping allocated capacity.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.nrows = 0;
        self.acks.clear();
    }

    /// Serializes the batch; see [`wire::pack_microbatch`].
    pub fn pack(&self) -> Result<Bytes, CodecError> {
        wire::pack_microbatch(self)
    }

    pub(crate) fn byte_budget(&self) -> usize {
        self.limits.byte_budget
    }

    /// Running upper bound on the packed size of this batch.
    fn packed_bound(&self) -> usize {
        self.overhead + PACKED_ACK_SIZE * self.acks.len() + self.buf.len()
    }
}

/// One decoded row: a view into the receive buffer plus the group hash for
/// CombinerRows batches (zero otherwise).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRow {
    pub data: Bytes,
    pub group_hash: GroupHash,
}

/// A decoded, read-only microbatch.
///
/// Rows are `Bytes` views into the buffer passed to
/// [`wire::unpack_microbatch`]; the shared buffer stays alive for as long
/// as any row view does. There is deliberately no way to add rows to a
/// decoded batch.
#[derive(Debug, Clone)]
pub struct Microbatch {
    pub(crate) kind: BatchKind,
    pub(crate) queries: QuerySet,
    pub(crate) acks: Vec<AckRef>,
    pub(crate) rows: Vec<DecodedRow>,
    pub(crate) schema: Option<TupleSchema>,
    pub(crate) record_schemas: Vec<(i32, TupleSchema)>,
}

impl Microbatch {
    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    pub fn queries(&self) -> &QuerySet {
        &self.queries
    }

    pub fn acks(&self) -> &[AckRef] {
        &self.acks
    }

    pub fn rows(&self) -> &[DecodedRow] {
        &self.rows
    }

    pub fn row_count(&self) -> u32 {
        self.rows.len() as u32
    }

    pub fn schema(&self) -> Option<&TupleSchema> {
        self.schema.as_ref()
    }

    /// Nested record sub-schemas, tagged by composite-column type modifier.
    pub fn record_schemas(&self) -> &[(i32, TupleSchema)] {
        &self.record_schemas
    }
}
