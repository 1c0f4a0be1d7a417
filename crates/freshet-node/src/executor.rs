use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use freshet_ack::{AckRegistry, AckRole};
use freshet_codec::batch::DecodedRow;
use freshet_codec::wire::unpack_microbatch;
use freshet_codec::Microbatch;
use freshet_core::{AckRef, BatchKind, ProcessRole, QueryId, QuerySet};
use freshet_transport::PubSubTransport;

use crate::error::ExecError;

/// Everything drained from the mailbox for one execution cycle.
#[derive(Debug, Default)]
struct BatchSet {
    batches: Vec<Microbatch>,
    queries: QuerySet,
    flush_acks: Vec<AckRef>,
}

/// Per-process batch consumer driving continuous-query execution.
///
/// One cycle: `start_batch` drains every ready message into a read-only
/// batch set, then `start_next_query` / `iterate` / `end_query` walk each
/// target query's rows, and `end_batch` commits or aborts the whole set.
/// Rows are views into the receive buffers; nothing is copied between the
/// mailbox and the query plan.
pub struct ContinuousExecutor<T: PubSubTransport> {
    transport: T,
    role: ProcessRole,
    registry: Arc<AckRegistry>,
    active: QuerySet,
    batch: BatchSet,
    pending: QuerySet,
    current: Option<QueryId>,
    cursor: (usize, usize),
}

impl<T: PubSubTransport> ContinuousExecutor<T> {
    /// `active` is the set of queries this process currently executes;
    /// queries first seen on the wire are folded into it.
    pub fn new(
        transport: T,
        role: ProcessRole,
        registry: Arc<AckRegistry>,
        active: QuerySet,
    ) -> Result<Self, ExecError> {
        if !matches!(role, ProcessRole::Worker | ProcessRole::Combiner) {
            return Err(ExecError::NotAConsumer);
        }
        Ok(Self {
            transport,
            role,
            registry,
            active,
            batch: BatchSet::default(),
            pending: QuerySet::new(),
            current: None,
            cursor: (0, 0),
        })
    }

    pub fn active_queries(&self) -> &QuerySet {
        &self.active
    }

    /// Waits up to `timeout` for traffic, then drains every ready message
    /// into the batch set. Returns whether a batch was started.
    ///
    /// Flush batches carry no rows; their acks are set aside and settled
    /// at `end_batch`. A decode failure is fatal for the whole cycle.
    pub fn start_batch(&mut self, timeout: Duration) -> Result<bool, ExecError> {
        if !self.transport.poll(timeout) {
            return Ok(false);
        }

        while let Some(buf) = self.transport.try_recv() {
            let decoded = match unpack_microbatch(buf) {
                Ok(decoded) => decoded,
                Err(err) => {
                    // Nothing from a failed drain may leak into a later
                    // cycle: the messages decoded so far are dropped along
                    // with the malformed one.
                    self.batch = BatchSet::default();
                    self.pending = QuerySet::new();
                    self.current = None;
                    return Err(err.into());
                }
            };
            match decoded.kind() {
                BatchKind::Flush => {
                    self.batch.flush_acks.extend_from_slice(decoded.acks());
                }
                BatchKind::WorkerRows | BatchKind::CombinerRows => {
                    self.batch.queries.union_with(decoded.queries());
                    self.batch.batches.push(decoded);
                }
            }
        }

        // Queries first seen here become active for subsequent cycles.
        self.active.union_with(&self.batch.queries);

        self.pending = QuerySet::new();
        for id in self.batch.queries.iter() {
            if self.active.contains(id) {
                self.pending.insert(id);
            }
        }
        debug!(
            batches = self.batch.batches.len(),
            flush_acks = self.batch.flush_acks.len(),
            queries = self.pending.len(),
            "batch started"
        );
        Ok(true)
    }

    /// Positions the row cursor on the next target query, or `None` when
    /// the batch set is exhausted.
    pub fn start_next_query(&mut self) -> Option<QueryId> {
        self.current = self.pending.pop_first();
        self.cursor = (0, 0);
        self.current
    }

    /// Next row for the current query; not rewindable mid-query.
    pub fn iterate(&mut self) -> Option<DecodedRow> {
        let query = self.current?;
        while self.cursor.0 < self.batch.batches.len() {
            let batch = &self.batch.batches[self.cursor.0];
            if batch.queries().contains(query) && self.cursor.1 < batch.rows().len() {
                let row = batch.rows()[self.cursor.1].clone();
                self.cursor.1 += 1;
                return Some(row);
            }
            self.cursor = (self.cursor.0 + 1, 0);
        }
        None
    }

    /// Marks the current query finished.
    pub fn end_query(&mut self) {
        self.current = None;
    }

    /// Drops the current query mid-iteration; the rest of the batch set is
    /// untouched.
    pub fn abort_query(&mut self) {
        self.current = None;
    }

    /// Deactivates a query entirely: no further rows this cycle or later.
    pub fn purge_query(&mut self, id: QueryId) {
        self.active.remove(id);
        self.pending.remove(id);
        if self.current == Some(id) {
            self.current = None;
        }
    }

    /// Finishes the cycle and returns the flush acks the caller must
    /// forward to the combiners (always empty for combiners and aborts).
    ///
    /// Committing as a worker posts receipt and acknowledgment for every
    /// still-valid ack by its batch's row count; committing as a combiner
    /// posts combiner acknowledgments, one per flush ack plus row counts
    /// for row batches. An abort posts nothing: the sender's wait is
    /// bounded by generation change, not by us.
    pub fn end_batch(&mut self, commit: bool) -> Vec<AckRef> {
        let batch = std::mem::take(&mut self.batch);
        self.pending = QuerySet::new();
        self.current = None;
        self.cursor = (0, 0);

        if !commit {
            return Vec::new();
        }

        match self.role {
            ProcessRole::Worker => {
                for decoded in &batch.batches {
                    let rows = u64::from(decoded.row_count());
                    for ack in decoded.acks() {
                        self.registry.add_worker_received(ack, rows);
                        self.registry.add_acks(ack, AckRole::Worker, rows);
                    }
                }
                batch.flush_acks
            }
            _ => {
                for decoded in &batch.batches {
                    let rows = u64::from(decoded.row_count());
                    for ack in decoded.acks() {
                        self.registry.add_acks(ack, AckRole::Combiner, rows);
                    }
                }
                for ack in &batch.flush_acks {
                    self.registry.add_acks(ack, AckRole::Combiner, 1);
                }
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use freshet_ack::{AckRegistry, GroupSignals};
    use freshet_codec::{BatchLimits, ColumnDesc, MicrobatchBuilder, TupleSchema};
    use freshet_core::{AckRef, BatchKind, DeliveryLevel, ProcessRole, QuerySet};
    use freshet_transport::{InMemoryHub, MemoryEndpoint, PubSubTransport};

    use super::ContinuousExecutor;
    use crate::error::ExecError;

    const SENDER: u64 = 1;
    const CONSUMER: u64 = 10;

    fn schema() -> TupleSchema {
        TupleSchema::new(vec![ColumnDesc {
            name: "value".to_string(),
            type_id: 23,
            type_mod: -1,
            collation: 0,
        }])
    }

    fn endpoints() -> (MemoryEndpoint, MemoryEndpoint) {
        let hub = InMemoryHub::new();
        (
            hub.register(SENDER, 1 << 20),
            hub.register(CONSUMER, 1 << 20),
        )
    }

    fn send_worker_rows(sender: &MemoryEndpoint, queries: QuerySet, rows: &[&[u8]], acks: &[AckRef]) {
        let mut batch = MicrobatchBuilder::new(
            BatchKind::WorkerRows,
            queries,
            Some(schema()),
            Vec::new(),
            BatchLimits::default(),
        )
        .expect("builder should construct");
        for row in rows {
            batch.add_row(row, 0).expect("row should fit");
        }
        batch.add_acks(acks.iter().copied());
        let packed = batch.pack().expect("pack should succeed");
        assert!(sender.send(CONSUMER, &packed, false));
    }

    #[test]
    fn client_role_cannot_consume() {
        let (_, consumer) = endpoints();
        let err = ContinuousExecutor::new(
            consumer,
            ProcessRole::Client,
            Arc::new(AckRegistry::new(1)),
            QuerySet::new(),
        )
        .err()
        .expect("client role must be rejected");
        assert_eq!(err, ExecError::NotAConsumer);
    }

    #[test]
    fn idle_mailbox_stays_idle() {
        let (_, consumer) = endpoints();
        let mut exec = ContinuousExecutor::new(
            consumer,
            ProcessRole::Worker,
            Arc::new(AckRegistry::new(1)),
            QuerySet::new(),
        )
        .expect("executor should construct");
        assert!(!exec
            .start_batch(Duration::from_millis(1))
            .expect("empty poll is not an error"));
    }

    #[test]
    fn drains_all_ready_batches_and_walks_each_query() {
        let (sender, consumer) = endpoints();
        let mut q12 = QuerySet::singleton(1);
        q12.insert(2);
        send_worker_rows(&sender, q12, &[b"a", b"b"], &[]);
        send_worker_rows(&sender, QuerySet::singleton(2), &[b"c"], &[]);

        let mut exec = ContinuousExecutor::new(
            consumer,
            ProcessRole::Worker,
            Arc::new(AckRegistry::new(1)),
            QuerySet::new(),
        )
        .expect("executor should construct");
        assert!(exec
            .start_batch(Duration::from_millis(10))
            .expect("decode should succeed"));

        assert_eq!(exec.start_next_query(), Some(1));
        let rows: Vec<_> = std::iter::from_fn(|| exec.iterate()).collect();
        assert_eq!(rows.len(), 2, "query 1 sees only the first batch");
        exec.end_query();

        assert_eq!(exec.start_next_query(), Some(2));
        let rows: Vec<_> = std::iter::from_fn(|| exec.iterate()).collect();
        assert_eq!(rows.len(), 3, "query 2 sees both batches");
        assert_eq!(&rows[2].data[..], b"c");
        exec.end_query();

        assert_eq!(exec.start_next_query(), None);
        exec.end_batch(true);

        // Wire-discovered queries stay active for later cycles.
        assert!(exec.active_queries().contains(1));
        assert!(exec.active_queries().contains(2));
    }

    #[test]
    fn decode_failure_discards_everything_drained_so_far() {
        let (sender, consumer) = endpoints();
        send_worker_rows(&sender, QuerySet::singleton(1), &[b"stale"], &[]);
        assert!(sender.send(CONSUMER, &[0xFF, 1, 2], false));

        let mut exec = ContinuousExecutor::new(
            consumer,
            ProcessRole::Worker,
            Arc::new(AckRegistry::new(1)),
            QuerySet::new(),
        )
        .expect("executor should construct");
        exec.start_batch(Duration::from_millis(10))
            .expect_err("malformed buffer must fail the cycle");

        // A clean next cycle sees only its own rows, never leftovers from
        // the failed drain.
        send_worker_rows(&sender, QuerySet::singleton(1), &[b"fresh"], &[]);
        assert!(exec
            .start_batch(Duration::from_millis(10))
            .expect("clean cycle should start"));
        assert_eq!(exec.start_next_query(), Some(1));
        let rows: Vec<_> = std::iter::from_fn(|| exec.iterate()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0].data[..], b"fresh");
        exec.end_query();
        exec.end_batch(true);
    }

    #[test]
    fn worker_commit_posts_receipt_and_acks_by_row_count() {
        let (sender, consumer) = endpoints();
        let registry = Arc::new(AckRegistry::new(4));
        let signals = GroupSignals::new();
        let ack = registry
            .claim(DeliveryLevel::Committed, &signals)
            .expect("claim should succeed");
        registry.add_sent_worker_rows(&ack, 3);
        send_worker_rows(&sender, QuerySet::singleton(1), &[b"a", b"b", b"c"], &[ack]);

        let mut exec = ContinuousExecutor::new(
            consumer,
            ProcessRole::Worker,
            Arc::clone(&registry),
            QuerySet::singleton(1),
        )
        .expect("executor should construct");
        assert!(exec
            .start_batch(Duration::from_millis(10))
            .expect("decode should succeed"));
        while exec.start_next_query().is_some() {
            while exec.iterate().is_some() {}
            exec.end_query();
        }
        let flush_acks = exec.end_batch(true);
        assert!(flush_acks.is_empty());

        let counters = registry.counters(&ack).expect("reference still valid");
        assert_eq!(counters.worker_received, 3);
        assert_eq!(counters.worker_acks, 3);
        assert!(registry.is_fully_acked(&ack));
    }

    #[test]
    fn abort_posts_nothing() {
        let (sender, consumer) = endpoints();
        let registry = Arc::new(AckRegistry::new(4));
        let signals = GroupSignals::new();
        let ack = registry
            .claim(DeliveryLevel::Received, &signals)
            .expect("claim should succeed");
        registry.add_sent_worker_rows(&ack, 1);
        send_worker_rows(&sender, QuerySet::singleton(1), &[b"a"], &[ack]);

        let mut exec = ContinuousExecutor::new(
            consumer,
            ProcessRole::Worker,
            Arc::clone(&registry),
            QuerySet::singleton(1),
        )
        .expect("executor should construct");
        assert!(exec
            .start_batch(Duration::from_millis(10))
            .expect("decode should succeed"));
        exec.end_batch(false);

        let counters = registry.counters(&ack).expect("reference still valid");
        assert_eq!(counters.worker_received, 0);
        assert_eq!(counters.worker_acks, 0);
        assert!(!registry.is_received(&ack));
    }

    #[test]
    fn purge_query_drops_it_from_this_and_later_cycles() {
        let (sender, consumer) = endpoints();
        let mut q12 = QuerySet::singleton(1);
        q12.insert(2);
        send_worker_rows(&sender, q12, &[b"a"], &[]);

        let mut exec = ContinuousExecutor::new(
            consumer,
            ProcessRole::Worker,
            Arc::new(AckRegistry::new(1)),
            QuerySet::new(),
        )
        .expect("executor should construct");
        assert!(exec
            .start_batch(Duration::from_millis(10))
            .expect("decode should succeed"));

        exec.purge_query(1);
        assert_eq!(exec.start_next_query(), Some(2));
        exec.end_query();
        assert_eq!(exec.start_next_query(), None);
        exec.end_batch(true);
        assert!(!exec.active_queries().contains(1));
        assert!(exec.active_queries().contains(2));
    }

    #[test]
    fn combiner_settles_flush_acks_with_one_ack_each() {
        let hub = InMemoryHub::new();
        let sender = hub.register(SENDER, 1 << 20);
        let consumer = hub.register(CONSUMER, 1 << 20);

        let registry = Arc::new(AckRegistry::new(4));
        let signals = GroupSignals::new();
        let ack = registry
            .claim(DeliveryLevel::Flush, &signals)
            .expect("claim should succeed");
        registry.add_sent_combiner_rows(&ack, 1);

        let mut flush = MicrobatchBuilder::new(
            BatchKind::Flush,
            QuerySet::new(),
            None,
            Vec::new(),
            BatchLimits::default(),
        )
        .expect("builder should construct");
        flush.add_ack(ack);
        let packed = flush.pack().expect("pack should succeed");
        assert!(sender.send(CONSUMER, &packed, false));

        let mut exec = ContinuousExecutor::new(
            consumer,
            ProcessRole::Combiner,
            Arc::clone(&registry),
            QuerySet::new(),
        )
        .expect("executor should construct");
        assert!(exec
            .start_batch(Duration::from_millis(10))
            .expect("decode should succeed"));
        assert_eq!(exec.start_next_query(), None, "flush batches carry no rows");
        exec.end_batch(true);

        let counters = registry.counters(&ack).expect("reference still valid");
        assert_eq!(counters.combiner_acks, 1);
        assert!(registry.is_fully_acked(&ack));
    }
}
