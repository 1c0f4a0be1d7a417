use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tracing::debug;

use freshet_ack::{AckRegistry, GroupSignals};
use freshet_codec::wire;
use freshet_codec::{BatchLimits, MicrobatchBuilder};
use freshet_core::{AckRef, BatchKind, GroupHash, ProcessId, ProcessRole, QuerySet};
use freshet_transport::PubSubTransport;

use crate::error::DeliveryError;
use crate::topology::ProcessDirectory;

/// Sleep between attempts while a blocking send spins on a full mailbox.
const SEND_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Role-aware batch dispatcher for one sending process.
///
/// Client writes go synchronously to a random worker; everything else is
/// asynchronous: one non-blocking attempt at the true destination, then a
/// relay-framed blocking hand-off to a queue process so the sender never
/// stalls on a saturated consumer. Combiner-origin worker batches are
/// sharded by group hash, which preserves per-group ordering. Every
/// blocking path checks the shutdown flag between attempts.
pub struct DeliveryRouter<T: PubSubTransport> {
    transport: T,
    directory: ProcessDirectory,
    registry: Arc<AckRegistry>,
    signals: Arc<GroupSignals>,
    limits: BatchLimits,
}

impl<T: PubSubTransport> DeliveryRouter<T> {
    pub fn new(
        transport: T,
        directory: ProcessDirectory,
        registry: Arc<AckRegistry>,
        signals: Arc<GroupSignals>,
        limits: BatchLimits,
    ) -> Self {
        Self {
            transport,
            directory,
            registry,
            signals,
            limits,
        }
    }

    pub fn directory(&self) -> &ProcessDirectory {
        &self.directory
    }

    /// Sends a worker-bound batch; returns the worker it was addressed to.
    ///
    /// Sent-row counters on the attached acks are bumped before the bytes
    /// leave, so a delivery predicate can never be satisfied early.
    pub fn send_to_worker(
        &self,
        batch: &MicrobatchBuilder,
        sender: ProcessRole,
        group: GroupHash,
    ) -> Result<ProcessId, DeliveryError> {
        for ack in batch.acks() {
            self.registry
                .add_sent_worker_rows(ack, u64::from(batch.row_count()));
        }
        let packed = batch.pack()?;

        match sender {
            ProcessRole::Client => {
                let worker = self.directory.random_worker();
                self.send_blocking(worker, &packed)?;
                Ok(worker)
            }
            ProcessRole::Combiner => {
                let worker = self.directory.worker_for_group(group);
                self.dispatch_async(worker, &packed)?;
                Ok(worker)
            }
            _ => {
                let worker = self.directory.random_worker();
                self.dispatch_async(worker, &packed)?;
                Ok(worker)
            }
        }
    }

    /// Sends a combiner-bound batch, sharded by group hash.
    pub fn send_to_combiner(
        &self,
        batch: &MicrobatchBuilder,
        group: GroupHash,
    ) -> Result<ProcessId, DeliveryError> {
        for ack in batch.acks() {
            self.registry
                .add_sent_combiner_rows(ack, u64::from(batch.row_count()));
        }
        let packed = batch.pack()?;
        let combiner = self.directory.combiner_for_group(group);
        self.dispatch_async(combiner, &packed)?;
        Ok(combiner)
    }

    /// Forwards flush acks to every combiner as one rowless Flush batch.
    ///
    /// Stale references are dropped here; each surviving ack expects one
    /// acknowledgment per combiner, so its sent-combiner counter grows by
    /// the combiner count. Returns how many acks were forwarded.
    pub fn flush_to_combiners(&self, acks: &[AckRef]) -> Result<usize, DeliveryError> {
        let valid: Vec<AckRef> = acks
            .iter()
            .copied()
            .filter(|ack| self.registry.validate(ack))
            .collect();
        if valid.is_empty() {
            return Ok(0);
        }

        let mut batch = MicrobatchBuilder::new(
            BatchKind::Flush,
            QuerySet::new(),
            None,
            Vec::new(),
            self.limits,
        )?;
        batch.add_acks(valid.iter().copied());

        let combiners = self.directory.combiners().to_vec();
        for ack in &valid {
            self.registry
                .add_sent_combiner_rows(ack, combiners.len() as u64);
        }

        let packed = batch.pack()?;
        for combiner in combiners {
            self.dispatch_async(combiner, &packed)?;
        }
        Ok(valid.len())
    }

    /// One non-blocking attempt at the destination, then a relay-framed
    /// blocking hand-off to a queue process.
    fn dispatch_async(&self, to: ProcessId, packed: &Bytes) -> Result<(), DeliveryError> {
        if self.transport.send(to, packed, false) {
            return Ok(());
        }
        debug!(destination = to, "mailbox full, handing batch to a relay");

        let framed = wire::pack_for_relay(to, packed);
        let queues = self.directory.queues();
        let start = rand::thread_rng().gen_range(0..queues.len());
        loop {
            for offset in 0..queues.len() {
                if self.signals.is_shutting_down() {
                    return Err(DeliveryError::ShuttingDown);
                }
                let queue = queues[(start + offset) % queues.len()];
                if self.transport.send(queue, &framed, false) {
                    return Ok(());
                }
            }
            std::thread::sleep(SEND_RETRY_INTERVAL);
        }
    }

    /// Blocking send as a spin of non-blocking attempts, so the shutdown
    /// flag is observed between every refusal instead of parking inside
    /// the transport.
    fn send_blocking(&self, to: ProcessId, packed: &Bytes) -> Result<(), DeliveryError> {
        loop {
            if self.signals.is_shutting_down() {
                return Err(DeliveryError::ShuttingDown);
            }
            if self.transport.send(to, packed, false) {
                return Ok(());
            }
            std::thread::sleep(SEND_RETRY_INTERVAL);
        }
    }
}
