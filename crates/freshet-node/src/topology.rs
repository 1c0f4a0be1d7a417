use rand::Rng;

use freshet_core::{GroupHash, ProcessId};

use crate::error::DeliveryError;

/// Static map from roles to transport process ids for one process group.
///
/// Group-sharded picks divide the hash by the role's process count, which
/// is what keeps rows of one aggregation group flowing through one worker
/// in order.
#[derive(Debug, Clone)]
pub struct ProcessDirectory {
    workers: Vec<ProcessId>,
    combiners: Vec<ProcessId>,
    queues: Vec<ProcessId>,
}

impl ProcessDirectory {
    pub fn new(
        workers: Vec<ProcessId>,
        combiners: Vec<ProcessId>,
        queues: Vec<ProcessId>,
    ) -> Result<Self, DeliveryError> {
        if workers.is_empty() {
            return Err(DeliveryError::EmptyRole("worker"));
        }
        if combiners.is_empty() {
            return Err(DeliveryError::EmptyRole("combiner"));
        }
        if queues.is_empty() {
            return Err(DeliveryError::EmptyRole("queue"));
        }
        Ok(Self {
            workers,
            combiners,
            queues,
        })
    }

    pub fn workers(&self) -> &[ProcessId] {
        &self.workers
    }

    pub fn combiners(&self) -> &[ProcessId] {
        &self.combiners
    }

    pub fn queues(&self) -> &[ProcessId] {
        &self.queues
    }

    /// The worker that owns `group`; stable for the directory's lifetime.
    pub fn worker_for_group(&self, group: GroupHash) -> ProcessId {
        self.workers[(group % self.workers.len() as u64) as usize]
    }

    /// The combiner that owns `group`; stable for the directory's lifetime.
    pub fn combiner_for_group(&self, group: GroupHash) -> ProcessId {
        self.combiners[(group % self.combiners.len() as u64) as usize]
    }

    pub fn random_worker(&self) -> ProcessId {
        self.workers[rand::thread_rng().gen_range(0..self.workers.len())]
    }

    pub fn random_queue(&self) -> ProcessId {
        self.queues[rand::thread_rng().gen_range(0..self.queues.len())]
    }
}
