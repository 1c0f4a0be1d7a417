use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Process-group lifecycle signals shared by every process.
///
/// The generation counter is bumped whenever the consumer process set is
/// restarted; an in-flight ack wait that observes a newer generation than
/// the one it started under can never be satisfied and must give up.
/// Generation 0 means "consumers not fully started yet" and is never
/// produced by [`GroupSignals::advance_generation`].
#[derive(Debug)]
pub struct GroupSignals {
    generation: AtomicU64,
    shutdown: AtomicBool,
}

impl Default for GroupSignals {
    fn default() -> Self {
        Self {
            generation: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
        }
    }
}

impl GroupSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current consumer-group generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Invalidates all waits started under the previous generation.
    pub fn advance_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Cooperative shutdown flag, set from the termination signal handler.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::GroupSignals;

    #[test]
    fn generation_starts_above_zero_and_advances() {
        let signals = GroupSignals::new();
        assert_eq!(signals.generation(), 1);
        assert_eq!(signals.advance_generation(), 2);
        assert_eq!(signals.generation(), 2);
    }

    #[test]
    fn shutdown_flag_latches() {
        let signals = GroupSignals::new();
        assert!(!signals.is_shutting_down());
        signals.request_shutdown();
        assert!(signals.is_shutting_down());
    }
}
