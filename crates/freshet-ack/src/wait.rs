use std::time::Duration;

use tracing::warn;

use freshet_core::{AckRef, DeliveryLevel};

use crate::registry::AckRegistry;
use crate::signals::GroupSignals;

/// Result of blocking on a slot's delivery predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The requested delivery level was reached.
    Satisfied,
    /// The consumer group restarted; acks from the old generation will
    /// never arrive. Give up without reporting success.
    Abandoned,
    /// The process-wide shutdown flag was raised.
    ShutdownRequested,
}

impl WaitOutcome {
    /// True only for a confirmed delivery.
    pub fn is_satisfied(self) -> bool {
        self == WaitOutcome::Satisfied
    }
}

impl AckRegistry {
    /// Blocks the calling single-threaded process until the delivery
    /// level encoded in `ack`'s tag is reached.
    ///
    /// Fire-and-forget sends return immediately. Each poll iteration
    /// re-reads the group generation: if it has moved past
    /// `start_generation` the wait is abandoned, except when
    /// `start_generation` is zero, which marks a send issued before the
    /// consumers finished starting and keeps waiting. The shutdown flag
    /// is observed between sleeps, so there is no unbounded spin.
    pub fn wait(
        &self,
        ack: &AckRef,
        signals: &GroupSignals,
        start_generation: u64,
        poll_interval: Duration,
    ) -> WaitOutcome {
        let level = ack.level();
        if level == DeliveryLevel::FireAndForget {
            return WaitOutcome::Satisfied;
        }

        loop {
            let satisfied = match level {
                DeliveryLevel::FireAndForget => true,
                DeliveryLevel::Received => self.is_received(ack),
                DeliveryLevel::Committed | DeliveryLevel::Flush => self.is_fully_acked(ack),
            };
            if satisfied {
                return WaitOutcome::Satisfied;
            }

            let generation = signals.generation();
            if start_generation != 0 && generation != start_generation {
                warn!(
                    start_generation,
                    generation, "ack wait abandoned after consumer restart"
                );
                return WaitOutcome::Abandoned;
            }

            if signals.is_shutting_down() {
                return WaitOutcome::ShutdownRequested;
            }

            std::thread::sleep(poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::WaitOutcome;
    use crate::registry::{AckRegistry, AckRole};
    use crate::signals::GroupSignals;
    use freshet_core::DeliveryLevel;

    const TICK: Duration = Duration::from_millis(1);

    #[test]
    fn fire_and_forget_returns_immediately() {
        let registry = AckRegistry::new(2);
        let signals = GroupSignals::new();
        let ack = registry
            .claim(DeliveryLevel::FireAndForget, &signals)
            .expect("claim should succeed");

        registry.add_sent_worker_rows(&ack, 10);
        assert_eq!(
            registry.wait(&ack, &signals, signals.generation(), TICK),
            WaitOutcome::Satisfied
        );
    }

    #[test]
    fn received_level_waits_for_worker_receipt() {
        let registry = Arc::new(AckRegistry::new(2));
        let signals = GroupSignals::new();
        let ack = registry
            .claim(DeliveryLevel::Received, &signals)
            .expect("claim should succeed");
        registry.add_sent_worker_rows(&ack, 2);

        let poster = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(5));
                registry.add_worker_received(&ack, 2);
            })
        };

        assert_eq!(
            registry.wait(&ack, &signals, signals.generation(), TICK),
            WaitOutcome::Satisfied
        );
        poster.join().expect("poster thread should finish");
    }

    #[test]
    fn generation_bump_abandons_an_active_wait() {
        let registry = Arc::new(AckRegistry::new(2));
        let signals = Arc::new(GroupSignals::new());
        let ack = registry
            .claim(DeliveryLevel::Committed, &signals)
            .expect("claim should succeed");
        registry.add_sent_worker_rows(&ack, 1);

        let start = signals.generation();
        let bumper = {
            let signals = Arc::clone(&signals);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(5));
                signals.advance_generation();
            })
        };

        assert_eq!(
            registry.wait(&ack, &signals, start, TICK),
            WaitOutcome::Abandoned
        );
        bumper.join().expect("bumper thread should finish");
    }

    #[test]
    fn zero_start_generation_keeps_waiting_across_restarts() {
        let registry = Arc::new(AckRegistry::new(2));
        let signals = Arc::new(GroupSignals::new());
        let ack = registry
            .claim(DeliveryLevel::Committed, &signals)
            .expect("claim should succeed");
        registry.add_sent_worker_rows(&ack, 1);
        signals.advance_generation();

        let poster = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(5));
                registry.add_acks(&ack, AckRole::Worker, 1);
            })
        };

        // start_generation 0 marks a send from before consumer startup.
        assert_eq!(
            registry.wait(&ack, &signals, 0, TICK),
            WaitOutcome::Satisfied
        );
        poster.join().expect("poster thread should finish");
    }

    #[test]
    fn shutdown_interrupts_an_unsatisfied_wait() {
        let registry = AckRegistry::new(2);
        let signals = GroupSignals::new();
        let ack = registry
            .claim(DeliveryLevel::Received, &signals)
            .expect("claim should succeed");
        registry.add_sent_worker_rows(&ack, 1);

        signals.request_shutdown();
        assert_eq!(
            registry.wait(&ack, &signals, signals.generation(), TICK),
            WaitOutcome::ShutdownRequested
        );
    }
}
