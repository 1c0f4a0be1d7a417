use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use freshet_ack::GroupSignals;
use freshet_codec::wire::unpack_relay_frame;
use freshet_core::ProcessId;
use freshet_transport::PubSubTransport;

/// The queue-process loop: accept relay frames from saturated senders and
/// forward the inner payload to its final recipient.
///
/// Forwarding is always non-blocking; frames a recipient refuses go into a
/// local FIFO retried each cycle. The relay therefore never stalls on one
/// slow consumer, which is the whole point of handing it the batch.
pub struct RelayProcess<T: PubSubTransport> {
    transport: T,
    signals: Arc<GroupSignals>,
    pending: VecDeque<(ProcessId, Bytes)>,
}

impl<T: PubSubTransport> RelayProcess<T> {
    pub fn new(transport: T, signals: Arc<GroupSignals>) -> Self {
        Self {
            transport,
            signals,
            pending: VecDeque::new(),
        }
    }

    /// Frames waiting on a refused recipient.
    pub fn backlog(&self) -> usize {
        self.pending.len()
    }

    /// One cycle: retry the backlog, then drain inbound frames, waiting up
    /// to `recv_timeout` for the first one. Returns frames forwarded.
    pub fn step(&mut self, recv_timeout: Duration) -> usize {
        let mut forwarded = 0;

        for _ in 0..self.pending.len() {
            let Some((to, payload)) = self.pending.pop_front() else {
                break;
            };
            if self.transport.send(to, &payload, false) {
                forwarded += 1;
            } else {
                self.pending.push_back((to, payload));
            }
        }

        let mut timeout = recv_timeout;
        while let Some(frame) = self.transport.recv(timeout) {
            timeout = Duration::ZERO;
            match unpack_relay_frame(frame) {
                Ok((to, payload)) => {
                    if self.transport.send(to, &payload, false) {
                        forwarded += 1;
                    } else {
                        debug!(recipient = to, "recipient still full, queueing frame");
                        self.pending.push_back((to, payload));
                    }
                }
                Err(err) => {
                    warn!(error = %err, "dropping malformed relay frame");
                }
            }
        }

        forwarded
    }

    /// Runs until the shutdown flag is raised.
    pub fn run(&mut self, recv_timeout: Duration) {
        while !self.signals.is_shutting_down() {
            self.step(recv_timeout);
        }
    }
}
