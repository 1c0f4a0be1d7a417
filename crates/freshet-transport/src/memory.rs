use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::debug;

use freshet_core::ProcessId;

use crate::pubsub::PubSubTransport;

/// Default mailbox high-water mark, in payload bytes.
pub const DEFAULT_HIGH_WATER_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Default)]
struct Mailbox {
    queue: VecDeque<Bytes>,
    queued_bytes: usize,
    high_water_bytes: usize,
}

impl Mailbox {
    /// A mailbox always admits at least one message, so a payload larger
    /// than the high-water mark cannot wedge a blocking sender.
    fn has_room_for(&self, len: usize) -> bool {
        self.queue.is_empty() || self.queued_bytes + len <= self.high_water_bytes
    }
}

#[derive(Debug, Default)]
struct HubState {
    mailboxes: HashMap<ProcessId, Mailbox>,
}

/// Shared in-process message hub.
///
/// Every registered endpoint gets one bounded mailbox. A single condvar
/// covers the whole hub; both "message arrived" and "room freed up"
/// wake-ups go through it.
#[derive(Debug, Default)]
pub struct InMemoryHub {
    state: Mutex<HubState>,
    activity: Condvar,
}

impl InMemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates (or replaces) the mailbox for `id` and returns its endpoint.
    pub fn register(self: &Arc<Self>, id: ProcessId, high_water_bytes: usize) -> MemoryEndpoint {
        let mut state = self.state.lock().expect("hub lock should not be poisoned");
        state.mailboxes.insert(
            id,
            Mailbox {
                high_water_bytes,
                ..Mailbox::default()
            },
        );
        debug!(process = id, high_water_bytes, "registered mailbox");
        MemoryEndpoint {
            hub: Arc::clone(self),
            id,
        }
    }

    /// Removes `id`'s mailbox; in-flight senders to it start failing.
    pub fn unregister(&self, id: ProcessId) {
        let mut state = self.state.lock().expect("hub lock should not be poisoned");
        state.mailboxes.remove(&id);
        self.activity.notify_all();
    }

    /// Number of messages queued for `id`, for tests and diagnostics.
    pub fn queued(&self, id: ProcessId) -> usize {
        let state = self.state.lock().expect("hub lock should not be poisoned");
        state.mailboxes.get(&id).map_or(0, |m| m.queue.len())
    }

    fn push(&self, to: ProcessId, payload: &[u8], blocking: bool) -> bool {
        let mut state = self.state.lock().expect("hub lock should not be poisoned");
        loop {
            let Some(mailbox) = state.mailboxes.get_mut(&to) else {
                return false;
            };
            if mailbox.has_room_for(payload.len()) {
                mailbox.queued_bytes += payload.len();
                mailbox.queue.push_back(Bytes::copy_from_slice(payload));
                self.activity.notify_all();
                return true;
            }
            if !blocking {
                return false;
            }
            state = self
                .activity
                .wait(state)
                .expect("hub lock should not be poisoned");
        }
    }

    fn pop(&self, id: ProcessId, timeout: Duration) -> Option<Bytes> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().expect("hub lock should not be poisoned");
        loop {
            if let Some(mailbox) = state.mailboxes.get_mut(&id) {
                if let Some(payload) = mailbox.queue.pop_front() {
                    mailbox.queued_bytes -= payload.len();
                    self.activity.notify_all();
                    return Some(payload);
                }
            } else {
                return None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = self
                .activity
                .wait_timeout(state, remaining)
                .expect("hub lock should not be poisoned")
                .0;
        }
    }

    fn has_pending(&self, id: ProcessId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().expect("hub lock should not be poisoned");
        loop {
            match state.mailboxes.get(&id) {
                Some(mailbox) if !mailbox.queue.is_empty() => return true,
                Some(_) => {}
                None => return false,
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            state = self
                .activity
                .wait_timeout(state, remaining)
                .expect("hub lock should not be poisoned")
                .0;
        }
    }
}

/// Endpoint bound to one mailbox on an [`InMemoryHub`].
#[derive(Debug, Clone)]
pub struct MemoryEndpoint {
    hub: Arc<InMemoryHub>,
    id: ProcessId,
}

impl PubSubTransport for MemoryEndpoint {
    fn local_id(&self) -> ProcessId {
        self.id
    }

    fn send(&self, to: ProcessId, payload: &[u8], blocking: bool) -> bool {
        self.hub.push(to, payload, blocking)
    }

    fn poll(&self, timeout: Duration) -> bool {
        self.hub.has_pending(self.id, timeout)
    }

    fn recv(&self, timeout: Duration) -> Option<Bytes> {
        self.hub.pop(self.id, timeout)
    }
}
