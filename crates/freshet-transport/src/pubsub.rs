use std::time::Duration;

use bytes::Bytes;

use freshet_core::ProcessId;

/// Byte-oriented mailbox transport used by the pipeline runtime.
///
/// One endpoint per process. Messages are opaque byte payloads; framing
/// and interpretation belong to the codec layer. Mailboxes are bounded,
/// so senders must be prepared for a full peer.
pub trait PubSubTransport {
    /// Identity of the mailbox this endpoint receives on.
    fn local_id(&self) -> ProcessId;

    /// Delivers `payload` to the process that owns mailbox `to`.
    ///
    /// With `blocking` set, waits until the destination mailbox has room
    /// and returns `true` unless the destination no longer exists.
    /// Without it, returns `false` when the mailbox is full; the caller
    /// decides whether to retry, reroute, or drop.
    fn send(&self, to: ProcessId, payload: &[u8], blocking: bool) -> bool;

    /// Waits up to `timeout` for an inbound message to be available.
    fn poll(&self, timeout: Duration) -> bool;

    /// Takes the next inbound message, waiting up to `timeout` for one.
    fn recv(&self, timeout: Duration) -> Option<Bytes>;

    /// Takes the next inbound message only if one is already queued.
    fn try_recv(&self) -> Option<Bytes> {
        self.recv(Duration::ZERO)
    }
}
