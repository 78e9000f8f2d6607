//! Socket contract and the blocking/timeout/interrupt discipline shared by
//! every transport (spec.md §4.3 "Socket operations", §5 "Cancellation").

use crate::error::FlowMqResult;
use crate::transport::Message;
use std::time::{Duration, Instant};

/// One of the eleven socket kinds named in spec.md §3 "Channel".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
    Push,
    Pull,
    Publish,
    Subscribe,
    Request,
    Reply,
    Pair,
    Dealer,
    Router,
    XSub,
    XPub,
}

/// Result of a transfer attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Bytes transferred (sum across parts for multipart transfers).
    Transferred(usize),
    /// Timed out before any progress on a multipart boundary; no partial
    /// delivery to user code.
    Timeout,
    /// Cancelled by a controlling state change.
    Interrupted,
}

/// A transport-native socket. `send`/`receive` take ownership of (or
/// produce) `Message`s; timeout is milliseconds, `-1` waits forever (subject
/// to interrupt), `0` tries once.
pub trait Socket: Send + Sync {
    fn kind(&self) -> SocketKind;

    /// Binds this socket to `address`, publishing it for peers to `connect`
    /// against. Address syntax is transport-defined (spec.md §3 "Channel"
    /// leaves the URI scheme to the transport).
    fn bind(&self, address: &str) -> FlowMqResult<()>;
    /// Connects this socket to a peer previously `bind`-ed at `address`.
    fn connect(&self, address: &str) -> FlowMqResult<()>;

    fn send(&self, msg: Message, timeout_ms: i64) -> FlowMqResult<TransferOutcome>;
    fn receive(&self, timeout_ms: i64) -> FlowMqResult<(TransferOutcome, Option<Message>)>;

    fn send_multipart(&self, parts: Vec<Message>, timeout_ms: i64) -> FlowMqResult<TransferOutcome>;
    fn receive_multipart(&self, timeout_ms: i64) -> FlowMqResult<(TransferOutcome, Vec<Message>)>;

    fn try_send(&self, msg: Message) -> FlowMqResult<TransferOutcome> {
        self.send(msg, 0)
    }

    fn try_receive(&self) -> FlowMqResult<(TransferOutcome, Option<Message>)> {
        self.receive(0)
    }

    /// Set by the FSM on every state exit; every blocking transfer must
    /// observe it within one native short-timeout tick (nominally 100ms).
    fn interrupt(&self);
    /// Cleared by the FSM before the next state is entered.
    fn resume(&self);

    /// Approximate count of connected peers, updated lazily on query.
    fn peer_count(&self) -> usize;
}

/// Native short-timeout granularity every blocking transfer polls the
/// interrupt flag at (spec.md §5 "nominally 100 ms").
pub const NATIVE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Drives `attempt` in a loop at [`NATIVE_POLL_INTERVAL`] granularity,
/// honoring `timeout_ms` (`-1` forever, `0` try-once) and `is_interrupted`,
/// the way every transport's blocking send/receive is specified to behave.
///
/// `attempt` returns `Some(T)` on progress, `None` to keep waiting.
pub fn poll_with_timeout<T>(
    timeout_ms: i64,
    is_interrupted: impl Fn() -> bool,
    mut attempt: impl FnMut() -> Option<T>,
) -> PollResult<T> {
    if let Some(v) = attempt() {
        return PollResult::Ready(v);
    }
    if timeout_ms == 0 {
        return PollResult::TimedOut;
    }
    let deadline = if timeout_ms < 0 {
        None
    } else {
        Some(Instant::now() + Duration::from_millis(timeout_ms as u64))
    };
    loop {
        if is_interrupted() {
            return PollResult::Interrupted;
        }
        let tick = match deadline {
            Some(d) => {
                let remaining = d.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return PollResult::TimedOut;
                }
                remaining.min(NATIVE_POLL_INTERVAL)
            }
            None => NATIVE_POLL_INTERVAL,
        };
        std::thread::sleep(tick);
        if let Some(v) = attempt() {
            return PollResult::Ready(v);
        }
        if is_interrupted() {
            return PollResult::Interrupted;
        }
        if let Some(d) = deadline {
            if Instant::now() >= d {
                return PollResult::TimedOut;
            }
        }
    }
}

pub enum PollResult<T> {
    Ready(T),
    TimedOut,
    Interrupted,
}
