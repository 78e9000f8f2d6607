//! In-process Default transport (spec.md §4.3 "Default transport").
//!
//! A tagged endpoint registry rather than an OS-backed socket per kind:
//! `Pipe` endpoints back Push/Pull fan-in, `Pair` endpoints back the
//! symmetric two-way patterns (Pair/Request/Reply), `Topic` endpoints back
//! Publish/Subscribe fan-out. Dealer/Router/XSub/XPub are out of scope for
//! this transport (spec.md §9 Open Questions explicitly allows restricting
//! transport coverage in the first version) and are rejected at
//! `new_socket` time rather than later at `bind`/`connect`.
//!
//! Binding must happen before connecting — there is no listen backlog, so a
//! `connect` against an address nobody has bound yet fails immediately
//! rather than retrying. This mirrors every in-process scenario this
//! runtime actually drives (all endpoints of one run start together) and is
//! recorded as a scope decision rather than discovered by a caller.

use crate::error::{FlowMqError, FlowMqResult};
use crate::transport::message::Message;
use crate::transport::socket::{poll_with_timeout, PollResult, Socket, SocketKind, TransferOutcome};
use crate::transport::{Transport, TransportTag};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

type Envelope = Vec<Message>;

struct PipeState {
    queue: Mutex<VecDeque<Envelope>>,
    peers: AtomicUsize,
}

impl PipeState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            peers: AtomicUsize::new(0),
        })
    }

    fn push(&self, envelope: Envelope) {
        self.queue.lock().push_back(envelope);
    }

    fn try_pop(&self) -> Option<Envelope> {
        self.queue.lock().pop_front()
    }
}

struct PairState {
    to_bound: Arc<PipeState>,
    to_connected: Arc<PipeState>,
}

struct TopicState {
    subscribers: Mutex<Vec<Arc<PipeState>>>,
}

enum Endpoint {
    Pipe(Arc<PipeState>),
    Pair(Arc<PairState>),
    Topic(Arc<TopicState>),
}

static REGISTRY: Lazy<DashMap<String, Endpoint>> = Lazy::new(DashMap::new);

/// The in-process transport: every `Message` it mints is a plain heap
/// buffer, and every socket it mints talks to the process-wide
/// address registry above.
pub struct DefaultTransport;

impl DefaultTransport {
    pub fn new() -> Self {
        DefaultTransport
    }
}

impl Default for DefaultTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for DefaultTransport {
    fn tag(&self) -> TransportTag {
        TransportTag::Default
    }

    fn new_message_empty(&self) -> FlowMqResult<Message> {
        Ok(Message::empty(TransportTag::Default))
    }

    fn new_message_with_size(&self, size: usize) -> FlowMqResult<Message> {
        Message::with_size(size, TransportTag::Default)
    }

    fn new_message_with_size_aligned(&self, size: usize, alignment: usize) -> FlowMqResult<Message> {
        Message::with_size_aligned(size, alignment, TransportTag::Default)
    }

    fn new_socket(&self, kind: SocketKind) -> FlowMqResult<Arc<dyn Socket>> {
        match kind {
            SocketKind::Push
            | SocketKind::Pull
            | SocketKind::Pair
            | SocketKind::Request
            | SocketKind::Reply
            | SocketKind::Publish
            | SocketKind::Subscribe => Ok(Arc::new(DefaultSocket::new(kind))),
            SocketKind::Dealer | SocketKind::Router | SocketKind::XSub | SocketKind::XPub => {
                Err(FlowMqError::Socket {
                    reason: format!("{kind:?} is not implemented by the default transport"),
                })
            }
        }
    }
}

enum Role {
    /// Bound side of a Push/Pull fan-in pipe; only `Pull` populates this.
    PipeInbox(Arc<PipeState>),
    /// Connected side of a Push/Pull fan-in pipe; only `Push` populates this.
    PipeOutbox(Arc<PipeState>),
    /// Either half of a symmetric two-way pipe (Pair/Request/Reply).
    Pair { inbox: Arc<PipeState>, outbox: Arc<PipeState> },
    /// The publishing side of a topic.
    Publisher(Arc<TopicState>),
    /// A registered listener on a topic.
    Subscriber(Arc<PipeState>),
}

pub struct DefaultSocket {
    kind: SocketKind,
    role: Mutex<Option<Role>>,
    interrupted: AtomicBool,
}

impl DefaultSocket {
    fn new(kind: SocketKind) -> Self {
        Self {
            kind,
            role: Mutex::new(None),
            interrupted: AtomicBool::new(false),
        }
    }

    fn not_bound() -> FlowMqError {
        FlowMqError::Socket {
            reason: "socket has no bound/connected endpoint".into(),
        }
    }

    fn unidirectional(kind: SocketKind, op: &str) -> FlowMqError {
        FlowMqError::Socket {
            reason: format!("{kind:?} does not support {op}"),
        }
    }
}

impl Socket for DefaultSocket {
    fn kind(&self) -> SocketKind {
        self.kind
    }

    fn bind(&self, address: &str) -> FlowMqResult<()> {
        let mut role = self.role.lock();
        match self.kind {
            SocketKind::Pull => {
                let inbox = PipeState::new();
                if REGISTRY.contains_key(address) {
                    return Err(FlowMqError::ChannelConfiguration {
                        field: "address".into(),
                        message: format!("{address} is already bound"),
                    });
                }
                REGISTRY.insert(address.to_string(), Endpoint::Pipe(inbox.clone()));
                *role = Some(Role::PipeInbox(inbox));
                Ok(())
            }
            SocketKind::Publish => {
                let topic = Arc::new(TopicState {
                    subscribers: Mutex::new(Vec::new()),
                });
                if REGISTRY.contains_key(address) {
                    return Err(FlowMqError::ChannelConfiguration {
                        field: "address".into(),
                        message: format!("{address} is already bound"),
                    });
                }
                REGISTRY.insert(address.to_string(), Endpoint::Topic(topic.clone()));
                *role = Some(Role::Publisher(topic));
                Ok(())
            }
            SocketKind::Reply | SocketKind::Pair => {
                let pair = Arc::new(PairState {
                    to_bound: PipeState::new(),
                    to_connected: PipeState::new(),
                });
                if REGISTRY.contains_key(address) {
                    return Err(FlowMqError::ChannelConfiguration {
                        field: "address".into(),
                        message: format!("{address} is already bound"),
                    });
                }
                let inbox = pair.to_bound.clone();
                let outbox = pair.to_connected.clone();
                REGISTRY.insert(address.to_string(), Endpoint::Pair(pair));
                *role = Some(Role::Pair { inbox, outbox });
                Ok(())
            }
            SocketKind::Push | SocketKind::Request | SocketKind::Subscribe => {
                Err(FlowMqError::ChannelConfiguration {
                    field: "method".into(),
                    message: format!("{:?} must connect, not bind", self.kind),
                })
            }
            SocketKind::Dealer | SocketKind::Router | SocketKind::XSub | SocketKind::XPub => {
                unreachable!("rejected at new_socket")
            }
        }
    }

    fn connect(&self, address: &str) -> FlowMqResult<()> {
        let mut role = self.role.lock();
        match self.kind {
            SocketKind::Push => {
                let endpoint = REGISTRY.get(address).ok_or_else(|| FlowMqError::Transport {
                    reason: format!("no endpoint bound at {address}"),
                })?;
                match &*endpoint {
                    Endpoint::Pipe(inbox) => {
                        inbox.peers.fetch_add(1, Ordering::SeqCst);
                        *role = Some(Role::PipeOutbox(inbox.clone()));
                        Ok(())
                    }
                    _ => Err(FlowMqError::Transport {
                        reason: format!("{address} is not a pipe endpoint"),
                    }),
                }
            }
            SocketKind::Subscribe => {
                let endpoint = REGISTRY.get(address).ok_or_else(|| FlowMqError::Transport {
                    reason: format!("no endpoint bound at {address}"),
                })?;
                match &*endpoint {
                    Endpoint::Topic(topic) => {
                        let inbox = PipeState::new();
                        topic.subscribers.lock().push(inbox.clone());
                        *role = Some(Role::Subscriber(inbox));
                        Ok(())
                    }
                    _ => Err(FlowMqError::Transport {
                        reason: format!("{address} is not a topic endpoint"),
                    }),
                }
            }
            SocketKind::Request | SocketKind::Pair => {
                let endpoint = REGISTRY.get(address).ok_or_else(|| FlowMqError::Transport {
                    reason: format!("no endpoint bound at {address}"),
                })?;
                match &*endpoint {
                    Endpoint::Pair(pair) => {
                        *role = Some(Role::Pair {
                            inbox: pair.to_connected.clone(),
                            outbox: pair.to_bound.clone(),
                        });
                        Ok(())
                    }
                    _ => Err(FlowMqError::Transport {
                        reason: format!("{address} is not a pair endpoint"),
                    }),
                }
            }
            SocketKind::Pull | SocketKind::Publish | SocketKind::Reply => {
                Err(FlowMqError::ChannelConfiguration {
                    field: "method".into(),
                    message: format!("{:?} must bind, not connect", self.kind),
                })
            }
            SocketKind::Dealer | SocketKind::Router | SocketKind::XSub | SocketKind::XPub => {
                unreachable!("rejected at new_socket")
            }
        }
    }

    fn send(&self, msg: Message, timeout_ms: i64) -> FlowMqResult<TransferOutcome> {
        self.send_multipart(vec![msg], timeout_ms)
    }

    fn receive(&self, timeout_ms: i64) -> FlowMqResult<(TransferOutcome, Option<Message>)> {
        let (outcome, mut parts) = self.receive_multipart(timeout_ms)?;
        Ok((outcome, if parts.is_empty() { None } else { Some(parts.remove(0)) }))
    }

    fn send_multipart(&self, parts: Vec<Message>, timeout_ms: i64) -> FlowMqResult<TransferOutcome> {
        let role = self.role.lock();
        let total: usize = parts.iter().map(|m| m.size()).sum();
        match (&self.kind, role.as_ref()) {
            (SocketKind::Push, Some(Role::PipeOutbox(outbox))) => {
                outbox.push(parts);
                Ok(TransferOutcome::Transferred(total))
            }
            (SocketKind::Reply | SocketKind::Request | SocketKind::Pair, Some(Role::Pair { outbox, .. })) => {
                outbox.push(parts);
                Ok(TransferOutcome::Transferred(total))
            }
            (SocketKind::Publish, Some(Role::Publisher(topic))) => {
                let subs = topic.subscribers.lock().clone();
                let mut parts = parts;
                for (i, sub) in subs.iter().enumerate() {
                    let envelope = if i + 1 == subs.len() {
                        std::mem::take(&mut parts)
                    } else {
                        parts.iter().map(|m| m.copy()).collect::<FlowMqResult<Vec<_>>>()?
                    };
                    sub.push(envelope);
                }
                Ok(TransferOutcome::Transferred(total))
            }
            (_, None) => Err(Self::not_bound()),
            _ => Err(Self::unidirectional(self.kind, "send")),
        }
    }

    fn receive_multipart(&self, timeout_ms: i64) -> FlowMqResult<(TransferOutcome, Vec<Message>)> {
        let role = self.role.lock();
        let inbox = match (&self.kind, role.as_ref()) {
            (SocketKind::Pull, Some(Role::PipeInbox(inbox))) => inbox.clone(),
            (SocketKind::Reply | SocketKind::Request | SocketKind::Pair, Some(Role::Pair { inbox, .. })) => {
                inbox.clone()
            }
            (SocketKind::Subscribe, Some(Role::Subscriber(inbox))) => inbox.clone(),
            (_, None) => return Err(Self::not_bound()),
            _ => return Err(Self::unidirectional(self.kind, "receive")),
        };
        drop(role);

        let result = poll_with_timeout(
            timeout_ms,
            || self.interrupted.load(Ordering::SeqCst),
            || inbox.try_pop(),
        );
        match result {
            PollResult::Ready(envelope) => {
                let total: usize = envelope.iter().map(|m| m.size()).sum();
                Ok((TransferOutcome::Transferred(total), envelope))
            }
            PollResult::TimedOut => Ok((TransferOutcome::Timeout, Vec::new())),
            PollResult::Interrupted => Ok((TransferOutcome::Interrupted, Vec::new())),
        }
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.interrupted.store(false, Ordering::SeqCst);
    }

    fn peer_count(&self) -> usize {
        match self.role.lock().as_ref() {
            Some(Role::PipeInbox(inbox)) => inbox.peers.load(Ordering::SeqCst),
            Some(Role::PipeOutbox(_)) => 1,
            Some(Role::Pair { .. }) => 1,
            Some(Role::Publisher(topic)) => topic.subscribers.lock().len(),
            Some(Role::Subscriber(_)) => 1,
            None => 0,
        }
    }
}
