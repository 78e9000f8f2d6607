//! Transport Factory + Message/Socket/Poller (component C) and Channel
//! (component D, in `crate::channel`).

pub mod default_transport;
pub mod message;
pub mod poller;
pub mod region;
#[cfg(feature = "shmem")]
pub mod shmem;
pub mod socket;

pub use message::{Deallocator, Message};
pub use poller::Poller;
pub use region::{Region, RegionEvent, RegionFlags};
pub use socket::{Socket, SocketKind, TransferOutcome};

use crate::error::{FlowMqError, FlowMqResult};
use std::sync::Arc;

/// One of the four nameable transports (spec.md §4.3). `ZeroMq` and `Ofi`
/// are nameable but unimplemented in this version — an explicit Open
/// Question in spec.md §9 permits restricting the first version to
/// `Default` + `Shmem`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportTag {
    Default,
    ZeroMq,
    Shmem,
    Ofi,
}

impl std::fmt::Display for TransportTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportTag::Default => "default",
            TransportTag::ZeroMq => "zeromq",
            TransportTag::Shmem => "shmem",
            TransportTag::Ofi => "ofi",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for TransportTag {
    type Err = FlowMqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(TransportTag::Default),
            "zeromq" => Ok(TransportTag::ZeroMq),
            "shmem" => Ok(TransportTag::Shmem),
            "ofi" => Ok(TransportTag::Ofi),
            other => Err(FlowMqError::InvalidArgument(format!(
                "unknown transport tag: {other}"
            ))),
        }
    }
}

/// A factory that produces messages, sockets, pollers, and unmanaged
/// regions for one transport, scoped to a session.
pub trait Transport: Send + Sync {
    fn tag(&self) -> TransportTag;

    fn new_message_empty(&self) -> FlowMqResult<Message>;
    fn new_message_with_size(&self, size: usize) -> FlowMqResult<Message>;
    fn new_message_with_size_aligned(&self, size: usize, alignment: usize) -> FlowMqResult<Message>;

    fn new_socket(&self, kind: SocketKind) -> FlowMqResult<Arc<dyn Socket>>;

    /// Wraps a message produced by a *different* transport so it can be
    /// handed to one of this transport's sockets (spec.md §4.3 "Type
    /// compatibility"). Non-empty foreign buffers get a deallocator that
    /// releases the foreign descriptor; empty buffers get a fresh native
    /// empty message.
    fn adopt_foreign_message(&self, foreign: Message) -> FlowMqResult<Message> {
        if foreign.size() == 0 && foreign.capacity() == 0 {
            return self.new_message_empty();
        }
        let mut native = self.new_message_with_size(foreign.size())?;
        native.data_mut().copy_from_slice(foreign.data());
        Ok(native)
    }
}

/// Produces a `Transport` for a given tag, scoped to a session id. The
/// `Default` and `Shmem` tags always resolve; `ZeroMq`/`Ofi` resolve to
/// `TransportUnavailable` (see module docs).
pub fn make_transport(tag: TransportTag, session_id: u64) -> FlowMqResult<Arc<dyn Transport>> {
    match tag {
        TransportTag::Default => Ok(Arc::new(default_transport::DefaultTransport::new())),
        #[cfg(feature = "shmem")]
        TransportTag::Shmem => Ok(Arc::new(shmem::ShmemTransport::new(session_id)?)),
        #[cfg(not(feature = "shmem"))]
        TransportTag::Shmem => Err(FlowMqError::TransportUnavailable {
            transport: "shmem".into(),
        }),
        TransportTag::ZeroMq | TransportTag::Ofi => {
            let _ = session_id;
            Err(FlowMqError::TransportUnavailable {
                transport: tag.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn unimplemented_transports_are_unavailable_not_panics() {
        assert!(matches!(
            make_transport(TransportTag::ZeroMq, 0),
            Err(FlowMqError::TransportUnavailable { .. })
        ));
        assert!(matches!(
            make_transport(TransportTag::Ofi, 0),
            Err(FlowMqError::TransportUnavailable { .. })
        ));
    }

    #[test]
    fn tag_round_trips_through_str() {
        for tag in [TransportTag::Default, TransportTag::ZeroMq, TransportTag::Shmem, TransportTag::Ofi] {
            assert_eq!(TransportTag::from_str(&tag.to_string()).unwrap(), tag);
        }
    }
}
