//! FlowMQ: a cooperative-state-machine messaging runtime for data-acquisition
//! and event-processing pipelines.
//!
//! A `flowmq` process hosts one or more [`device::Device`]s, each driven by
//! its own [`state_machine::StateMachine`] and wired together through named
//! [`channel::Channel`]s over a [`transport::Transport`] (the in-process
//! default transport, or the shared-memory transport behind the `shmem`
//! feature). [`property::PropertyStore`] and [`event_bus::EventBus`] give
//! devices and their controllers a shared, thread-safe way to exchange
//! configuration and lifecycle signals.

pub mod channel;
pub mod config;
pub mod device;
pub mod error;
pub mod event_bus;
pub mod property;
pub mod session;
pub mod state_machine;
pub mod transport;

#[cfg(feature = "remote-sdk")]
pub mod remote;

pub use channel::{Channel, ChannelConfig, Method};
pub use config::RuntimeConfig;
pub use device::{Device, DeviceContext, DeviceControl, DeviceHooks, NoopHooks, RateLimiter};
pub use error::{FlowMqError, FlowMqResult};
pub use event_bus::EventBus;
pub use property::{PropertyStore, PropertyValue};
pub use session::{session_id, SessionResources};
pub use state_machine::{State, StateMachine, Transition};
pub use transport::{make_transport, Message, Socket, SocketKind, Transport, TransportTag};

/// Installs a `tracing_subscriber::fmt` layer honoring `FAIRMQ_SEVERITY`
/// (falling back to `info`), the way the manager layer's binaries set up
/// logging before touching any device state. Safe to call more than once;
/// only the first call takes effect.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("FAIRMQ_SEVERITY").unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}
