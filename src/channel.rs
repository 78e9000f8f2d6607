//! Channel (component D, spec.md §4.4): a named, validated binding of a
//! socket to an endpoint, with buffer/timeout/linger policy.

use crate::error::{FlowMqError, FlowMqResult};
use crate::transport::{Message, Socket, SocketKind, Transport, TransferOutcome, TransportTag};
use rand::seq::SliceRandom;
use std::sync::Arc;

/// How a channel's socket reaches its peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Bind,
    Connect,
}

/// One subchannel's mutable configuration. Every mutator sets the channel's
/// dirty flag (`validate()` must run again before `bind`/`connect`).
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub name: String,
    pub subchannel: usize,
    pub kind: SocketKind,
    pub method: Option<Method>,
    pub address: Option<String>,
    pub transport: TransportTag,
    pub send_buffer_size: usize,
    pub receive_buffer_size: usize,
    pub send_kernel_size: usize,
    pub receive_kernel_size: usize,
    pub send_timeout_ms: i64,
    pub receive_timeout_ms: i64,
    pub linger_ms: u64,
    pub rate_logging_interval_s: u64,
    pub auto_bind: bool,
    pub port_range: (u16, u16),
}

impl ChannelConfig {
    pub fn new(name: impl Into<String>, subchannel: usize, kind: SocketKind) -> Self {
        Self {
            name: name.into(),
            subchannel,
            kind,
            method: None,
            address: None,
            transport: TransportTag::Default,
            send_buffer_size: 1000,
            receive_buffer_size: 1000,
            send_kernel_size: 0,
            receive_kernel_size: 0,
            send_timeout_ms: 100,
            receive_timeout_ms: 100,
            linger_ms: 500,
            rate_logging_interval_s: 0,
            auto_bind: false,
            port_range: (22000, 22999),
        }
    }
}

/// Lifecycle: constructed -> mutated freely while invalid -> `validate()`
/// seals the configuration -> `bind`/`connect` seats the underlying socket.
pub struct Channel {
    config: ChannelConfig,
    validated: bool,
    socket: Option<Arc<dyn Socket>>,
}

impl Channel {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            validated: false,
            socket: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn subchannel(&self) -> usize {
        self.config.subchannel
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Any mutator unvalidates the channel; callers go back through
    /// `validate()` before `bind`/`connect` run again.
    pub fn with_config(&mut self, f: impl FnOnce(&mut ChannelConfig)) {
        f(&mut self.config);
        self.validated = false;
    }

    /// Enforces that method/address/transport are set to recognized values
    /// and that buffer/timeout/linger values lie in sensible ranges.
    pub fn validate(&mut self) -> FlowMqResult<()> {
        let c = &self.config;
        if c.name.is_empty() {
            return Err(FlowMqError::ChannelConfiguration {
                field: "name".into(),
                message: "channel name must not be empty".into(),
            });
        }
        if c.method.is_none() {
            return Err(FlowMqError::ChannelConfiguration {
                field: "method".into(),
                message: "method must be bind or connect".into(),
            });
        }
        if c.address.as_deref().unwrap_or("").is_empty() {
            return Err(FlowMqError::ChannelConfiguration {
                field: "address".into(),
                message: "address must not be empty".into(),
            });
        }
        if c.send_timeout_ms < -1 || c.receive_timeout_ms < -1 {
            return Err(FlowMqError::ChannelConfiguration {
                field: "timeout".into(),
                message: "timeout must be -1 (forever), 0 (try-once), or positive".into(),
            });
        }
        if c.auto_bind && c.port_range.0 > c.port_range.1 {
            return Err(FlowMqError::ChannelConfiguration {
                field: "port_range".into(),
                message: format!(
                    "invalid auto-bind port range [{}, {}]",
                    c.port_range.0, c.port_range.1
                ),
            });
        }
        self.validated = true;
        Ok(())
    }

    fn require_validated(&self) -> FlowMqResult<()> {
        if !self.validated {
            return Err(FlowMqError::ChannelConfiguration {
                field: "state".into(),
                message: format!("channel {} must be validated before use", self.config.name),
            });
        }
        Ok(())
    }

    /// Instantiates the underlying socket from `transport` and binds it at
    /// the channel's configured address.
    pub fn bind(&mut self, transport: &dyn Transport) -> FlowMqResult<()> {
        self.require_validated()?;
        let socket = transport.new_socket(self.config.kind)?;
        let address = self.config.address.clone().unwrap();
        match socket.bind(&address) {
            Ok(()) => {
                self.socket = Some(socket);
                Ok(())
            }
            Err(e) if self.config.auto_bind => {
                tracing::warn!(channel = %self.config.name, error = %e, "bind failed, attempting auto-bind");
                self.bind_endpoint(transport, socket)
            }
            Err(e) => Err(e),
        }
    }

    /// Auto-bind: tries ports in `[port_min, port_max]` in randomized order,
    /// writing the first successful address back into the channel.
    fn bind_endpoint(&mut self, _transport: &dyn Transport, socket: Arc<dyn Socket>) -> FlowMqResult<()> {
        let (min, max) = self.config.port_range;
        let mut ports: Vec<u16> = (min..=max).collect();
        ports.shuffle(&mut rand::rng());

        let host = self
            .config
            .address
            .as_deref()
            .and_then(|a| a.rsplit_once(':').map(|(h, _)| h))
            .unwrap_or("tcp://127.0.0.1")
            .to_string();

        for port in ports {
            let candidate = format!("{host}:{port}");
            if socket.bind(&candidate).is_ok() {
                self.config.address = Some(candidate);
                self.socket = Some(socket);
                return Ok(());
            }
        }
        Err(FlowMqError::ChannelConfiguration {
            field: "port_range".into(),
            message: format!(
                "auto-bind exhausted port range [{min}, {max}] for channel {}",
                self.config.name
            ),
        })
    }

    pub fn connect(&mut self, transport: &dyn Transport) -> FlowMqResult<()> {
        self.require_validated()?;
        let socket = transport.new_socket(self.config.kind)?;
        let address = self.config.address.clone().unwrap();
        socket.connect(&address)?;
        self.socket = Some(socket);
        Ok(())
    }

    pub fn socket(&self) -> Option<&Arc<dyn Socket>> {
        self.socket.as_ref()
    }

    /// Sends with the channel's default timeout substituted when
    /// `timeout_ms` is `None`.
    pub fn send(&self, msg: Message, timeout_ms: Option<i64>) -> FlowMqResult<TransferOutcome> {
        let socket = self.socket.as_ref().ok_or_else(|| FlowMqError::Socket {
            reason: format!("channel {} has no bound/connected socket", self.config.name),
        })?;
        socket.send(msg, timeout_ms.unwrap_or(self.config.send_timeout_ms))
    }

    pub fn receive(&self, timeout_ms: Option<i64>) -> FlowMqResult<(TransferOutcome, Option<Message>)> {
        let socket = self.socket.as_ref().ok_or_else(|| FlowMqError::Socket {
            reason: format!("channel {} has no bound/connected socket", self.config.name),
        })?;
        socket.receive(timeout_ms.unwrap_or(self.config.receive_timeout_ms))
    }
}
