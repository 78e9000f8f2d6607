//! External interfaces (spec.md §6): the consumed surfaces a launcher would
//! populate before handing control to [`crate::device::Device`]. No argv
//! parsing lives here — only the JSON configuration schema, the
//! `--channel-config` sub-option grammar, and the option structs a CLI
//! front-end would fill in. Deserialization uses `serde`/`serde_json`, the
//! way the manager layer's own config types do.

use crate::channel::{ChannelConfig, Method};
use crate::error::{FlowMqError, FlowMqResult};
use crate::transport::{SocketKind, TransportTag};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// `fairMQOptions.devices[]` (spec.md §6 "JSON configuration schema").
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FairMqOptions {
    #[serde(rename = "fairMQOptions")]
    pub fair_mq_options: FairMqOptionsInner,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FairMqOptionsInner {
    pub devices: Vec<DeviceConfigEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfigEntry {
    pub id: String,
    #[serde(default)]
    pub channels: Vec<ChannelConfigEntry>,
}

/// One JSON channel entry; `sockets[]` carries per-subchannel overrides that
/// layer on top of the channel-level defaults the way spec.md describes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfigEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub method: String,
    pub address: String,
    #[serde(default)]
    pub transport: Option<String>,
    #[serde(default)]
    pub sockets: Vec<SocketOverride>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SocketOverride {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, rename = "sndBufSize")]
    pub send_buffer_size: Option<usize>,
    #[serde(default, rename = "rcvBufSize")]
    pub receive_buffer_size: Option<usize>,
    #[serde(default, rename = "sndTimeoutMs")]
    pub send_timeout_ms: Option<i64>,
    #[serde(default, rename = "rcvTimeoutMs")]
    pub receive_timeout_ms: Option<i64>,
    #[serde(default)]
    pub linger: Option<u64>,
    #[serde(default, rename = "autoBind")]
    pub auto_bind: Option<bool>,
    #[serde(default, rename = "portRangeMin")]
    pub port_range_min: Option<u16>,
    #[serde(default, rename = "portRangeMax")]
    pub port_range_max: Option<u16>,
}

impl ChannelConfigEntry {
    /// Expands this entry into one `ChannelConfig` per subchannel (`sockets[]`
    /// length, or one subchannel with channel-level defaults if empty).
    pub fn to_channel_configs(&self) -> FlowMqResult<Vec<ChannelConfig>> {
        let kind = parse_socket_kind(&self.kind)?;
        let method = parse_method(&self.method)?;
        let transport = self
            .transport
            .as_deref()
            .map(TransportTag::from_str)
            .transpose()?
            .unwrap_or(TransportTag::Default);

        let overrides = if self.sockets.is_empty() {
            vec![SocketOverride::default()]
        } else {
            self.sockets.clone()
        };

        Ok(overrides
            .into_iter()
            .enumerate()
            .map(|(index, over)| {
                let mut config = ChannelConfig::new(self.name.clone(), index, kind);
                config.method = Some(method);
                config.address = Some(over.address.unwrap_or_else(|| self.address.clone()));
                config.transport = transport;
                if let Some(v) = over.send_buffer_size {
                    config.send_buffer_size = v;
                }
                if let Some(v) = over.receive_buffer_size {
                    config.receive_buffer_size = v;
                }
                if let Some(v) = over.send_timeout_ms {
                    config.send_timeout_ms = v;
                }
                if let Some(v) = over.receive_timeout_ms {
                    config.receive_timeout_ms = v;
                }
                if let Some(v) = over.linger {
                    config.linger_ms = v;
                }
                if let Some(v) = over.auto_bind {
                    config.auto_bind = v;
                }
                if let Some(v) = over.port_range_min {
                    config.port_range.0 = v;
                }
                if let Some(v) = over.port_range_max {
                    config.port_range.1 = v;
                }
                config
            })
            .collect())
    }
}

/// Parses one `--channel-config` sub-option entry: `name:key=value,key=value,...`.
/// Recognized keys match spec.md §6 exactly; unknown keys are rejected rather
/// than silently ignored, since a typo'd key there is almost always a
/// misconfigured channel.
pub fn parse_channel_config_entry(entry: &str) -> FlowMqResult<ChannelConfigEntry> {
    let (name, rest) = entry.split_once(':').ok_or_else(|| {
        FlowMqError::ConfigParse(format!("channel-config entry missing ':' separator: {entry}"))
    })?;
    let mut kind = None;
    let mut method = None;
    let mut address = None;
    let mut transport = None;
    let mut over = SocketOverride::default();

    for pair in rest.split(',').filter(|s| !s.is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            FlowMqError::ConfigParse(format!("malformed key=value pair in channel-config: {pair}"))
        })?;
        match key {
            "type" => kind = Some(value.to_string()),
            "method" => method = Some(value.to_string()),
            "address" => address = Some(value.to_string()),
            "transport" => transport = Some(value.to_string()),
            "sndBufSize" => over.send_buffer_size = Some(parse_int(key, value)?),
            "rcvBufSize" => over.receive_buffer_size = Some(parse_int(key, value)?),
            "sndKernelSize" | "rcvKernelSize" | "rateLogging" | "numSockets" => {
                // Accepted and parsed for validation parity with spec.md's
                // key list; not yet consumed by `ChannelConfig`.
                parse_int::<u64>(key, value)?;
            }
            "sndTimeoutMs" => over.send_timeout_ms = Some(parse_int(key, value)?),
            "rcvTimeoutMs" => over.receive_timeout_ms = Some(parse_int(key, value)?),
            "linger" => over.linger = Some(parse_int(key, value)?),
            "portRangeMin" => over.port_range_min = Some(parse_int(key, value)?),
            "portRangeMax" => over.port_range_max = Some(parse_int(key, value)?),
            "autoBind" => {
                over.auto_bind = Some(value.parse::<bool>().map_err(|_| {
                    FlowMqError::ConfigParse(format!("autoBind must be true/false, got {value}"))
                })?)
            }
            other => {
                return Err(FlowMqError::ConfigParse(format!(
                    "unrecognized channel-config key: {other}"
                )))
            }
        }
    }

    Ok(ChannelConfigEntry {
        name: name.to_string(),
        kind: kind.ok_or_else(|| FlowMqError::ConfigParse(format!("{name}: missing type=")))?,
        method: method.ok_or_else(|| FlowMqError::ConfigParse(format!("{name}: missing method=")))?,
        address: address.ok_or_else(|| FlowMqError::ConfigParse(format!("{name}: missing address=")))?,
        transport,
        sockets: vec![over],
    })
}

fn parse_int<T: FromStr>(key: &str, value: &str) -> FlowMqResult<T> {
    value
        .parse::<T>()
        .map_err(|_| FlowMqError::ConfigParse(format!("{key} must be an integer, got {value}")))
}

fn parse_socket_kind(s: &str) -> FlowMqResult<SocketKind> {
    match s {
        "push" => Ok(SocketKind::Push),
        "pull" => Ok(SocketKind::Pull),
        "pub" => Ok(SocketKind::Publish),
        "sub" => Ok(SocketKind::Subscribe),
        "req" => Ok(SocketKind::Request),
        "rep" => Ok(SocketKind::Reply),
        "pair" => Ok(SocketKind::Pair),
        "dealer" => Ok(SocketKind::Dealer),
        "router" => Ok(SocketKind::Router),
        "xsub" => Ok(SocketKind::XSub),
        "xpub" => Ok(SocketKind::XPub),
        other => Err(FlowMqError::ConfigParse(format!("unknown socket type: {other}"))),
    }
}

fn parse_method(s: &str) -> FlowMqResult<Method> {
    match s {
        "bind" => Ok(Method::Bind),
        "connect" => Ok(Method::Connect),
        other => Err(FlowMqError::ConfigParse(format!("unknown method: {other}"))),
    }
}

/// Device-level options a launcher would populate from `--id`, `--session`,
/// `--transport`, `--init-timeout`, `--control`, `--rate` before constructing
/// a [`crate::device::Device`].
#[derive(Debug, Clone)]
pub struct DeviceOptions {
    pub id: String,
    pub session_name: String,
    pub default_transport: TransportTag,
    pub init_timeout: std::time::Duration,
    pub control_mode: ControlMode,
    pub rate_hz: Option<f64>,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            id: String::new(),
            session_name: "default".into(),
            default_transport: TransportTag::Default,
            init_timeout: std::time::Duration::from_secs(120),
            control_mode: ControlMode::Static,
            rate_hz: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Static,
    Interactive,
    Dds,
}

/// `--shm-*` options (spec.md §6 "Shared-memory").
#[derive(Debug, Clone)]
pub struct ShmemOptions {
    pub segment_size: usize,
    pub allocation: ShmemAllocation,
    pub segment_id: u16,
    pub shmid_override: Option<u64>,
    pub zero_segment_on_creation: bool,
    pub bad_alloc_max_attempts: i64,
    pub bad_alloc_attempt_interval_ms: u64,
    pub monitor: bool,
    pub no_cleanup: bool,
}

impl Default for ShmemOptions {
    fn default() -> Self {
        Self {
            segment_size: 16 * 1024 * 1024,
            allocation: ShmemAllocation::RbTreeBestFit,
            segment_id: 0,
            shmid_override: None,
            zero_segment_on_creation: true,
            bad_alloc_max_attempts: 3,
            bad_alloc_attempt_interval_ms: 50,
            monitor: true,
            no_cleanup: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmemAllocation {
    RbTreeBestFit,
    SimpleSeqFit,
}

/// Shared-memory monitor CLI surface: `--session`, `--shmid`, `--cleanup`,
/// `--self-destruct`, `--interactive`, `--timeout`, `--daemonize`,
/// `--clean-on-exit`.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub session_name: String,
    pub shmid_override: Option<u64>,
    pub cleanup: bool,
    pub self_destruct: bool,
    pub interactive: bool,
    pub timeout: std::time::Duration,
    pub daemonize: bool,
    pub clean_on_exit: bool,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            session_name: "default".into(),
            shmid_override: None,
            cleanup: false,
            self_destruct: false,
            interactive: false,
            timeout: std::time::Duration::from_millis(5000),
            daemonize: false,
            clean_on_exit: true,
        }
    }
}

/// Bundles the pieces a launcher resolves before handing off to the core:
/// which devices to build and their shmem policy. Exists so `src/config.rs`
/// has one top-level type mirroring `fairMQOptions` as a whole, rather than
/// callers juggling the JSON and CLI shapes separately.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub devices: Vec<DeviceConfigEntry>,
    pub shmem: ShmemOptions,
}

impl RuntimeConfig {
    pub fn from_json(text: &str) -> FlowMqResult<Self> {
        let parsed: FairMqOptions = serde_json::from_str(text).map_err(|e| FlowMqError::ConfigParse(e.to_string()))?;
        Ok(Self {
            devices: parsed.fair_mq_options.devices,
            shmem: ShmemOptions::default(),
        })
    }
}
