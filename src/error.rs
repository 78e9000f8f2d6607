//! Unified error taxonomy for the runtime.
//!
//! One enum, grouped the way `§7 ERROR HANDLING DESIGN` groups the original
//! taxonomy: transport-transient conditions never reach here (they are
//! reported as `TransferOutcome::Timeout`/`Interrupted`), everything else
//! (configuration, control arbitration, allocation exhaustion, invariant
//! violations) does.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for all FlowMQ operations.
#[derive(Error, Debug)]
pub enum FlowMqError {
    #[error("channel configuration error: {field} - {message}")]
    ChannelConfiguration { field: String, message: String },

    #[error("property not found: {key}")]
    PropertyNotFound { key: String },

    #[error("illegal transition: {input:?} is not defined for state {state:?}")]
    IllegalTransition {
        state: crate::state_machine::State,
        input: crate::state_machine::Transition,
    },

    #[error("device control error: {reason}")]
    DeviceControl { reason: String },

    #[error("poller error: {reason}")]
    Poller { reason: String },

    #[error("socket error: {reason}")]
    Socket { reason: String },

    #[error("shared-memory allocation failed after {attempts} attempt(s): {requested} bytes")]
    MessageBadAlloc { requested: usize, attempts: u32 },

    #[error("transport error: {reason}")]
    Transport { reason: String },

    #[error("transport unavailable: {transport}")]
    TransportUnavailable { transport: String },

    #[error("context error: {reason}")]
    Context { reason: String },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    #[error("configuration parse error: {0}")]
    ConfigParse(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type FlowMqResult<T> = Result<T, FlowMqError>;

/// Broad category, used for logging/metrics grouping the way
/// `CommyError::category` grouped the teacher's error surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Control,
    Transport,
    Resource,
    Io,
}

impl FlowMqError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            FlowMqError::ChannelConfiguration { .. } | FlowMqError::ConfigParse(_) => {
                ErrorCategory::Configuration
            }
            FlowMqError::DeviceControl { .. } | FlowMqError::IllegalTransition { .. } => {
                ErrorCategory::Control
            }
            FlowMqError::Poller { .. }
            | FlowMqError::Socket { .. }
            | FlowMqError::Transport { .. }
            | FlowMqError::TransportUnavailable { .. }
            | FlowMqError::Context { .. } => ErrorCategory::Transport,
            FlowMqError::PropertyNotFound { .. } | FlowMqError::MessageBadAlloc { .. } => {
                ErrorCategory::Resource
            }
            FlowMqError::Io { .. } | FlowMqError::InvalidArgument(_) => ErrorCategory::Io,
        }
    }

    /// Transport conditions that a caller may reasonably retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FlowMqError::TransportUnavailable { .. } | FlowMqError::MessageBadAlloc { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_configuration_errors() {
        let e = FlowMqError::ChannelConfiguration {
            field: "address".into(),
            message: "missing".into(),
        };
        assert_eq!(e.category(), ErrorCategory::Configuration);
        assert!(!e.is_retryable());
    }

    #[test]
    fn bad_alloc_is_retryable() {
        let e = FlowMqError::MessageBadAlloc {
            requested: 128,
            attempts: 3,
        };
        assert!(e.is_retryable());
    }
}
