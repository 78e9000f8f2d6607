//! Optional async operation-object façade (spec.md §9 "Coroutines / async",
//! gated behind the `remote-sdk` feature).
//!
//! The core is synchronous end to end; this module does not add a
//! remote-procedure-call layer over it (explicitly out of scope, spec.md
//! §1) — it only gives an SDK that drives devices from async code a
//! non-blocking handle onto a [`crate::device::Device`]'s state transitions,
//! via an explicit operation object rather than an `async fn` hiding a
//! blocking call behind a keyword.

use crate::device::Device;
use crate::error::{FlowMqError, FlowMqResult};
use crate::state_machine::{State, Transition};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A pending `change_state` call, run on a blocking executor thread so the
/// async caller's runtime is never blocked by the FSM's condvar wait.
pub struct DeviceOperation {
    handle: JoinHandle<FlowMqResult<State>>,
    cancel: Option<oneshot::Sender<()>>,
}

impl DeviceOperation {
    /// Spawns `change_state(controller_id, input)` onto a blocking task.
    pub fn change_state(device: Arc<Device>, controller_id: Option<String>, input: Transition) -> Self {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle = tokio::task::spawn_blocking(move || {
            if cancel_rx.try_recv().is_ok() {
                return Err(FlowMqError::DeviceControl {
                    reason: "operation cancelled before it ran".into(),
                });
            }
            device.change_state(controller_id.as_deref(), input)
        });
        Self {
            handle,
            cancel: Some(cancel_tx),
        }
    }

    /// Awaits the underlying operation to completion.
    pub async fn complete(self) -> FlowMqResult<State> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(FlowMqError::Context {
                reason: format!("device operation task panicked: {e}"),
            }),
        }
    }

    /// Best-effort cancellation: only effective if the task has not yet
    /// started running (the FSM call itself is synchronous once begun).
    pub fn cancel(mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }

    /// Awaits with a deadline, aborting and returning a timeout error if
    /// `duration` elapses first.
    pub async fn timeout(self, duration: Duration) -> FlowMqResult<State> {
        match tokio::time::timeout(duration, self.handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(FlowMqError::Context {
                reason: format!("device operation task panicked: {e}"),
            }),
            Err(_) => Err(FlowMqError::Context {
                reason: format!("device operation timed out after {duration:?}"),
            }),
        }
    }
}
