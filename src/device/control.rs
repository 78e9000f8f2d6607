//! Device control arbitration (spec.md §4.6): `TakeDeviceControl` /
//! `StealDeviceControl` / `ReleaseDeviceControl` / `WaitForReleaseDeviceControl`,
//! and the authorization check `ChangeDeviceState` is gated behind.

use crate::error::{FlowMqError, FlowMqResult};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Single-owner arbitration over who may call `change_state` on a device's
/// FSM. `None` means uncontrolled: anyone may drive it.
pub struct DeviceControl {
    owner: Mutex<Option<String>>,
    released: Condvar,
}

impl Default for DeviceControl {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceControl {
    pub fn new() -> Self {
        Self {
            owner: Mutex::new(None),
            released: Condvar::new(),
        }
    }

    pub fn current_owner(&self) -> Option<String> {
        self.owner.lock().clone()
    }

    /// Succeeds only if nobody currently holds control.
    pub fn take(&self, controller_id: impl Into<String>) -> FlowMqResult<()> {
        let mut owner = self.owner.lock();
        if owner.is_some() {
            return Err(FlowMqError::DeviceControl {
                reason: "device control is already held".into(),
            });
        }
        *owner = Some(controller_id.into());
        Ok(())
    }

    /// Unconditionally takes control, displacing any current holder. The
    /// emergency path a host process uses to force the FSM toward `Exiting`
    /// even while a controller holds it (see `Device::interrupt_and_exit`).
    /// Does not satisfy `wait_for_release`: the new holder still holds it.
    pub fn steal(&self, controller_id: impl Into<String>) {
        *self.owner.lock() = Some(controller_id.into());
    }

    /// Succeeds only for the current holder.
    pub fn release(&self, controller_id: &str) -> FlowMqResult<()> {
        let mut owner = self.owner.lock();
        match owner.as_deref() {
            Some(id) if id == controller_id => {
                *owner = None;
                self.released.notify_all();
                Ok(())
            }
            _ => Err(FlowMqError::DeviceControl {
                reason: format!("{controller_id} does not currently hold device control"),
            }),
        }
    }

    /// Blocks until control is released (or `timeout` elapses). Returns
    /// `true` if control was observed released. A `steal()` does not wake
    /// this: the condvar only fires from `release()`, so a waiter sleeps
    /// through any number of steals until someone actually releases.
    pub fn wait_for_release(&self, timeout: Option<Duration>) -> bool {
        let mut owner = self.owner.lock();
        match timeout {
            Some(d) => {
                let deadline = Instant::now() + d;
                while owner.is_some() {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return owner.is_none();
                    }
                    self.released.wait_for(&mut owner, remaining);
                }
                true
            }
            None => {
                while owner.is_some() {
                    self.released.wait(&mut owner);
                }
                true
            }
        }
    }

    /// `ChangeDeviceState` arbitration: anyone may drive an uncontrolled
    /// device; a controlled one only accepts its own controller.
    pub fn authorize(&self, controller_id: Option<&str>) -> FlowMqResult<()> {
        let owner = self.owner.lock();
        match (owner.as_deref(), controller_id) {
            (None, _) => Ok(()),
            (Some(o), Some(c)) if o == c => Ok(()),
            (Some(o), _) => Err(FlowMqError::DeviceControl {
                reason: format!("device is controlled by {o}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_take_is_rejected() {
        let dc = DeviceControl::new();
        dc.take("a").unwrap();
        assert!(dc.take("b").is_err());
    }

    #[test]
    fn release_by_non_owner_is_rejected() {
        let dc = DeviceControl::new();
        dc.take("a").unwrap();
        assert!(dc.release("b").is_err());
        assert!(dc.release("a").is_ok());
    }

    #[test]
    fn steal_displaces_current_holder() {
        let dc = DeviceControl::new();
        dc.take("a").unwrap();
        dc.steal("b");
        assert_eq!(dc.current_owner(), Some("b".to_string()));
    }

    #[test]
    fn uncontrolled_device_authorizes_anyone() {
        let dc = DeviceControl::new();
        assert!(dc.authorize(None).is_ok());
        assert!(dc.authorize(Some("whoever")).is_ok());
    }

    #[test]
    fn controlled_device_rejects_other_controllers() {
        let dc = DeviceControl::new();
        dc.take("a").unwrap();
        assert!(dc.authorize(Some("a")).is_ok());
        assert!(dc.authorize(Some("b")).is_err());
        assert!(dc.authorize(None).is_err());
    }

    #[test]
    fn wait_for_release_returns_immediately_when_uncontrolled() {
        let dc = DeviceControl::new();
        assert!(dc.wait_for_release(Some(Duration::from_millis(1))));
    }

    #[test]
    fn steal_does_not_satisfy_a_waiter() {
        let dc = DeviceControl::new();
        dc.take("a").unwrap();
        dc.steal("b");
        assert!(!dc.wait_for_release(Some(Duration::from_millis(20))));
        assert!(dc.release("b").is_ok());
    }
}
