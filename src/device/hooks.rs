//! User-overridable device hooks (spec.md §4.6 table) and the
//! `ConditionalRun` rate limiter that paces them.

use crate::device::DeviceContext;
use crate::error::FlowMqResult;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// One method per FSM state that runs user code, with a framework default
/// (a no-op) for every one of them — the way `AuthProvider`/`Transport` are
/// trait objects behind `Arc<dyn _>` in the teacher's manager layer.
pub trait DeviceHooks: Send + Sync {
    fn init(&self, _ctx: &DeviceContext) -> FlowMqResult<()> {
        Ok(())
    }
    fn bind(&self, _ctx: &DeviceContext) -> FlowMqResult<()> {
        Ok(())
    }
    fn connect(&self, _ctx: &DeviceContext) -> FlowMqResult<()> {
        Ok(())
    }
    fn init_task(&self, _ctx: &DeviceContext) -> FlowMqResult<()> {
        Ok(())
    }
    fn pre_run(&self, _ctx: &DeviceContext) -> FlowMqResult<()> {
        Ok(())
    }
    fn run(&self, _ctx: &DeviceContext) -> FlowMqResult<()> {
        Ok(())
    }
    /// Returns whether the device should keep running; the framework polls
    /// this once per loop of the `Running` state, paced by `RateLimiter`
    /// when one is configured.
    fn conditional_run(&self, _ctx: &DeviceContext) -> FlowMqResult<bool> {
        Ok(false)
    }
    fn post_run(&self, _ctx: &DeviceContext) -> FlowMqResult<()> {
        Ok(())
    }
    fn reset_task(&self, _ctx: &DeviceContext) -> FlowMqResult<()> {
        Ok(())
    }
    fn reset(&self, _ctx: &DeviceContext) -> FlowMqResult<()> {
        Ok(())
    }
}

/// A framework default that never asks to keep running — a device wired
/// with no hooks simply executes each state's framework action and moves
/// on.
pub struct NoopHooks;

impl DeviceHooks for NoopHooks {}

/// Paces `ConditionalRun` to at most one call per period (spec.md §6's
/// `--rate` option; the CLI flag parsing itself is out of scope — this type
/// is what the core consumes). Grounded on `mesh/load_balancer.rs`'s
/// circuit-breaker timer, which gates a state transition on
/// `Instant::elapsed()` against a configured duration the same way.
pub struct RateLimiter {
    period: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(rate_hz: f64) -> Self {
        assert!(rate_hz > 0.0, "rate must be positive");
        Self {
            period: Duration::from_secs_f64(1.0 / rate_hz),
            last: Mutex::new(None),
        }
    }

    /// `true` if at least one period has elapsed since the last allowed
    /// call (or this is the first call); updates the internal clock when it
    /// returns `true`.
    pub fn allow(&self) -> bool {
        let mut last = self.last.lock();
        let now = Instant::now();
        match *last {
            Some(prev) if now.duration_since(prev) < self.period => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_allows_first_call_then_throttles() {
        let limiter = RateLimiter::new(1000.0);
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn rate_limiter_allows_again_after_the_period_elapses() {
        let limiter = RateLimiter::new(200.0);
        assert!(limiter.allow());
        std::thread::sleep(Duration::from_millis(10));
        assert!(limiter.allow());
    }
}
