//! State Machine (component E): cooperative FSM with an orthogonal error
//! state, queued transitions, and two subscriber hooks.

mod table;

use crate::error::{FlowMqError, FlowMqResult};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Idle,
    InitializingDevice,
    Initialized,
    Binding,
    Bound,
    Connecting,
    DeviceReady,
    InitializingTask,
    Ready,
    Running,
    ResettingTask,
    ResettingDevice,
    Exiting,
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Auto,
    InitDevice,
    CompleteInit,
    Bind,
    Connect,
    InitTask,
    Run,
    Stop,
    ResetTask,
    ResetDevice,
    End,
    ErrorFound,
}

type StateCallback = Arc<dyn Fn(State, State) + Send + Sync>;

struct Inner {
    current: State,
    error_state: State,
    queue: VecDeque<State>,
    queued_subscribers: Vec<(String, StateCallback)>,
    changed_subscribers: Vec<(String, StateCallback)>,
}

/// Cooperative state machine with an orthogonal error sub-machine.
///
/// `change_state` enqueues transitions computed against the *last enqueued*
/// state (`P2`), not the state currently executing; the device runtime's FSM
/// thread drains the queue FIFO via [`StateMachine::wait_next`].
pub struct StateMachine {
    inner: Mutex<Inner>,
    wakeup: Condvar,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: State::Idle,
                error_state: State::Ok,
                queue: VecDeque::new(),
                queued_subscribers: Vec::new(),
                changed_subscribers: Vec::new(),
            }),
            wakeup: Condvar::new(),
        }
    }

    pub fn current_state(&self) -> State {
        self.inner.lock().current
    }

    pub fn current_error_state(&self) -> State {
        self.inner.lock().error_state
    }

    /// The state that the *next* `change_state` call will transition from:
    /// the back of the queue if non-empty, else the currently-executing
    /// state (`P2`).
    pub fn last_queued_state(&self) -> State {
        let guard = self.inner.lock();
        guard.queue.back().copied().unwrap_or(guard.current)
    }

    pub fn next_state_pending(&self) -> bool {
        !self.inner.lock().queue.is_empty()
    }

    pub fn on_state_queued(
        &self,
        subscriber: impl Into<String>,
        callback: impl Fn(State, State) + Send + Sync + 'static,
    ) {
        self.inner
            .lock()
            .queued_subscribers
            .push((subscriber.into(), Arc::new(callback)));
    }

    pub fn unsubscribe_state_queued(&self, subscriber: &str) {
        self.inner.lock().queued_subscribers.retain(|(n, _)| n != subscriber);
    }

    pub fn on_state_change(
        &self,
        subscriber: impl Into<String>,
        callback: impl Fn(State, State) + Send + Sync + 'static,
    ) {
        self.inner
            .lock()
            .changed_subscribers
            .push((subscriber.into(), Arc::new(callback)));
    }

    pub fn unsubscribe_state_change(&self, subscriber: &str) {
        self.inner.lock().changed_subscribers.retain(|(n, _)| n != subscriber);
    }

    /// Enqueue `input`. `ErrorFound` is always resolved against the
    /// orthogonal error state, not the main queue; every other input is
    /// resolved against `last_queued_state` (`P2`). Fires `on_state_queued`
    /// synchronously with the caller, after the queue mutex is released.
    pub fn change_state(&self, input: Transition) -> FlowMqResult<State> {
        let (prev, next) = {
            let mut guard = self.inner.lock();
            if input == Transition::ErrorFound {
                let prev = guard.error_state;
                match table::next_error_state(prev, input) {
                    Some(next) => {
                        guard.error_state = next;
                        guard.queue.push_back(next);
                        (prev, next)
                    }
                    None => {
                        return Err(FlowMqError::IllegalTransition { state: prev, input });
                    }
                }
            } else {
                let prev = guard.queue.back().copied().unwrap_or(guard.current);
                match table::next_state(prev, input) {
                    Some(next) => {
                        guard.queue.push_back(next);
                        (prev, next)
                    }
                    None => {
                        return Err(FlowMqError::IllegalTransition { state: prev, input });
                    }
                }
            }
        };
        self.wakeup.notify_all();
        self.notify_queued(next, prev);
        Ok(next)
    }

    /// Block until a transition is queued (or `timeout` elapses), pop it,
    /// make it the current state, and fire `on_state_change`. Returns `None`
    /// on timeout with nothing queued.
    pub fn wait_next(&self, timeout: Option<Duration>) -> Option<State> {
        let mut guard = self.inner.lock();
        if guard.queue.is_empty() {
            match timeout {
                Some(d) => {
                    let result = self.wakeup.wait_for(&mut guard, d);
                    if result.timed_out() && guard.queue.is_empty() {
                        return None;
                    }
                }
                None => {
                    self.wakeup.wait(&mut guard);
                }
            }
        }
        let next = guard.queue.pop_front()?;
        let prev = guard.current;
        guard.current = next;
        drop(guard);
        self.notify_changed(next, prev);
        Some(next)
    }

    /// Clears the queue and returns both FSMs to their initial states.
    /// Legal only after `End` (current state `Exiting`).
    pub fn reset(&self) -> FlowMqResult<()> {
        let mut guard = self.inner.lock();
        if guard.current != State::Exiting {
            return Err(FlowMqError::IllegalTransition {
                state: guard.current,
                input: Transition::End,
            });
        }
        guard.queue.clear();
        guard.current = State::Idle;
        guard.error_state = State::Ok;
        Ok(())
    }

    fn notify_queued(&self, new: State, prev: State) {
        let callbacks: Vec<StateCallback> = {
            let guard = self.inner.lock();
            guard.queued_subscribers.iter().map(|(_, f)| f.clone()).collect()
        };
        for cb in callbacks {
            cb(new, prev);
        }
    }

    fn notify_changed(&self, new: State, prev: State) {
        let callbacks: Vec<StateCallback> = {
            let guard = self.inner.lock();
            guard.changed_subscribers.iter().map(|(_, f)| f.clone()).collect()
        };
        for cb in callbacks {
            cb(new, prev);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn illegal_transition_leaves_queue_unchanged_p1() {
        let fsm = StateMachine::new();
        assert!(fsm.change_state(Transition::Run).is_err());
        assert!(!fsm.next_state_pending());
    }

    #[test]
    fn chained_changes_use_last_enqueued_p2() {
        let fsm = StateMachine::new();
        fsm.change_state(Transition::InitDevice).unwrap();
        fsm.change_state(Transition::CompleteInit).unwrap();
        fsm.change_state(Transition::Bind).unwrap();
        assert_eq!(fsm.last_queued_state(), State::Binding);
        assert_eq!(fsm.current_state(), State::Idle);

        assert_eq!(fsm.wait_next(None), Some(State::InitializingDevice));
        assert_eq!(fsm.wait_next(None), Some(State::Initialized));
        assert_eq!(fsm.wait_next(None), Some(State::Binding));
    }

    #[test]
    fn error_found_resolves_against_orthogonal_state() {
        let fsm = StateMachine::new();
        fsm.change_state(Transition::InitDevice).unwrap();
        // main queue now has InitializingDevice pending; ErrorFound must
        // still resolve against the error sub-machine (Ok -> Error), not
        // against InitializingDevice.
        let next = fsm.change_state(Transition::ErrorFound).unwrap();
        assert_eq!(next, State::Error);
        assert_eq!(fsm.current_error_state(), State::Error);
        assert!(fsm.change_state(Transition::ErrorFound).is_err());
    }

    #[test]
    fn subscribers_fire_once_per_transition() {
        let fsm = StateMachine::new();
        let queued = Arc::new(AtomicUsize::new(0));
        let changed = Arc::new(AtomicUsize::new(0));
        let q = queued.clone();
        fsm.on_state_queued("t", move |_, _| {
            q.fetch_add(1, Ordering::SeqCst);
        });
        let c = changed.clone();
        fsm.on_state_change("t", move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        fsm.change_state(Transition::InitDevice).unwrap();
        assert_eq!(queued.load(Ordering::SeqCst), 1);
        assert_eq!(changed.load(Ordering::SeqCst), 0);
        fsm.wait_next(None);
        assert_eq!(changed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reset_requires_exiting() {
        let fsm = StateMachine::new();
        assert!(fsm.reset().is_err());
        fsm.change_state(Transition::End).unwrap();
        fsm.wait_next(None);
        assert_eq!(fsm.current_state(), State::Exiting);
        assert!(fsm.reset().is_ok());
        assert_eq!(fsm.current_state(), State::Idle);
    }
}
