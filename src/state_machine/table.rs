//! The transition table of spec.md §4.5, reproduced verbatim.

use super::{State, Transition};

/// Looks up the next main-FSM state for `(state, input)`. Returns `None` for
/// every pair not listed in the table (`P1`); `ErrorFound` is never looked up
/// here — it is always resolved against the orthogonal error state by the
/// caller.
pub fn next_state(state: State, input: Transition) -> Option<State> {
    use State::*;
    use Transition::*;
    match (state, input) {
        (Idle, InitDevice) => Some(InitializingDevice),
        (Idle, End) => Some(Exiting),
        (InitializingDevice, CompleteInit) => Some(Initialized),
        (Initialized, Bind) => Some(Binding),
        (Binding, Auto) => Some(Bound),
        (Bound, Connect) => Some(Connecting),
        (Connecting, Auto) => Some(DeviceReady),
        (DeviceReady, InitTask) => Some(InitializingTask),
        (DeviceReady, ResetDevice) => Some(ResettingDevice),
        (InitializingTask, Auto) => Some(Ready),
        (Ready, Run) => Some(Running),
        (Ready, ResetTask) => Some(ResettingTask),
        (Running, Stop) => Some(Ready),
        (ResettingTask, Auto) => Some(DeviceReady),
        (ResettingDevice, Auto) => Some(Idle),
        _ => None,
    }
}

/// Looks up the next orthogonal error-FSM state. Only `ErrorFound` is
/// defined, and only from `Ok`; `Error` is terminal.
pub fn next_error_state(error_state: State, input: Transition) -> Option<State> {
    match (error_state, input) {
        (State::Ok, Transition::ErrorFound) => Some(State::Error),
        _ => None,
    }
}
