//! Event Bus (component B).
//!
//! A family of typed signal slots keyed by `(event-tag, payload-signature)`.
//! `subscribe` under a given `name` *replaces* any previous registration for
//! that name under that key; `emit` invokes all current callbacks
//! synchronously on the emitting thread, holding no lock beyond retrieval of
//! the slot.

use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

type Slot = HashMap<String, Arc<dyn Any + Send + Sync>>;

/// Generic typed publish/subscribe bus.
///
/// `Event` is a zero-sized tag type distinguishing otherwise-identical
/// payload shapes (mirrors the teacher's `StateMachine::StateChange` /
/// `StateQueued` tag-struct pattern), `Args` is the payload tuple type.
#[derive(Default)]
pub struct EventBus {
    slots: Mutex<HashMap<TypeId, Slot>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Register (or replace) the callback for `name` under the
    /// `(Event, Args)` key.
    pub fn subscribe<Event, Args, F>(&self, name: impl Into<String>, callback: F)
    where
        Event: 'static,
        Args: 'static,
        F: Fn(&Args) + Send + Sync + 'static,
    {
        let key = TypeId::of::<(Event, Args)>();
        let boxed: Arc<dyn Any + Send + Sync> = Arc::new(Box::new(callback) as Box<dyn Fn(&Args) + Send + Sync>);
        self.slots
            .lock()
            .entry(key)
            .or_default()
            .insert(name.into(), boxed);
    }

    pub fn unsubscribe<Event, Args>(&self, name: &str)
    where
        Event: 'static,
        Args: 'static,
    {
        let key = TypeId::of::<(Event, Args)>();
        if let Some(slot) = self.slots.lock().get_mut(&key) {
            slot.remove(name);
        }
    }

    /// Invoke every current subscriber for `(Event, Args)`, synchronously,
    /// on the calling thread.
    pub fn emit<Event, Args>(&self, args: &Args)
    where
        Event: 'static,
        Args: 'static,
    {
        let key = TypeId::of::<(Event, Args)>();
        let callbacks: Vec<Arc<dyn Any + Send + Sync>> = {
            let guard = self.slots.lock();
            match guard.get(&key) {
                Some(slot) => slot.values().cloned().collect(),
                None => return,
            }
        };
        for cb in callbacks {
            if let Some(f) = cb.downcast_ref::<Box<dyn Fn(&Args) + Send + Sync>>() {
                f(args);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    struct Tick;

    #[test]
    fn subscribe_replaces_previous_registration() {
        let bus = EventBus::new();
        let total = Arc::new(AtomicI32::new(0));

        let t1 = total.clone();
        bus.subscribe::<Tick, i32, _>("sub", move |n| {
            t1.fetch_add(*n, Ordering::SeqCst);
        });
        let t2 = total.clone();
        bus.subscribe::<Tick, i32, _>("sub", move |n| {
            t2.fetch_add(*n * 10, Ordering::SeqCst);
        });

        bus.emit::<Tick, i32>(&1);
        // Only the second registration should have fired.
        assert_eq!(total.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn unsubscribe_removes_slot() {
        let bus = EventBus::new();
        let fired = Arc::new(AtomicI32::new(0));
        let f = fired.clone();
        bus.subscribe::<Tick, i32, _>("sub", move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        bus.unsubscribe::<Tick, i32>("sub");
        bus.emit::<Tick, i32>(&1);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn distinct_keys_are_independent() {
        struct OtherTag;
        let bus = EventBus::new();
        let hits = Arc::new(AtomicI32::new(0));
        let h = hits.clone();
        bus.subscribe::<Tick, i32, _>("a", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit::<OtherTag, i32>(&1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
