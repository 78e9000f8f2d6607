//! Property Store (component A).
//!
//! Thread-safe keyed store of heterogeneous values with typed and
//! stringified change notifications. All mutation goes through a single
//! mutex (`I2`: subscriber callbacks run after the lock is released so
//! reentrant subscribe/unsubscribe/get calls from within a callback do not
//! deadlock).

mod pattern;
mod value;

pub use pattern::glob_match;
pub use value::PropertyValue;

use crate::error::{FlowMqError, FlowMqResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// A typed change notification: `(key, new value)`.
pub type TypedCallback = Arc<dyn Fn(&str, &PropertyValue) + Send + Sync>;
/// A stringified change notification: `(key, rendered value)`.
pub type StringCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Renders a `PropertyValue` to its canonical string form. Built-in types are
/// registered at construction (`I3`); user (`PropertyValue::Bytes`-wrapped
/// opaque) types must call `PropertyStore::register_formatter` before the
/// first `get_as_string` of that key or the value renders as `<unformatted>`.
pub type Formatter = Arc<dyn Fn(&PropertyValue) -> String + Send + Sync>;

struct Inner {
    values: BTreeMap<String, PropertyValue>,
    revision: u64,
    typed_subscribers: Vec<(String, TypedCallback)>,
    string_subscribers: Vec<(String, StringCallback)>,
    formatters: BTreeMap<&'static str, Formatter>,
}

/// Thread-safe keyed store of heterogeneous [`PropertyValue`]s.
///
/// Cloning is cheap (the store is `Arc`-backed internally); every clone
/// refers to the same underlying map, mirroring how the device runtime and
/// its controllers share one property store.
#[derive(Clone)]
pub struct PropertyStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for PropertyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyStore {
    pub fn new() -> Self {
        let mut formatters: BTreeMap<&'static str, Formatter> = BTreeMap::new();
        formatters.insert("bool", Arc::new(|v| match v {
            PropertyValue::Bool(b) => b.to_string(),
            other => format!("{:?}", other),
        }));
        formatters.insert("bytes", Arc::new(|v| match v {
            PropertyValue::Bytes(b) => b.iter().map(|byte| format!("{:02x}", byte)).collect(),
            other => format!("{:?}", other),
        }));
        formatters.insert("path", Arc::new(|v| match v {
            PropertyValue::Path(p) => format!("\"{}\"", p.display()),
            other => format!("{:?}", other),
        }));
        Self {
            inner: Arc::new(Mutex::new(Inner {
                values: BTreeMap::new(),
                revision: 0,
                typed_subscribers: Vec::new(),
                string_subscribers: Vec::new(),
                formatters,
            })),
        }
    }

    /// Register a renderer used by `get_as_string` for a given type tag
    /// (`I3`). Built-in numeric/bool/bytes/path/list tags are pre-registered;
    /// call this before first use of a custom tag.
    pub fn register_formatter<F>(&self, type_tag: &'static str, f: F)
    where
        F: Fn(&PropertyValue) -> String + Send + Sync + 'static,
    {
        self.inner.lock().formatters.insert(type_tag, Arc::new(f));
    }

    /// Monotonically increasing counter bumped on every successful mutation;
    /// lets a controller detect "did anything change" without diffing.
    pub fn revision(&self) -> u64 {
        self.inner.lock().revision
    }

    /// Insert-or-overwrite. Emits one typed and one stringified event (`I1`).
    pub fn set(&self, key: impl Into<String>, value: PropertyValue) {
        let key = key.into();
        self.mutate_and_notify(&key, value);
    }

    /// Fails if `key` is absent; otherwise behaves like `set`.
    pub fn update(&self, key: &str, value: PropertyValue) -> bool {
        {
            let guard = self.inner.lock();
            if !guard.values.contains_key(key) {
                return false;
            }
        }
        self.mutate_and_notify(key, value);
        true
    }

    /// Bulk insert-or-overwrite; each key emits its own pair of events.
    pub fn set_bulk(&self, entries: impl IntoIterator<Item = (String, PropertyValue)>) {
        for (k, v) in entries {
            self.set(k, v);
        }
    }

    /// Transactional bulk update (`P4`): if any key is absent, no mutation
    /// occurs at all.
    pub fn update_bulk(&self, entries: impl IntoIterator<Item = (String, PropertyValue)>) -> bool {
        let entries: Vec<(String, PropertyValue)> = entries.into_iter().collect();
        {
            let guard = self.inner.lock();
            if entries.iter().any(|(k, _)| !guard.values.contains_key(k)) {
                return false;
            }
        }
        for (k, v) in entries {
            self.mutate_and_notify(&k, v);
        }
        true
    }

    /// Returns `PropertyNotFound` if `key` is absent.
    pub fn get(&self, key: &str) -> FlowMqResult<PropertyValue> {
        self.inner
            .lock()
            .values
            .get(key)
            .cloned()
            .ok_or_else(|| FlowMqError::PropertyNotFound { key: key.to_string() })
    }

    pub fn get_or(&self, key: &str, default: PropertyValue) -> PropertyValue {
        self.inner
            .lock()
            .values
            .get(key)
            .cloned()
            .unwrap_or(default)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().values.remove(key).is_some()
    }

    /// Renders via the registered formatter for the value's type tag, or
    /// `PropertyNotFound` if absent.
    pub fn get_as_string(&self, key: &str) -> FlowMqResult<String> {
        let guard = self.inner.lock();
        let value = guard
            .values
            .get(key)
            .ok_or_else(|| FlowMqError::PropertyNotFound { key: key.to_string() })?;
        Ok(render(&guard.formatters, value))
    }

    pub fn get_as_string_or(&self, key: &str, default: &str) -> String {
        self.get_as_string(key).unwrap_or_else(|_| default.to_string())
    }

    /// Fast path: all entries whose key starts with `prefix`.
    pub fn query_prefix(&self, prefix: &str) -> Vec<(String, PropertyValue)> {
        self.inner
            .lock()
            .values
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// All entries whose key matches `pattern` (a small glob-style subset:
    /// `.` any char, `*` any run, `^`/`$` anchors — see [`pattern::glob_match`]).
    pub fn query_regex(&self, pattern: &str) -> Vec<(String, PropertyValue)> {
        self.inner
            .lock()
            .values
            .iter()
            .filter(|(k, _)| glob_match(pattern, k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn subscribe(
        &self,
        subscriber: impl Into<String>,
        callback: impl Fn(&str, &PropertyValue) + Send + Sync + 'static,
    ) {
        self.inner
            .lock()
            .typed_subscribers
            .push((subscriber.into(), Arc::new(callback)));
    }

    pub fn unsubscribe(&self, subscriber: &str) {
        self.inner
            .lock()
            .typed_subscribers
            .retain(|(name, _)| name != subscriber);
    }

    pub fn subscribe_as_string(
        &self,
        subscriber: impl Into<String>,
        callback: impl Fn(&str, &str) + Send + Sync + 'static,
    ) {
        self.inner
            .lock()
            .string_subscribers
            .push((subscriber.into(), Arc::new(callback)));
    }

    pub fn unsubscribe_as_string(&self, subscriber: &str) {
        self.inner
            .lock()
            .string_subscribers
            .retain(|(name, _)| name != subscriber);
    }

    fn mutate_and_notify(&self, key: &str, value: PropertyValue) {
        // Insert and render under the lock, then notify after releasing it
        // (`I2`): subscriber callbacks may reenter the store.
        let rendered = {
            let mut guard = self.inner.lock();
            guard.values.insert(key.to_string(), value.clone());
            guard.revision += 1;
            render(&guard.formatters, &value)
        };
        self.notify_typed(key, &value);
        self.notify_string(key, &rendered);
    }

    fn notify_typed(&self, key: &str, value: &PropertyValue) {
        // Clone the `Arc`s out under the lock, then drop it before calling
        // back: subscribers are free to reenter the store (`I2`).
        let callbacks: Vec<TypedCallback> = {
            let guard = self.inner.lock();
            guard.typed_subscribers.iter().map(|(_, f)| f.clone()).collect()
        };
        for cb in callbacks {
            cb(key, value);
        }
    }

    fn notify_string(&self, key: &str, rendered: &str) {
        let callbacks: Vec<StringCallback> = {
            let guard = self.inner.lock();
            guard.string_subscribers.iter().map(|(_, f)| f.clone()).collect()
        };
        for cb in callbacks {
            cb(key, rendered);
        }
    }
}

fn render(formatters: &BTreeMap<&'static str, Formatter>, value: &PropertyValue) -> String {
    let tag = value.type_tag();
    if let Some(f) = formatters.get(tag) {
        f(value)
    } else {
        match value {
            PropertyValue::I8(v) => v.to_string(),
            PropertyValue::I16(v) => v.to_string(),
            PropertyValue::I32(v) => v.to_string(),
            PropertyValue::I64(v) => v.to_string(),
            PropertyValue::U8(v) => v.to_string(),
            PropertyValue::U16(v) => v.to_string(),
            PropertyValue::U32(v) => v.to_string(),
            PropertyValue::U64(v) => v.to_string(),
            PropertyValue::F64(v) => v.to_string(),
            PropertyValue::Bool(v) => v.to_string(),
            PropertyValue::Bytes(v) => v.iter().map(|b| format!("{:02x}", b)).collect(),
            PropertyValue::Path(p) => format!("\"{}\"", p.display()),
            PropertyValue::List(items) => items
                .iter()
                .map(|v| render(formatters, v))
                .collect::<Vec<_>>()
                .join(","),
            PropertyValue::Unformatted(_) => "<unformatted>".to_string(),
        }
    }
}

impl PropertyStore {
    /// Convenience constructor mirroring a path-typed property.
    pub fn set_path(&self, key: impl Into<String>, path: impl Into<PathBuf>) {
        self.set(key, PropertyValue::Path(path.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn round_trip_every_type_p3() {
        let store = PropertyStore::new();
        store.set("a.i64", PropertyValue::I64(-7));
        assert_eq!(store.get("a.i64").unwrap(), PropertyValue::I64(-7));
        assert_eq!(store.get_as_string("a.i64").unwrap(), "-7");

        store.set("a.bool", PropertyValue::Bool(true));
        assert_eq!(store.get_as_string("a.bool").unwrap(), "true");

        store.set(
            "a.list",
            PropertyValue::List(vec![PropertyValue::I32(1), PropertyValue::I32(2)]),
        );
        assert_eq!(store.get_as_string("a.list").unwrap(), "1,2");

        store.set_path("a.path", "/tmp/x");
        assert_eq!(store.get_as_string("a.path").unwrap(), "\"/tmp/x\"");
    }

    #[test]
    fn update_requires_existing_key() {
        let store = PropertyStore::new();
        assert!(!store.update("missing", PropertyValue::I32(1)));
        store.set("present", PropertyValue::I32(0));
        assert!(store.update("present", PropertyValue::I32(1)));
    }

    #[test]
    fn update_bulk_is_transactional_p4() {
        let store = PropertyStore::new();
        store.set("k1", PropertyValue::I32(1));
        let ok = store.update_bulk(vec![
            ("k1".to_string(), PropertyValue::I32(2)),
            ("k2".to_string(), PropertyValue::I32(2)),
        ]);
        assert!(!ok);
        assert_eq!(store.get("k1").unwrap(), PropertyValue::I32(1));
    }

    #[test]
    fn prefix_query_is_fast_path() {
        let store = PropertyStore::new();
        store.set("chan.a.address", PropertyValue::Bytes(vec![1]));
        store.set("chan.a.method", PropertyValue::Bytes(vec![2]));
        store.set("other", PropertyValue::Bytes(vec![3]));
        let found = store.query_prefix("chan.a.");
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn callbacks_fire_outside_the_lock_i2() {
        let store = PropertyStore::new();
        let reentry_count = Arc::new(AtomicUsize::new(0));
        let store_for_cb = store.clone();
        let counter = reentry_count.clone();
        store.subscribe("observer", move |_k, _v| {
            // Reentrant call into the store from within a callback must not
            // deadlock: this is only possible if callbacks run unlocked.
            let _ = store_for_cb.get_or("anything", PropertyValue::I32(0));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        store.set("k", PropertyValue::I32(1));
        assert_eq!(reentry_count.load(Ordering::SeqCst), 1);
    }
}
