//! Key-value parameter and telemetry store.
//!
//! On the robot this is a network table shared with the driver station. The
//! pipeline only needs typed get/put, so the transport lives behind
//! [`ParameterStore`]; [`MemoryStore`] is the in-process implementation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

/// A value held by the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    NumberArray(Vec<f64>),
    Text(String),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_number_array(&self) -> Option<&[f64]> {
        match self {
            Value::NumberArray(v) => Some(v),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::NumberArray(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// Shared key-value channel used for live tuning and result publishing.
///
/// Methods take `&self`: implementations are expected to be shared with
/// other writers (a dashboard, a remote peer) and synchronize internally.
pub trait ParameterStore {
    fn get(&self, key: &str) -> Option<Value>;

    fn put(&self, key: &str, value: Value);

    /// Number under `key`, or `default` when absent or not a number.
    fn get_number(&self, key: &str, default: f64) -> f64 {
        self.get(key)
            .and_then(|v| v.as_number())
            .unwrap_or(default)
    }

    fn put_number(&self, key: &str, value: f64) {
        self.put(key, Value::Number(value));
    }

    fn put_number_array(&self, key: &str, values: Vec<f64>) {
        self.put(key, Value::NumberArray(values));
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    fn put_bool(&self, key: &str, value: bool) {
        self.put(key, Value::Bool(value));
    }

    /// Write `value` only when `key` holds nothing yet.
    fn set_default_number(&self, key: &str, value: f64) {
        if self.get(key).is_none() {
            self.put_number(key, value);
        }
    }
}

impl<S: ParameterStore + ?Sized> ParameterStore for &S {
    fn get(&self, key: &str) -> Option<Value> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: Value) {
        (**self).put(key, value)
    }
}

impl<S: ParameterStore + ?Sized> ParameterStore for Arc<S> {
    fn get(&self, key: &str) -> Option<Value> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: Value) {
        (**self).put(key, value)
    }
}

/// Handle returned by [`MemoryStore::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&str, &Value) + Send + Sync>;

#[derive(Default)]
struct Shared {
    values: Mutex<BTreeMap<String, Value>>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

/// In-memory [`ParameterStore`] with change notification.
///
/// Clones share the same table.
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // Poisoned locks still guard a consistent map.
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `listener(key, new_value)` after every change.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let id = ListenerId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.shared.listeners).push((id, Arc::new(listener)));
        id
    }

    /// Returns `false` when `id` was not subscribed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.shared.listeners);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        lock(&self.shared.values).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.shared.values).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pretty JSON of the current contents.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.snapshot())
    }
}

impl ParameterStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        lock(&self.shared.values).get(key).cloned()
    }

    fn put(&self, key: &str, value: Value) {
        let changed = {
            let mut values = lock(&self.shared.values);
            match values.get(key) {
                Some(old) if *old == value => false,
                _ => {
                    values.insert(key.to_string(), value.clone());
                    true
                }
            }
        };
        if !changed {
            return;
        }
        // Listeners run with no lock held.
        let listeners: Vec<Listener> = lock(&self.shared.listeners)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(key, &value);
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("values", &self.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn typed_helpers_fall_back_to_defaults() {
        let store = MemoryStore::new();
        assert_eq!(store.get_number("min_hue", 55.0), 55.0);
        store.put("min_hue", Value::from("sixty"));
        assert_eq!(store.get_number("min_hue", 55.0), 55.0);
        store.put_number("min_hue", 60.0);
        assert_eq!(store.get_number("min_hue", 55.0), 60.0);
        assert!(store.get_bool("enabled", true));
    }

    #[test]
    fn set_default_keeps_existing_value() {
        let store = MemoryStore::new();
        store.put_number("led_red", 10.0);
        store.set_default_number("led_red", 0.0);
        store.set_default_number("led_grn", 255.0);
        assert_eq!(store.get_number("led_red", -1.0), 10.0);
        assert_eq!(store.get_number("led_grn", -1.0), 255.0);
    }

    #[test]
    fn listeners_fire_only_on_change() {
        let store = MemoryStore::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = store.subscribe(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.put_number("fps", 30.0);
        store.put_number("fps", 30.0);
        store.put_number("fps", 29.0);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.put_number("fps", 28.0);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn listener_may_write_back_into_store() {
        let store = MemoryStore::new();
        let mirror = store.clone();
        store.subscribe(move |key, value| {
            if key == "x_list" {
                mirror.put_number("count", value.as_number_array().map_or(0, |v| v.len()) as f64);
            }
        });
        store.put_number_array("x_list", vec![1.0, 2.0]);
        assert_eq!(store.get_number("count", 0.0), 2.0);
    }

    #[test]
    fn clones_share_state_across_threads() {
        let store = MemoryStore::new();
        let remote = store.clone();
        std::thread::spawn(move || remote.put_number("max_area", 900.0))
            .join()
            .expect("writer thread");
        assert_eq!(store.get_number("max_area", 0.0), 900.0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn snapshot_serializes_untagged() {
        let store = MemoryStore::new();
        store.put_number_array("x_list", vec![]);
        store.put_bool("ok", true);
        let json: serde_json::Value =
            serde_json::from_str(&store.to_json().expect("json")).expect("parse");
        assert_eq!(json["x_list"], serde_json::json!([]));
        assert_eq!(json["ok"], serde_json::json!(true));
    }
}
