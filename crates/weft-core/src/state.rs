use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Shared key/value state threaded through a pipeline run.
///
/// Units communicate exclusively through this store: each unit's output is
/// written under its declared output key, and instruction templates read
/// current values by key. First-write order is tracked so run output can be
/// inspected in the order keys appeared; overwriting a key keeps its
/// original position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateStore {
    data: HashMap<String, serde_json::Value>,
    order: Vec<String>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from initial `(key, value)` pairs, preserving order.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        let mut store = Self::new();
        for (k, v) in pairs {
            store.set(k, v);
        }
        store
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Get a value as a string, if it's a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Set a value. The single mutator: later writes to the same key
    /// overwrite earlier ones.
    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        let key = key.into();
        if !self.data.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.data.insert(key, value);
    }

    /// Set a string value.
    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.set(key, serde_json::Value::String(value.into()));
    }

    /// An immutable copy of the current state. Parallel branches each work
    /// against their own snapshot and never against the live store.
    pub fn snapshot(&self) -> StateStore {
        self.clone()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Keys in first-write order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|k| k.as_str())
    }

    /// `(key, value)` pairs in first-write order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.order
            .iter()
            .filter_map(|k| self.data.get(k).map(|v| (k.as_str(), v)))
    }
}
