//! Immutable view of the reactive store.
//!
//! A [`StoreSnapshot`] is what the external store hands to selectors on every
//! read. Results of operations live in `slots`, keyed by the derived cache key
//! (see [`crate::cache_key::derive_key`]); list totals live next to them in
//! `totals` under the same key.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Point-in-time content of the reactive store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    slots: BTreeMap<String, Value>,
    totals: BTreeMap<String, u64>,
}

impl StoreSnapshot {
    /// Create an empty snapshot
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
            totals: BTreeMap::new(),
        }
    }

    /// Builder-style slot insertion
    #[must_use]
    pub fn with_slot(mut self, key: impl Into<String>, value: Value) -> Self {
        self.slots.insert(key.into(), value);
        self
    }

    /// Builder-style total insertion
    #[must_use]
    pub fn with_total(mut self, key: impl Into<String>, total: u64) -> Self {
        self.totals.insert(key.into(), total);
        self
    }

    /// Value stored under `key`, if any
    #[must_use]
    pub fn slot(&self, key: &str) -> Option<&Value> {
        self.slots.get(key)
    }

    /// Total stored under `key`, if any
    #[must_use]
    pub fn total(&self, key: &str) -> Option<u64> {
        self.totals.get(key).copied()
    }

    /// Store `value` under `key`, returning the previous value
    pub fn set_slot(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.slots.insert(key.into(), value)
    }

    /// Store `total` under `key`, returning the previous total
    pub fn set_total(&mut self, key: impl Into<String>, total: u64) -> Option<u64> {
        self.totals.insert(key.into(), total)
    }

    /// Remove both the slot and the total stored under `key`
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.totals.remove(key);
        self.slots.remove(key)
    }

    /// Keep only the slots (and totals) whose key satisfies `keep`
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.slots.retain(|key, _| keep(key.as_str()));
        self.totals.retain(|key, _| keep(key.as_str()));
    }

    /// Number of populated slots
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot is populated
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterate over slot keys
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }
}
