//! Reactive resource store.
//!
//! Holds an immutable [`StoreSnapshot`] behind a `tokio::sync::watch` channel.
//! Writers replace the snapshot wholesale; subscribers are woken only when the
//! new snapshot differs structurally from the old one.
//!
//! The bridge itself never writes here. Writes come from the provider's own
//! side-effect path (for instance [`ReadThroughProvider`](crate::ReadThroughProvider))
//! or from other parts of the application.

use request_bridge_core::snapshot::StoreSnapshot;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;

/// Shared, observable key-value store of fetched values
///
/// Cloning yields another handle to the same store.
#[derive(Debug, Clone)]
pub struct ResourceStore {
    tx: Arc<watch::Sender<Arc<StoreSnapshot>>>,
}

impl ResourceStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::with_snapshot(StoreSnapshot::new())
    }

    /// Create a store holding `snapshot`
    #[must_use]
    pub fn with_snapshot(snapshot: StoreSnapshot) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(snapshot));
        Self { tx: Arc::new(tx) }
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        Arc::clone(&self.tx.borrow())
    }

    /// Receiver woken on every effective change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<StoreSnapshot>> {
        self.tx.subscribe()
    }

    /// Apply `f` to a copy of the current snapshot and publish the result
    ///
    /// Returns whether anything changed; subscribers are not woken otherwise.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut StoreSnapshot),
    {
        let changed = self.tx.send_if_modified(|current| {
            let mut next = StoreSnapshot::clone(current);
            f(&mut next);
            if next == **current {
                false
            } else {
                *current = Arc::new(next);
                true
            }
        });
        if changed {
            tracing::trace!("resource store changed");
        }
        changed
    }

    /// Store `value` under `key`
    pub fn put(&self, key: impl Into<String>, value: Value) -> bool {
        let key = key.into();
        self.update(move |snapshot| {
            snapshot.set_slot(key, value);
        })
    }

    /// Store `total` under `key`
    pub fn put_total(&self, key: impl Into<String>, total: u64) -> bool {
        let key = key.into();
        self.update(move |snapshot| {
            snapshot.set_total(key, total);
        })
    }

    /// Remove the slot and total stored under `key`
    pub fn remove(&self, key: &str) -> bool {
        self.update(|snapshot| {
            snapshot.remove(key);
        })
    }

    /// Drop every slot whose key fails `keep`
    pub fn retain<F>(&self, keep: F) -> bool
    where
        F: FnMut(&str) -> bool,
    {
        self.update(|snapshot| snapshot.retain(keep))
    }

    /// Drop every slot
    pub fn clear(&self) -> bool {
        self.update(|snapshot| *snapshot = StoreSnapshot::new())
    }
}

impl Default for ResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn put_and_read() {
        let store = ResourceStore::new();
        assert!(store.put("k", json!([1])));
        assert_eq!(store.snapshot().slot("k"), Some(&json!([1])));
    }

    #[test]
    fn identical_write_is_not_a_change() {
        let store = ResourceStore::new();
        let mut rx = store.subscribe();

        assert!(store.put("k", json!({ "a": 1 })));
        assert!(rx.has_changed().unwrap_or(false));
        let _ = rx.borrow_and_update();

        assert!(!store.put("k", json!({ "a": 1 })));
        assert!(!rx.has_changed().unwrap_or(true));
    }

    #[test]
    fn clones_share_state() {
        let store = ResourceStore::new();
        let other = store.clone();
        other.put_total("k", 5);
        assert_eq!(store.snapshot().total("k"), Some(5));
    }

    #[test]
    fn remove_and_clear() {
        let store = ResourceStore::with_snapshot(
            StoreSnapshot::new().with_slot("a", json!(1)).with_slot("b", json!(2)),
        );
        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        assert!(store.clear());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn retain_keeps_matching_keys_only() {
        let store = ResourceStore::with_snapshot(
            StoreSnapshot::new().with_slot("a", json!(1)).with_slot("b", json!(2)),
        );
        assert!(store.retain(|key| key == "b"));
        assert!(!store.retain(|key| key == "b"));
        assert_eq!(store.snapshot().len(), 1);
        assert_eq!(store.snapshot().slot("b"), Some(&json!(2)));
    }

    proptest! {
        #[test]
        fn rewriting_same_value_is_not_a_change(key in "[a-z]{1,8}", n in any::<i64>()) {
            let store = ResourceStore::new();
            let first = store.put(key.clone(), json!({ "n": n }));
            let second = store.put(key, json!({ "n": n }));
            prop_assert!(first);
            prop_assert!(!second);
        }
    }

    #[tokio::test]
    async fn subscribers_wake_on_change() {
        let store = ResourceStore::new();
        let mut rx = store.subscribe();

        let writer = store.clone();
        tokio::spawn(async move {
            writer.put("k", json!("v"));
        });

        assert!(rx.changed().await.is_ok());
        assert_eq!(rx.borrow().slot("k"), Some(&json!("v")));
    }
}
