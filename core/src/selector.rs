//! Store read selectors.
//!
//! A [`Selector`] maps a [`StoreSnapshot`] to an optional JSON value. Selector
//! errors are contract violations by the caller: they propagate out of the
//! evaluation that ran the selector and are never folded into lifecycle state.
//!
//! This module also owns the rule that tells "never fetched" apart from
//! "fetched but empty" ([`classify`]).

use crate::snapshot::StoreSnapshot;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Marker key carried by keyed results that have been fetched
///
/// An object slot with no entries besides this marker is a fetched-but-empty
/// result; an object slot with no entries and no marker was never fetched.
pub const FETCHED_MARKER: &str = "fetchedAt";

/// Errors raised while running a selector
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    /// The selector itself failed
    #[error("Selector failed: {0}")]
    Failed(String),

    /// A total selector produced a value that is not a count
    #[error("Total selector produced a non-count value: {0}")]
    NotACount(String),
}

type SelectFn = dyn Fn(&StoreSnapshot) -> Result<Option<Value>, SelectorError> + Send + Sync;

/// Shareable read function over the store
#[derive(Clone)]
pub struct Selector(Arc<SelectFn>);

impl Selector {
    /// Wrap a selector function
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&StoreSnapshot) -> Result<Option<Value>, SelectorError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Read the slot stored under `key`
    #[must_use]
    pub fn slot_at(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(move |snapshot| Ok(snapshot.slot(&key).cloned()))
    }

    /// Read the total stored under `key`
    #[must_use]
    pub fn total_at(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(move |snapshot| Ok(snapshot.total(&key).map(Value::from)))
    }

    /// Read a JSON pointer (RFC 6901) inside the slot stored under `key`
    #[must_use]
    pub fn pointer(key: impl Into<String>, pointer: impl Into<String>) -> Self {
        let key = key.into();
        let pointer = pointer.into();
        Self::new(move |snapshot| {
            Ok(snapshot
                .slot(&key)
                .and_then(|value| value.pointer(&pointer))
                .cloned())
        })
    }

    /// Always yield `value`
    #[must_use]
    pub fn constant(value: Value) -> Self {
        Self::new(move |_| Ok(Some(value.clone())))
    }

    /// Run the selector
    ///
    /// # Errors
    ///
    /// Whatever the selector function returns.
    pub fn select(&self, snapshot: &StoreSnapshot) -> Result<Option<Value>, SelectorError> {
        (self.0)(snapshot)
    }

    /// Run the selector as a total
    ///
    /// A missing value or `null` counts as `0`.
    ///
    /// # Errors
    ///
    /// The selector's own error, or [`SelectorError::NotACount`] when the value
    /// is not a non-negative integer.
    pub fn select_count(&self, snapshot: &StoreSnapshot) -> Result<u64, SelectorError> {
        match self.select(snapshot)? {
            None | Some(Value::Null) => Ok(0),
            Some(value) => value
                .as_u64()
                .ok_or_else(|| SelectorError::NotACount(value.to_string())),
        }
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Selector(<fn>)")
    }
}

/// What a store slot tells about a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Nothing stored
    Missing,
    /// Keyed placeholder without the fetched marker
    Unfetched,
    /// Fetched, genuinely empty result
    Empty,
    /// Fetched, non-empty result
    Populated,
}

impl SlotState {
    /// Whether the value counts as loaded
    #[must_use]
    pub const fn is_loaded(self) -> bool {
        matches!(self, Self::Empty | Self::Populated)
    }
}

/// Classify a slot value
///
/// - absent or `null`: [`SlotState::Missing`]
/// - array: [`SlotState::Empty`] when it has zero length, otherwise populated
/// - object with no entries besides [`FETCHED_MARKER`]: [`SlotState::Empty`]
///   when the marker is present, [`SlotState::Unfetched`] when it is not
/// - anything else: [`SlotState::Populated`]
#[must_use]
pub fn classify(value: Option<&Value>) -> SlotState {
    match value {
        None | Some(Value::Null) => SlotState::Missing,
        Some(Value::Array(items)) if items.is_empty() => SlotState::Empty,
        Some(Value::Object(map)) => {
            let fetched = map.contains_key(FETCHED_MARKER);
            let entries = map.len() - usize::from(fetched);
            match (entries, fetched) {
                (0, true) => SlotState::Empty,
                (0, false) => SlotState::Unfetched,
                _ => SlotState::Populated,
            }
        },
        Some(_) => SlotState::Populated,
    }
}

/// Whether a slot value counts as loaded
#[must_use]
pub fn is_loaded(value: Option<&Value>) -> bool {
    classify(value).is_loaded()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_values_are_not_loaded() {
        assert_eq!(classify(None), SlotState::Missing);
        assert_eq!(classify(Some(&Value::Null)), SlotState::Missing);
        assert!(!is_loaded(None));
    }

    #[test]
    fn empty_sequence_is_fetched_and_empty() {
        assert_eq!(classify(Some(&json!([]))), SlotState::Empty);
        assert!(is_loaded(Some(&json!([]))));
        assert_eq!(classify(Some(&json!([1]))), SlotState::Populated);
    }

    #[test]
    fn keyed_result_needs_marker_to_count_as_fetched() {
        assert_eq!(classify(Some(&json!({}))), SlotState::Unfetched);
        assert!(!is_loaded(Some(&json!({}))));

        let fetched = json!({ "fetchedAt": "2025-01-01T00:00:00Z" });
        assert_eq!(classify(Some(&fetched)), SlotState::Empty);
        assert!(is_loaded(Some(&fetched)));

        let populated = json!({ "7": { "id": 7 } });
        assert_eq!(classify(Some(&populated)), SlotState::Populated);
    }

    #[test]
    fn scalars_are_populated() {
        assert_eq!(classify(Some(&json!(0))), SlotState::Populated);
        assert_eq!(classify(Some(&json!(""))), SlotState::Populated);
    }

    #[test]
    fn slot_and_pointer_selectors() -> Result<(), SelectorError> {
        let snapshot = StoreSnapshot::new()
            .with_slot("k", json!({ "user": { "name": "Ann" } }))
            .with_total("k", 3);

        assert_eq!(
            Selector::slot_at("k").select(&snapshot)?,
            Some(json!({ "user": { "name": "Ann" } }))
        );
        assert_eq!(
            Selector::pointer("k", "/user/name").select(&snapshot)?,
            Some(json!("Ann"))
        );
        assert_eq!(Selector::pointer("k", "/nope").select(&snapshot)?, None);
        assert_eq!(Selector::total_at("k").select_count(&snapshot)?, 3);
        assert_eq!(Selector::total_at("other").select_count(&snapshot)?, 0);
        Ok(())
    }

    #[test]
    fn non_count_total_is_an_error() {
        let snapshot = StoreSnapshot::new();
        let result = Selector::constant(json!("many")).select_count(&snapshot);
        assert_eq!(result, Err(SelectorError::NotACount("\"many\"".to_string())));
    }

    #[test]
    fn failing_selector_propagates() {
        let selector = Selector::new(|_| Err(SelectorError::Failed("boom".to_string())));
        let error = selector.select(&StoreSnapshot::new());
        assert_eq!(error, Err(SelectorError::Failed("boom".to_string())));
    }
}
