//! Lifecycle state and the store/local merge.
//!
//! [`LifecycleState`] is the tuple callers observe. It is replaced, never
//! mutated in place: every transition is a method returning a new value.
//!
//! Two inputs drive it:
//!
//! - the request lifecycle (armed, settled ok, settled with an error), which
//!   only ever touches `loading`, `loaded` and `error`
//! - the store, read once per evaluation pass into an [`ExternalSnapshot`] and
//!   folded in by [`merge`], which only ever touches `data`, `total` and
//!   `loaded`
//!
//! A settlement confirms that the call finished. It never supplies `data` or
//! `total`: the call may have answered optimistically while the authoritative
//! value reaches the store through another path.

use crate::descriptor::RequestDescriptor;
use crate::provider::OperationError;
use crate::selector::{self, SelectorError};
use crate::snapshot::StoreSnapshot;
use serde_json::Value;

/// Observable state of a request
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleState {
    /// Last value read from the store
    pub data: Option<Value>,
    /// Last total read from the store
    pub total: u64,
    /// Failure of the latest call, if any
    pub error: Option<OperationError>,
    /// A call is in flight (or none has been issued yet)
    pub loading: bool,
    /// A value is known for the request
    pub loaded: bool,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::initial()
    }
}

impl LifecycleState {
    /// `{loading: true, loaded: false}` with no data
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            data: None,
            total: 0,
            error: None,
            loading: true,
            loaded: false,
        }
    }

    /// A new request was armed
    ///
    /// `data` and `total` keep their last known values until the store reports
    /// a change.
    #[must_use]
    pub fn armed(&self) -> Self {
        Self {
            data: self.data.clone(),
            total: self.total,
            error: None,
            loading: true,
            loaded: false,
        }
    }

    /// The armed call resolved
    #[must_use]
    pub fn succeeded(&self) -> Self {
        Self {
            data: self.data.clone(),
            total: self.total,
            error: None,
            loading: false,
            loaded: true,
        }
    }

    /// The armed call rejected
    #[must_use]
    pub fn failed(&self, error: OperationError) -> Self {
        Self {
            data: self.data.clone(),
            total: self.total,
            error: Some(error),
            loading: false,
            loaded: false,
        }
    }

    /// Coarse phase, for logging and assertions
    #[must_use]
    pub const fn phase(&self) -> Phase {
        if self.error.is_some() {
            Phase::Errored
        } else if self.loading {
            Phase::Loading
        } else {
            Phase::Loaded
        }
    }
}

/// Coarse lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing has been armed yet
    Idle,
    /// A call is outstanding
    Loading,
    /// The latest call resolved
    Loaded,
    /// The latest call rejected
    Errored,
}

/// Value of a request as currently held by the store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalSnapshot {
    /// Result of the read selector
    pub data: Option<Value>,
    /// Result of the total selector
    pub total: u64,
}

impl ExternalSnapshot {
    /// Snapshot from raw parts
    #[must_use]
    pub const fn new(data: Option<Value>, total: u64) -> Self {
        Self { data, total }
    }

    /// Run the descriptor's selectors against `snapshot`
    ///
    /// # Errors
    ///
    /// Selector failures propagate unchanged.
    pub fn read(
        descriptor: &RequestDescriptor,
        snapshot: &StoreSnapshot,
    ) -> Result<Self, SelectorError> {
        Ok(Self {
            data: descriptor.read_data(snapshot)?,
            total: descriptor.read_total(snapshot)?,
        })
    }
}

/// Fold the store's current value into the local lifecycle
///
/// When `external` equals what `local` already shows, `local` is returned
/// unchanged. Otherwise `data` and `total` are replaced and `loaded` follows
/// the new value's classification (see [`selector::classify`]): a fetched
/// value, even an empty one, re-opens `loaded` regardless of where the call
/// stands. `loading` and `error` are never touched here.
#[must_use]
pub fn merge(local: &LifecycleState, external: &ExternalSnapshot) -> LifecycleState {
    if local.data == external.data && local.total == external.total {
        return local.clone();
    }

    LifecycleState {
        data: external.data.clone(),
        total: external.total,
        error: local.error.clone(),
        loading: local.loading,
        loaded: selector::is_loaded(external.data.as_ref()),
    }
}
