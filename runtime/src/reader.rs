//! Store reads with change detection.

use crate::resource_store::ResourceStore;
use request_bridge_core::descriptor::RequestDescriptor;
use request_bridge_core::lifecycle::ExternalSnapshot;
use request_bridge_core::selector::SelectorError;
use request_bridge_core::snapshot::StoreSnapshot;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// Reads a descriptor's value from the resource store
///
/// [`StoreReader::poll`] remembers the last value it returned and reports a
/// new one only when it differs by structural equality, so re-reading an
/// unchanged store never triggers downstream work.
#[derive(Debug)]
pub struct StoreReader {
    store: ResourceStore,
    last: Mutex<Option<ExternalSnapshot>>,
}

impl StoreReader {
    /// Reader over `store`
    #[must_use]
    pub const fn new(store: ResourceStore) -> Self {
        Self {
            store,
            last: Mutex::new(None),
        }
    }

    /// The store being read
    #[must_use]
    pub const fn store(&self) -> &ResourceStore {
        &self.store
    }

    /// Receiver woken whenever the store changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<StoreSnapshot>> {
        self.store.subscribe()
    }

    /// Run the descriptor's selectors against the current snapshot
    ///
    /// # Errors
    ///
    /// Selector failures propagate unchanged.
    pub fn read(&self, descriptor: &RequestDescriptor) -> Result<ExternalSnapshot, SelectorError> {
        let snapshot = self.store.snapshot();
        ExternalSnapshot::read(descriptor, &snapshot)
    }

    /// Read, returning `Some` only when the value differs from the previous poll
    ///
    /// # Errors
    ///
    /// Selector failures propagate unchanged; the remembered value is left as is.
    pub fn poll(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<Option<ExternalSnapshot>, SelectorError> {
        let current = self.read(descriptor)?;
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if last.as_ref() == Some(&current) {
            return Ok(None);
        }
        *last = Some(current.clone());
        Ok(Some(current))
    }
}
