//! Read-through caching around any [`DataProvider`].
//!
//! Settled payloads are written into a [`ResourceStore`] under the cache key
//! derived from `{resource, params}`, which makes arbitrary custom operations
//! cacheable the same way the built-in ones are.

use crate::resource_store::ResourceStore;
use futures::FutureExt;
use futures::future::BoxFuture;
use request_bridge_core::cache_key::derive_key;
use request_bridge_core::environment::Clock;
use request_bridge_core::provider::{DataProvider, ProviderRequest, ProviderResult};
use request_bridge_core::selector::FETCHED_MARKER;
use serde_json::Value;
use std::sync::Arc;

/// Provider wrapper that stores every resolved payload
///
/// An empty object payload is stamped with the fetched marker so it reads as
/// "fetched, genuinely empty" rather than "never fetched". Rejections write
/// nothing.
pub struct ReadThroughProvider<P: ?Sized, C> {
    inner: Arc<P>,
    store: ResourceStore,
    clock: C,
}

impl<P, C> ReadThroughProvider<P, C>
where
    P: DataProvider + ?Sized,
    C: Clock,
{
    /// Wrap `inner`, writing into `store`
    pub const fn new(inner: Arc<P>, store: ResourceStore, clock: C) -> Self {
        Self {
            inner,
            store,
            clock,
        }
    }

    /// The store receiving payloads
    #[must_use]
    pub const fn store(&self) -> &ResourceStore {
        &self.store
    }

    fn stamp(&self, data: Value) -> Value {
        match data {
            Value::Object(map) if map.is_empty() => {
                let mut map = map;
                map.insert(
                    FETCHED_MARKER.to_string(),
                    Value::String(self.clock.now().to_rfc3339()),
                );
                Value::Object(map)
            },
            other => other,
        }
    }
}

impl<P, C> DataProvider for ReadThroughProvider<P, C>
where
    P: DataProvider + ?Sized,
    C: Clock,
{
    fn invoke(&self, request: ProviderRequest) -> BoxFuture<'_, ProviderResult> {
        async move {
            let key = derive_key(&request.resource, &request.params);
            let response = self.inner.invoke(request).await?;

            let data = self.stamp(response.data.clone());
            self.store.update(|snapshot| {
                snapshot.set_slot(key.clone(), data);
                if let Some(total) = response.total {
                    snapshot.set_total(key.clone(), total);
                }
            });
            tracing::trace!(%key, "stored settled payload");

            Ok(response)
        }
        .boxed()
    }
}

impl<P: ?Sized, C> std::fmt::Debug for ReadThroughProvider<P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadThroughProvider")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use request_bridge_core::descriptor::Operation;
    use request_bridge_core::provider::{OperationError, OperationResponse};
    use request_bridge_core::selector::{SlotState, classify};
    use request_bridge_testing::{FixedClock, test_clock};
    use serde_json::json;

    struct Reply(ProviderResult);

    impl DataProvider for Reply {
        fn invoke(&self, _request: ProviderRequest) -> BoxFuture<'_, ProviderResult> {
            futures::future::ready(self.0.clone()).boxed()
        }
    }

    fn request(operation: Operation) -> ProviderRequest {
        ProviderRequest {
            operation,
            resource: "reports".to_string(),
            params: json!({ "year": 2024 }),
            options: None,
        }
    }

    fn wrap(reply: ProviderResult) -> ReadThroughProvider<Reply, FixedClock> {
        ReadThroughProvider::new(Arc::new(Reply(reply)), ResourceStore::new(), test_clock())
    }

    #[tokio::test]
    async fn stores_payload_and_total_under_derived_key() {
        let provider = wrap(Ok(OperationResponse::new(json!([1, 2])).with_total(40)));
        let result = provider.invoke(request(Operation::custom("summarize"))).await;
        assert!(result.is_ok());

        let key = derive_key("reports", &json!({ "year": 2024 }));
        let snapshot = provider.store().snapshot();
        assert_eq!(snapshot.slot(&key), Some(&json!([1, 2])));
        assert_eq!(snapshot.total(&key), Some(40));
    }

    #[tokio::test]
    async fn empty_object_is_stamped_as_fetched() {
        let provider = wrap(Ok(OperationResponse::new(json!({}))));
        let _ = provider.invoke(request(Operation::GetOne)).await;

        let key = derive_key("reports", &json!({ "year": 2024 }));
        let snapshot = provider.store().snapshot();
        let stored = snapshot.slot(&key);
        assert_eq!(classify(stored), SlotState::Empty);
        assert_eq!(
            stored.and_then(|v| v.get("fetchedAt")),
            Some(&json!("2025-01-01T00:00:00+00:00"))
        );
    }

    #[tokio::test]
    async fn rejection_writes_nothing() {
        let provider = wrap(Err(OperationError::rejected("network down")));
        let result = provider.invoke(request(Operation::GetList)).await;

        assert_eq!(result, Err(OperationError::rejected("network down")));
        assert!(provider.store().snapshot().is_empty());
    }
}
