//! Caller-facing dispatch surface.
//!
//! [`QueryBridge`] turns "run this operation on this resource with these
//! params" into a [`RequestDescriptor`], arms it on the lifecycle reducer and
//! runs one evaluation pass: read the store through the descriptor's
//! selectors, fold a changed value in, publish the resulting
//! [`LifecycleState`].
//!
//! A background watcher repeats the evaluation pass whenever the store changes
//! or a provider call settles, so subscribers see every transition without
//! calling back in.

use crate::config::{BridgeConfig, ResultSource};
use crate::error::{BridgeError, StoreError};
use crate::read_through::ReadThroughProvider;
use crate::reader::StoreReader;
use crate::resource_store::ResourceStore;
use crate::store::Store;
use request_bridge_core::bridge::{BridgeAction, BridgeEnvironment, BridgeReducer, BridgeState};
use request_bridge_core::descriptor::{Operation, RequestDescriptor, TrailingArg, TrailingArgs};
use request_bridge_core::environment::{Clock, SystemClock};
use request_bridge_core::lifecycle::{ExternalSnapshot, LifecycleState, Phase};
use request_bridge_core::provider::DataProvider;
use request_bridge_core::snapshot::StoreSnapshot;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

type BridgeStore = Store<BridgeState, BridgeAction, BridgeEnvironment, BridgeReducer>;

/// Imperative request surface over a reactive store
///
/// # Example
///
/// ```ignore
/// let bridge = QueryBridge::new(store.clone(), provider);
///
/// let state = bridge.get_one("users", json!({ "id": 7 }), []).await?;
/// assert!(state.loading);
///
/// // Same request again: no second provider call
/// bridge.get_one("users", json!({ "id": 7 }), []).await?;
///
/// let mut updates = bridge.subscribe();
/// updates.changed().await?;
/// ```
pub struct QueryBridge {
    inner: Arc<BridgeInner>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

struct BridgeInner {
    store: BridgeStore,
    reader: StoreReader,
    lifecycle: watch::Sender<LifecycleState>,
    /// Serializes evaluation passes so reads and folds never interleave
    evaluation: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    reported_stale: AtomicU64,
    config: BridgeConfig,
}

impl QueryBridge {
    /// Bridge over `store` with the default configuration
    #[must_use]
    pub fn new(store: ResourceStore, provider: Arc<dyn DataProvider>) -> Self {
        Self::with_config(store, provider, BridgeConfig::default())
    }

    /// Bridge over `store` configured by `config`
    ///
    /// With [`ResultSource::Local`] the bridge reads a private store instead of
    /// `store`, and the provider is wrapped so its settled payloads land there.
    /// The private store only ever holds the armed request's slot.
    ///
    /// The watcher task is only started when called inside a tokio runtime;
    /// without one, call [`QueryBridge::evaluate`] to pick up store changes.
    #[must_use]
    pub fn with_config(
        store: ResourceStore,
        provider: Arc<dyn DataProvider>,
        config: BridgeConfig,
    ) -> Self {
        Self::with_clock(store, provider, config, SystemClock)
    }

    /// Like [`QueryBridge::with_config`], stamping fetched markers in the
    /// private store with `clock`
    ///
    /// The clock is unused under [`ResultSource::Shared`].
    #[must_use]
    pub fn with_clock<C>(
        store: ResourceStore,
        provider: Arc<dyn DataProvider>,
        config: BridgeConfig,
        clock: C,
    ) -> Self
    where
        C: Clock + 'static,
    {
        let (reader, provider) = match config.result_source {
            ResultSource::Shared => (StoreReader::new(store), provider),
            ResultSource::Local => {
                let local = ResourceStore::new();
                let wrapped: Arc<dyn DataProvider> =
                    Arc::new(ReadThroughProvider::new(provider, local.clone(), clock));
                (StoreReader::new(local), wrapped)
            },
        };

        let store = Store::with_broadcast_capacity(
            BridgeState::default(),
            BridgeReducer,
            BridgeEnvironment::new(provider),
            config.broadcast_capacity,
        );
        let (lifecycle, _rx) = watch::channel(LifecycleState::initial());

        let inner = Arc::new(BridgeInner {
            store,
            reader,
            lifecycle,
            evaluation: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
            reported_stale: AtomicU64::new(0),
            config,
        });

        // Subscribe before spawning so nothing between here and the task's
        // first poll is missed
        let watcher = tokio::runtime::Handle::try_current().ok().map(|handle| {
            let store_changes = inner.reader.subscribe();
            let settlements = inner.store.subscribe_actions();
            handle.spawn(watch_changes(Arc::clone(&inner), store_changes, settlements))
        });
        if watcher.is_none() {
            tracing::debug!("no tokio runtime, store watcher not started");
        }

        Self {
            inner,
            watcher: Mutex::new(watcher),
        }
    }

    /// Run `operation` on `resource` with `params`
    ///
    /// Trailing arguments are resolved positionally (see [`TrailingArgs`]).
    /// Returns the lifecycle snapshot right after arming; the provider call
    /// continues in the background.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Selector`] if a selector fails, [`BridgeError::Store`] once
    /// the bridge is shutting down. Provider rejections are not errors here;
    /// they show up in [`LifecycleState::error`].
    pub async fn dispatch(
        &self,
        operation: Operation,
        resource: impl Into<String>,
        params: Value,
        trailing: impl IntoIterator<Item = TrailingArg>,
    ) -> Result<LifecycleState, BridgeError> {
        let descriptor = RequestDescriptor::new(operation, resource, params)
            .with_trailing(TrailingArgs::resolve(trailing));
        self.arm(descriptor).await
    }

    /// `getList`
    ///
    /// # Errors
    ///
    /// See [`QueryBridge::dispatch`].
    pub async fn get_list(
        &self,
        resource: impl Into<String>,
        params: Value,
        trailing: impl IntoIterator<Item = TrailingArg>,
    ) -> Result<LifecycleState, BridgeError> {
        self.dispatch(Operation::GetList, resource, params, trailing)
            .await
    }

    /// `getOne`
    ///
    /// # Errors
    ///
    /// See [`QueryBridge::dispatch`].
    pub async fn get_one(
        &self,
        resource: impl Into<String>,
        params: Value,
        trailing: impl IntoIterator<Item = TrailingArg>,
    ) -> Result<LifecycleState, BridgeError> {
        self.dispatch(Operation::GetOne, resource, params, trailing)
            .await
    }

    /// `getMany`
    ///
    /// # Errors
    ///
    /// See [`QueryBridge::dispatch`].
    pub async fn get_many(
        &self,
        resource: impl Into<String>,
        params: Value,
        trailing: impl IntoIterator<Item = TrailingArg>,
    ) -> Result<LifecycleState, BridgeError> {
        self.dispatch(Operation::GetMany, resource, params, trailing)
            .await
    }

    /// `getManyReference`
    ///
    /// # Errors
    ///
    /// See [`QueryBridge::dispatch`].
    pub async fn get_many_reference(
        &self,
        resource: impl Into<String>,
        params: Value,
        trailing: impl IntoIterator<Item = TrailingArg>,
    ) -> Result<LifecycleState, BridgeError> {
        self.dispatch(Operation::GetManyReference, resource, params, trailing)
            .await
    }

    /// Any operation by name; known verbs map to their typed variant
    ///
    /// # Errors
    ///
    /// See [`QueryBridge::dispatch`].
    pub async fn custom(
        &self,
        name: impl AsRef<str>,
        resource: impl Into<String>,
        params: Value,
        trailing: impl IntoIterator<Item = TrailingArg>,
    ) -> Result<LifecycleState, BridgeError> {
        self.dispatch(Operation::custom(name), resource, params, trailing)
            .await
    }

    /// Arm a prepared descriptor and evaluate
    ///
    /// # Errors
    ///
    /// See [`QueryBridge::dispatch`].
    #[tracing::instrument(
        skip_all,
        fields(operation = %descriptor.operation(), resource = descriptor.resource())
    )]
    pub async fn arm(&self, descriptor: RequestDescriptor) -> Result<LifecycleState, BridgeError> {
        if self.inner.closed.load(Ordering::Acquire) {
            tracing::warn!("Rejected dispatch: bridge is shutting down");
            return Err(StoreError::ShutdownInProgress.into());
        }
        metrics::counter!(
            "bridge.dispatch.total",
            "operation" => descriptor.operation().name().to_owned()
        )
        .increment(1);

        let _evaluation = self.inner.evaluation.lock().await;

        let before = self.inner.store.state(|s| s.invocations).await;
        self.inner.store.send(BridgeAction::Arm(descriptor)).await?;
        let after = self.inner.store.state(|s| s.invocations).await;
        if after > before {
            metrics::counter!("bridge.operations.invoked").increment(after - before);
        }

        self.inner.evaluate_locked().await
    }

    /// Run one evaluation pass against the current store value
    ///
    /// # Errors
    ///
    /// [`BridgeError::Selector`] if a selector fails.
    pub async fn evaluate(&self) -> Result<LifecycleState, BridgeError> {
        self.inner.evaluate().await
    }

    /// Latest published lifecycle state
    #[must_use]
    pub fn snapshot(&self) -> LifecycleState {
        self.inner.lifecycle.borrow().clone()
    }

    /// Receiver notified on every lifecycle change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.inner.lifecycle.subscribe()
    }

    /// Wait until the published state satisfies `predicate`
    ///
    /// Checks the current state first.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Timeout`] if `timeout` elapses first.
    pub async fn wait_for<F>(
        &self,
        mut predicate: F,
        timeout: Duration,
    ) -> Result<LifecycleState, BridgeError>
    where
        F: FnMut(&LifecycleState) -> bool,
    {
        let mut rx = self.subscribe();
        let waiting = async {
            rx.wait_for(&mut predicate)
                .await
                .map(|state| LifecycleState::clone(&state))
                .map_err(|_| BridgeError::from(StoreError::ChannelClosed))
        };
        tokio::time::timeout(timeout, waiting)
            .await
            .map_err(|_| BridgeError::Timeout)?
    }

    /// Coarse phase of the armed request
    pub async fn phase(&self) -> Phase {
        self.inner.store.state(BridgeState::phase).await
    }

    /// Provider calls issued so far
    pub async fn invocations(&self) -> u64 {
        self.inner.store.state(|s| s.invocations).await
    }

    /// Settlements dropped because their request was superseded
    pub async fn stale_settlements(&self) -> u64 {
        self.inner.store.state(|s| s.stale_settlements).await
    }

    /// Provider calls still in flight
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.inner.store.pending_effects()
    }

    /// The store this bridge reads; private to the bridge under
    /// [`ResultSource::Local`]
    #[must_use]
    pub fn resource_store(&self) -> &ResourceStore {
        self.inner.reader.store()
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Stop watching, reject further dispatches and wait for in-flight calls
    ///
    /// Whatever settled or reached the store while waiting is folded in and
    /// published once more before returning, timeout or not.
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownTimeout`] (as [`BridgeError::Store`]) if calls are
    /// still running after the configured shutdown timeout.
    pub async fn shutdown(&self) -> Result<(), BridgeError> {
        tracing::info!("Shutting down bridge");
        self.inner.closed.store(true, Ordering::Release);
        if let Some(watcher) = self.take_watcher() {
            watcher.abort();
        }
        let drained = self
            .inner
            .store
            .shutdown(self.inner.config.shutdown_timeout)
            .await;

        if let Err(error) = self.inner.evaluate_final().await {
            tracing::error!(%error, "final evaluation pass failed");
        }
        drained?;
        Ok(())
    }

    fn take_watcher(&self) -> Option<JoinHandle<()>> {
        self.watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for QueryBridge {
    fn drop(&mut self) {
        if let Some(watcher) = self.take_watcher() {
            watcher.abort();
        }
    }
}

impl std::fmt::Debug for QueryBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBridge")
            .field("config", &self.inner.config)
            .field("lifecycle", &*self.inner.lifecycle.borrow())
            .finish_non_exhaustive()
    }
}

impl BridgeInner {
    async fn evaluate(&self) -> Result<LifecycleState, BridgeError> {
        let _evaluation = self.evaluation.lock().await;
        self.evaluate_locked().await
    }

    async fn evaluate_locked(&self) -> Result<LifecycleState, BridgeError> {
        if let Some(external) = self.poll_armed().await? {
            self.store.send(BridgeAction::StoreRead(external)).await?;
        }
        Ok(self.publish().await)
    }

    /// Evaluation pass for a store that no longer accepts actions
    async fn evaluate_final(&self) -> Result<LifecycleState, BridgeError> {
        let _evaluation = self.evaluation.lock().await;
        if let Some(external) = self.poll_armed().await? {
            self.store
                .feed_back(BridgeAction::StoreRead(external))
                .await;
        }
        Ok(self.publish().await)
    }

    async fn poll_armed(&self) -> Result<Option<ExternalSnapshot>, BridgeError> {
        let Some(descriptor) = self.store.state(|s| s.armed.clone()).await else {
            return Ok(None);
        };

        if self.config.result_source == ResultSource::Local {
            let key = descriptor.cache_key();
            if self.reader.store().retain(|slot| slot == key) {
                tracing::trace!("dropped superseded local slots");
            }
        }

        let external = self.reader.poll(&descriptor)?;
        if let Some(external) = &external {
            metrics::counter!("bridge.store.changes").increment(1);
            tracing::trace!(total = external.total, "store value changed");
        }
        Ok(external)
    }

    async fn publish(&self) -> LifecycleState {
        let lifecycle = self.store.state(|s| s.lifecycle.clone()).await;
        self.lifecycle.send_if_modified(|current| {
            if *current == lifecycle {
                false
            } else {
                *current = lifecycle.clone();
                true
            }
        });
        lifecycle
    }

    async fn record_settlement(&self, failed: bool) {
        if failed {
            metrics::counter!("bridge.operations.failed").increment(1);
        }
        let stale = self.store.state(|s| s.stale_settlements).await;
        let reported = self.reported_stale.swap(stale, Ordering::AcqRel);
        if stale > reported {
            metrics::counter!("bridge.settlements.stale").increment(stale - reported);
        }
    }
}

async fn watch_changes(
    inner: Arc<BridgeInner>,
    mut store_changes: watch::Receiver<Arc<StoreSnapshot>>,
    mut settlements: broadcast::Receiver<BridgeAction>,
) {
    loop {
        tokio::select! {
            changed = store_changes.changed() => {
                if changed.is_err() {
                    break;
                }
            },
            action = settlements.recv() => match action {
                Ok(BridgeAction::Settled { outcome, .. }) => {
                    inner.record_settlement(outcome.is_err()).await;
                },
                Ok(_) => {},
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "settlement observer lagged");
                },
                Err(RecvError::Closed) => break,
            },
        }

        if inner.closed.load(Ordering::Acquire) {
            break;
        }
        if let Err(error) = inner.evaluate().await {
            tracing::error!(%error, "evaluation pass failed");
        }
    }
    tracing::debug!("store watcher stopped");
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code can use expect
mod tests {
    use super::*;
    use request_bridge_testing::MockDataProvider;
    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn dispatch_returns_loading_snapshot() -> Result<(), BridgeError> {
        let provider = MockDataProvider::gated();
        let bridge = QueryBridge::new(ResourceStore::new(), provider.clone());

        let state = bridge.get_one("users", json!({ "id": 7 }), []).await?;
        assert!(state.loading);
        assert!(!state.loaded);
        assert_eq!(bridge.phase().await, Phase::Loading);
        assert_eq!(bridge.snapshot(), state);

        provider.release(1);
        Ok(())
    }

    #[tokio::test]
    async fn phase_is_idle_before_dispatch() {
        let bridge = QueryBridge::new(ResourceStore::new(), MockDataProvider::new());
        assert_eq!(bridge.phase().await, Phase::Idle);
        assert_eq!(bridge.invocations().await, 0);
    }

    #[tokio::test]
    async fn settlement_is_published_by_watcher() -> Result<(), BridgeError> {
        let provider = MockDataProvider::new();
        let bridge = QueryBridge::new(ResourceStore::new(), provider.clone());

        bridge.get_list("posts", json!({ "page": 1 }), []).await?;
        let state = bridge.wait_for(|s| !s.loading, WAIT).await?;

        assert!(state.loaded);
        assert!(state.error.is_none());
        assert_eq!(provider.call_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn custom_operation_reaches_provider_by_name() -> Result<(), BridgeError> {
        let provider = MockDataProvider::new();
        let bridge = QueryBridge::new(ResourceStore::new(), provider.clone());

        bridge
            .custom("summarize", "reports", json!({ "year": 2024 }), [])
            .await?;
        bridge.wait_for(|s| !s.loading, WAIT).await?;

        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].operation.name(), "summarize");
        assert_eq!(calls[0].resource, "reports");
        Ok(())
    }

    #[tokio::test]
    async fn wait_for_times_out() -> Result<(), BridgeError> {
        let provider = MockDataProvider::gated();
        let bridge = QueryBridge::new(ResourceStore::new(), provider.clone());

        bridge.get_one("users", json!({ "id": 1 }), []).await?;
        let result = bridge
            .wait_for(|s| !s.loading, Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(BridgeError::Timeout)));

        provider.release(1);
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_rejects_dispatch() -> Result<(), BridgeError> {
        let bridge = QueryBridge::new(ResourceStore::new(), MockDataProvider::new());
        bridge.shutdown().await?;

        let result = bridge.get_one("users", json!({ "id": 1 }), []).await;
        assert!(matches!(
            result,
            Err(BridgeError::Store(StoreError::ShutdownInProgress))
        ));
        Ok(())
    }

    #[test]
    fn evaluates_without_watcher_outside_runtime() -> Result<(), BridgeError> {
        let store = ResourceStore::new();
        let bridge = QueryBridge::new(store.clone(), MockDataProvider::gated());
        let descriptor = RequestDescriptor::new(Operation::GetOne, "users", json!({ "id": 3 }));
        store.put(descriptor.cache_key(), json!({ "id": 3 }));

        // Arming spawns the provider call, which needs a runtime
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("current-thread runtime should build");
        let state = runtime.block_on(bridge.arm(descriptor))?;

        assert_eq!(state.data, Some(json!({ "id": 3 })));
        assert!(state.loaded);
        assert!(state.loading);
        Ok(())
    }
}
