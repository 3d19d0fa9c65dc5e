//! # Request Bridge Runtime
//!
//! Imperative shell around the request lifecycle reducer.
//!
//! ## Core Components
//!
//! - **Store**: manages reducer state and executes effects, feeding produced
//!   actions back into the reducer
//! - **`ResourceStore`**: the reactive key-value store holding fetched values
//! - **`StoreReader`**: reads the store through a descriptor's selectors and
//!   reports only values that changed
//! - **`QueryBridge`**: the caller-facing dispatch surface and evaluation pass
//! - **`ReadThroughProvider`**: writes settled payloads into the store under
//!   the derived cache key
//!
//! ## Example
//!
//! ```ignore
//! use request_bridge_runtime::{QueryBridge, ResourceStore};
//! use serde_json::json;
//!
//! let store = ResourceStore::new();
//! let bridge = QueryBridge::new(store.clone(), provider);
//!
//! // Returns the current snapshot immediately; the call runs in the background
//! let state = bridge.get_one("users", json!({ "id": 7 }), []).await?;
//! assert!(state.loading);
//!
//! let state = bridge.wait_for(|s| !s.loading, Duration::from_secs(1)).await?;
//! ```

use request_bridge_core::{effect::Effect, reducer::Reducer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Caller-facing dispatch surface
pub mod bridge;

/// Bridge configuration
pub mod config;

/// Read-through caching provider wrapper
pub mod read_through;

/// Selector evaluation with change detection
pub mod reader;

/// Reactive resource store
pub mod resource_store;

/// Error types for the runtime
pub mod error {
    use request_bridge_core::selector::SelectorError;
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        ///
        /// This error is returned when `send()` is called after shutdown initiated.
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        ///
        /// Some effects were still running when the timeout elapsed.
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// A notification channel closed
        #[error("Notification channel closed")]
        ChannelClosed,
    }

    /// Errors surfaced to bridge callers
    ///
    /// Provider rejections are not here: they end up in
    /// `LifecycleState::error`.
    #[derive(Error, Debug)]
    pub enum BridgeError {
        /// A read or total selector failed during the evaluation pass
        #[error("Selector failed during evaluation: {0}")]
        Selector(#[from] SelectorError),

        /// The underlying store rejected the action
        #[error(transparent)]
        Store(#[from] StoreError),

        /// The awaited lifecycle state did not appear in time
        #[error("Timed out waiting for lifecycle state")]
        Timeout,
    }
}

pub use bridge::QueryBridge;
pub use config::{BridgeConfig, ResultSource};
pub use error::{BridgeError, StoreError};
pub use read_through::ReadThroughProvider;
pub use reader::StoreReader;
pub use resource_store::ResourceStore;

/// Guard that decrements an atomic counter on drop (for shutdown tracking)
struct AtomicCounterGuard(Arc<AtomicUsize>);

impl Drop for AtomicCounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Store runtime for coordinating reducer execution and effect handling.
pub mod store {
    use super::{
        Arc, AtomicBool, AtomicCounterGuard, AtomicUsize, Duration, Effect, Ordering, Reducer,
        RwLock, StoreError,
    };
    use tokio::sync::broadcast;

    /// The Store - runtime coordinator for a reducer
    ///
    /// The Store manages:
    /// 1. State (behind `RwLock` for concurrent access)
    /// 2. Reducer (state transitions)
    /// 3. Environment (injected dependencies)
    /// 4. Effect execution (with feedback loop)
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: R,
        environment: E,
        shutdown: Arc<AtomicBool>,
        pending_effects: Arc<AtomicUsize>,
        /// Actions produced by effects, broadcast after they have been reduced
        action_broadcast: broadcast::Sender<A>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Send + Clone + 'static,
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        /// Create a new store with initial state, reducer, and environment
        ///
        /// The action broadcast buffers 16 actions; use
        /// [`Store::with_broadcast_capacity`] for more.
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_broadcast_capacity(initial_state, reducer, environment, 16)
        }

        /// Create a new Store with custom action broadcast capacity
        ///
        /// A capacity of zero is raised to one.
        #[must_use]
        pub fn with_broadcast_capacity(
            initial_state: S,
            reducer: R,
            environment: E,
            capacity: usize,
        ) -> Self {
            let (action_broadcast, _) = broadcast::channel(capacity.max(1));

            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer,
                environment,
                shutdown: Arc::new(AtomicBool::new(false)),
                pending_effects: Arc::new(AtomicUsize::new(0)),
                action_broadcast,
            }
        }

        /// Number of effects currently running
        #[must_use]
        pub fn pending_effects(&self) -> usize {
            self.pending_effects.load(Ordering::Acquire)
        }

        /// Initiate graceful shutdown of the store
        ///
        /// Rejects new actions, then waits for pending effects to complete.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] if the timeout expires before all
        /// pending effects complete.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            tracing::info!("Initiating graceful shutdown");
            metrics::counter!("store.shutdown.initiated").increment(1);

            self.shutdown.store(true, Ordering::Release);

            let start = std::time::Instant::now();
            let poll_interval = Duration::from_millis(10);

            loop {
                let pending = self.pending_effects.load(Ordering::Acquire);

                if pending == 0 {
                    tracing::info!("All effects completed, shutdown successful");
                    return Ok(());
                }

                if start.elapsed() >= timeout {
                    tracing::error!(pending_effects = pending, "Shutdown timeout");
                    metrics::counter!("store.shutdown.timeout").increment(1);
                    return Err(StoreError::ShutdownTimeout(pending));
                }

                tokio::time::sleep(poll_interval).await;
            }
        }

        /// Send an action to the store
        ///
        /// 1. Acquires write lock on state
        /// 2. Calls reducer with (state, action, environment)
        /// 3. Spawns the returned effects; actions they produce are fed back
        ///
        /// `send()` returns after starting effect execution, not completion.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<(), StoreError>
        where
            R: Clone,
            E: Clone,
        {
            if self.shutdown.load(Ordering::Acquire) {
                tracing::warn!("Rejected action: store is shutting down");
                return Err(StoreError::ShutdownInProgress);
            }

            let effects = {
                let mut state = self.state.write().await;

                let start = std::time::Instant::now();
                let effects = self.reducer.reduce(&mut *state, action, &self.environment);
                metrics::histogram!("store.reducer.duration_seconds")
                    .record(start.elapsed().as_secs_f64());

                tracing::trace!("Reducer completed, returned {} effects", effects.len());
                effects
            };

            for effect in effects {
                self.execute_effect(effect);
            }

            Ok(())
        }

        /// Subscribe to actions produced by effects
        ///
        /// Each action is broadcast after the reducer has processed it, so a
        /// receiver reading state on receipt sees its effect.
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.action_broadcast.subscribe()
        }

        /// Read current state via a closure
        ///
        /// ```ignore
        /// let loading = store.state(|s| s.lifecycle.loading).await;
        /// ```
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&*state)
        }

        fn execute_effect(&self, effect: Effect<A>)
        where
            R: Clone,
            E: Clone,
        {
            match effect {
                Effect::None => {
                    metrics::counter!("store.effects.executed", "type" => "none").increment(1);
                },
                Effect::Future(fut) => {
                    metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                    self.pending_effects.fetch_add(1, Ordering::SeqCst);
                    let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));

                    let store = self.clone();

                    tokio::spawn(async move {
                        let _pending_guard = pending_guard;

                        if let Some(action) = fut.await {
                            tracing::trace!("Effect::Future produced an action, sending to store");
                            // Bypass the shutdown gate: in-flight effects still land
                            store.feed_back(action.clone()).await;
                            let _ = store.action_broadcast.send(action);
                        }
                    });
                },
            }
        }

        /// Reduce `action` regardless of the shutdown gate
        ///
        /// Used for actions produced by in-flight effects and for folding in
        /// what they left behind once the store has drained.
        pub(crate) async fn feed_back(&self, action: A)
        where
            R: Clone,
            E: Clone,
        {
            let effects = {
                let mut state = self.state.write().await;
                self.reducer.reduce(&mut *state, action, &self.environment)
            };
            for effect in effects {
                self.execute_effect(effect);
            }
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone,
        E: Clone,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: self.reducer.clone(),
                environment: self.environment.clone(),
                shutdown: Arc::clone(&self.shutdown),
                pending_effects: Arc::clone(&self.pending_effects),
                action_broadcast: self.action_broadcast.clone(),
            }
        }
    }
}

pub use store::Store;

#[cfg(test)]
mod tests {
    use super::*;
    use request_bridge_core::{SmallVec, smallvec};

    #[derive(Debug, Clone, Default)]
    struct TestState {
        value: i32,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum TestAction {
        Increment,
        ProduceEffect,
    }

    #[derive(Debug, Clone)]
    struct TestReducer;

    impl Reducer for TestReducer {
        type State = TestState;
        type Action = TestAction;
        type Environment = ();

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            _env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]> {
            match action {
                TestAction::Increment => {
                    state.value += 1;
                    smallvec![Effect::None]
                },
                TestAction::ProduceEffect => {
                    smallvec![Effect::Future(Box::pin(async { Some(TestAction::Increment) }))]
                },
            }
        }
    }

    #[tokio::test]
    async fn test_send_action() {
        let store = Store::new(TestState::default(), TestReducer, ());

        let _ = store.send(TestAction::Increment).await;
        assert_eq!(store.state(|s| s.value).await, 1);
    }

    #[tokio::test]
    async fn test_effect_feedback_drains_pending() -> Result<(), StoreError> {
        let store = Store::new(TestState::default(), TestReducer, ());

        store.send(TestAction::ProduceEffect).await?;
        store.shutdown(Duration::from_secs(1)).await?;

        assert_eq!(store.state(|s| s.value).await, 1);
        assert_eq!(store.pending_effects(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_broadcast_happens_after_reduce() -> Result<(), StoreError> {
        let store = Store::new(TestState::default(), TestReducer, ());
        let mut rx = store.subscribe_actions();

        store.send(TestAction::ProduceEffect).await?;
        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;

        assert!(matches!(received, Ok(Ok(TestAction::Increment))));
        assert_eq!(store.state(|s| s.value).await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_actions() -> Result<(), StoreError> {
        let store = Store::new(TestState::default(), TestReducer, ());
        store.shutdown(Duration::from_secs(1)).await?;

        let result = store.send(TestAction::Increment).await;
        assert!(matches!(result, Err(StoreError::ShutdownInProgress)));
        Ok(())
    }

    #[test]
    fn test_shutdown_without_effects_is_immediate() {
        let store = Store::new(TestState::default(), TestReducer, ());
        let result = tokio_test::block_on(store.shutdown(Duration::ZERO));
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_feed_back_bypasses_shutdown_gate() -> Result<(), StoreError> {
        let store = Store::new(TestState::default(), TestReducer, ());
        store.shutdown(Duration::from_secs(1)).await?;

        store.feed_back(TestAction::Increment).await;
        assert_eq!(store.state(|s| s.value).await, 1);
        Ok(())
    }
}
