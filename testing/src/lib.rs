//! # Request Bridge Testing
//!
//! Testing utilities for the request bridge.
//!
//! This crate provides:
//! - A fixed [`Clock`] for deterministic fetched markers
//! - [`MockDataProvider`]: scripted, gated, call-recording provider
//! - [`LifecycleTest`]: Given-When-Then helper for the lifecycle reducer
//! - Assertion helpers for effects and lifecycle states
//!
//! ## Example
//!
//! ```ignore
//! use request_bridge_testing::MockDataProvider;
//! use request_bridge_runtime::{QueryBridge, ResourceStore};
//!
//! #[tokio::test]
//! async fn loads_user() {
//!     let provider = MockDataProvider::new();
//!     let bridge = QueryBridge::new(ResourceStore::new(), provider.clone());
//!
//!     bridge.get_one("users", json!({ "id": 7 }), []).await.unwrap();
//!     assert_eq!(provider.call_count(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use request_bridge_core::environment::Clock;


/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use request_bridge_core::provider::{
        DataProvider, OperationError, OperationResponse, ProviderRequest, ProviderResult,
    };
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex, PoisonError};
    use tokio::sync::Semaphore;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use request_bridge_testing::mocks::FixedClock;
    /// use request_bridge_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Scripted data provider
    ///
    /// Every call is recorded on arrival. Replies are taken from the queue
    /// filled by [`MockDataProvider::push_reply`]; once it is empty the default
    /// reply is used. A gated provider holds each call until
    /// [`MockDataProvider::release`] hands out a permit, which lets tests
    /// observe the in-flight window.
    ///
    /// ```ignore
    /// let provider = MockDataProvider::gated();
    /// provider.push_reply(Err(OperationError::rejected("network down")));
    ///
    /// bridge.get_one("users", json!({ "id": 7 }), []).await?;
    /// assert!(bridge.snapshot().loading);
    ///
    /// provider.release(1);
    /// ```
    #[derive(Debug)]
    pub struct MockDataProvider {
        calls: Mutex<Vec<ProviderRequest>>,
        replies: Mutex<VecDeque<ProviderResult>>,
        default_reply: Mutex<ProviderResult>,
        gate: Option<Semaphore>,
    }

    impl MockDataProvider {
        /// Provider resolving every call immediately with a `null` payload
        #[must_use]
        pub fn new() -> Arc<Self> {
            Arc::new(Self::build(None))
        }

        /// Provider holding every call until released
        #[must_use]
        pub fn gated() -> Arc<Self> {
            Arc::new(Self::build(Some(Semaphore::new(0))))
        }

        /// Provider resolving every call with `data`
        #[must_use]
        pub fn resolving(data: Value) -> Arc<Self> {
            let provider = Self::build(None);
            provider.set_default_reply(Ok(OperationResponse::new(data)));
            Arc::new(provider)
        }

        /// Provider rejecting every call with `reason`
        #[must_use]
        pub fn rejecting(reason: &str) -> Arc<Self> {
            let provider = Self::build(None);
            provider.set_default_reply(Err(OperationError::rejected(reason)));
            Arc::new(provider)
        }

        fn build(gate: Option<Semaphore>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                replies: Mutex::new(VecDeque::new()),
                default_reply: Mutex::new(Ok(OperationResponse::new(Value::Null))),
                gate,
            }
        }

        /// Queue a reply for the next unanswered call
        pub fn push_reply(&self, reply: ProviderResult) {
            self.replies
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(reply);
        }

        /// Reply used once the queue is empty
        pub fn set_default_reply(&self, reply: ProviderResult) {
            *self
                .default_reply
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = reply;
        }

        /// Let `calls` held calls proceed; no-op for ungated providers
        pub fn release(&self, calls: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(calls);
            }
        }

        /// Requests received so far, in arrival order
        #[must_use]
        pub fn calls(&self) -> Vec<ProviderRequest> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Number of requests received so far
        #[must_use]
        pub fn call_count(&self) -> usize {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        }

        fn next_reply(&self) -> ProviderResult {
            let queued = self
                .replies
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            queued.unwrap_or_else(|| {
                self.default_reply
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
            })
        }
    }

    impl DataProvider for MockDataProvider {
        fn invoke(&self, request: ProviderRequest) -> BoxFuture<'_, ProviderResult> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request);

            async move {
                if let Some(gate) = &self.gate {
                    match gate.acquire().await {
                        Ok(permit) => permit.forget(),
                        Err(_) => return Err(OperationError::rejected("gate closed")),
                    }
                }
                self.next_reply()
            }
            .boxed()
        }
    }
}

/// Helper assertions for effects and lifecycle states
pub mod assertions {
    use request_bridge_core::effect::Effect;
    use request_bridge_core::lifecycle::LifecycleState;
    use request_bridge_core::provider::OperationError;

    /// Assert that there are no effects
    ///
    /// # Panics
    ///
    /// Panics if effects is not empty.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_no_effects<A: std::fmt::Debug>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().all(Effect::is_none),
            "Expected no effects, but found {}: {:?}",
            effects.len(),
            effects
        );
    }

    /// Assert that effects contain at least one Future effect
    ///
    /// # Panics
    ///
    /// Panics if no Future effect is found.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_has_future_effect<A>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().any(|e| matches!(e, Effect::Future(_))),
            "Expected at least one Future effect, but none found"
        );
    }

    /// Assert `{loading: true, loaded: false, error: None}`
    ///
    /// # Panics
    ///
    /// Panics on any other flag combination.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_loading(state: &LifecycleState) {
        assert!(
            state.loading && !state.loaded && state.error.is_none(),
            "Expected a loading state, got {state:?}"
        );
    }

    /// Assert the terminal success flags `{loading: false, loaded: true, error: None}`
    ///
    /// # Panics
    ///
    /// Panics on any other flag combination.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_loaded(state: &LifecycleState) {
        assert!(
            !state.loading && state.loaded && state.error.is_none(),
            "Expected a loaded state, got {state:?}"
        );
    }

    /// Assert the terminal error flags with `reason` as the rejection message
    ///
    /// # Panics
    ///
    /// Panics on any other flag combination or reason.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_rejected(state: &LifecycleState, reason: &str) {
        assert!(
            !state.loading && !state.loaded,
            "Expected terminal error flags, got {state:?}"
        );
        assert_eq!(state.error, Some(OperationError::rejected(reason)));
    }
}

/// Install a `tracing` subscriber honouring `RUST_LOG`, writing to the test
/// output capture. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub use lifecycle_test::LifecycleTest;
pub use mocks::{FixedClock, MockDataProvider, test_clock};
