//! # Request Bridge Core
//!
//! Core types for the request bridge: a reactive layer that lets calling code
//! name an operation, a resource and parameters, while the fetch result is owned
//! by an external reactive store.
//!
//! This crate is the functional core. Everything here is synchronous and free of
//! I/O; the runtime crate supplies the imperative shell (effect execution, store
//! subscriptions, the dispatch surface).
//!
//! ## Core Concepts
//!
//! - **Descriptor**: immutable record of what was requested ([`descriptor`])
//! - **Cache key**: stable string derived from `{resource, params}` ([`cache_key`])
//! - **Snapshot / Selector**: the store's value and how to read from it
//!   ([`snapshot`], [`selector`])
//! - **Lifecycle state**: `{data, total, error, loading, loaded}` plus the pure
//!   `merge` ([`lifecycle`])
//! - **Reducer**: `(State, Action, Environment) → (State, Effects)` ([`bridge`])
//! - **Effect**: side effect description, executed by the runtime ([`effect`])
//!
//! ## Example
//!
//! ```ignore
//! use request_bridge_core::bridge::{BridgeAction, BridgeEnvironment, BridgeReducer, BridgeState};
//! use request_bridge_core::descriptor::{Operation, RequestDescriptor};
//! use request_bridge_core::reducer::Reducer;
//!
//! let mut state = BridgeState::default();
//! let env = BridgeEnvironment::new(provider);
//!
//! let descriptor = RequestDescriptor::new(Operation::GetOne, "users", json!({ "id": 7 }));
//! let effects = BridgeReducer.reduce(&mut state, BridgeAction::Arm(descriptor), &env);
//! assert!(state.lifecycle.loading);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

/// Reducer state machine driving the request lifecycle
pub mod bridge;

/// Cache-key and descriptor-signature derivation
pub mod cache_key;

/// Request descriptors, typed operations and trailing-argument policy
pub mod descriptor;

/// Lifecycle state and the store/local merge
pub mod lifecycle;

/// Outbound data-provider contract
pub mod provider;

/// Store read selectors and the fetched-marker classification
pub mod selector;

/// Immutable store snapshots
pub mod snapshot;

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`
///
/// They contain all the lifecycle logic and are deterministic and testable.
pub mod reducer {
    use super::SmallVec;
    use super::effect::Effect;

    /// The Reducer trait - core abstraction for state transitions
    ///
    /// # Type Parameters
    ///
    /// - `State`: The state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Updates state in place
        /// 2. Returns effect descriptions to be executed
        ///
        /// Effects are never executed here; the runtime runs them and feeds any
        /// resulting action back through `reduce`.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe side effects to be performed by the runtime.
/// They are values (not execution).
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;

    /// Effect type - describes a side effect to be executed
    ///
    /// Effects are NOT executed immediately. They are descriptions of what should happen,
    /// returned from reducers and executed by the Store runtime.
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Whether this effect does nothing when executed
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// via the Environment parameter.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Used to stamp the fetched marker on keyed results.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
