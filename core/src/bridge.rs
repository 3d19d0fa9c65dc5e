//! The request lifecycle as a reducer.
//!
//! [`BridgeReducer`] owns two decisions:
//!
//! 1. **Scheduling**: an `Arm` whose signature equals the armed one is a no-op;
//!    a new signature resets the lifecycle flags and yields exactly one effect
//!    that calls the data provider and feeds back a `Settled` action.
//! 2. **Reconciliation**: `StoreRead` folds the store's value in through
//!    [`merge`]; `Settled` updates only the call flags.
//!
//! Every in-flight call is tagged with the signature it was issued for. A
//! settlement whose tag no longer matches the armed signature is stale and is
//! dropped, so a superseded call can never overwrite the flags of the current
//! one.

use crate::descriptor::RequestDescriptor;
use crate::effect::Effect;
use crate::lifecycle::{ExternalSnapshot, LifecycleState, Phase, merge};
use crate::provider::{DataProvider, OperationError, ProviderRequest};
use crate::reducer::Reducer;
use smallvec::{SmallVec, smallvec};
use std::sync::Arc;

/// Inputs of the lifecycle state machine
#[derive(Debug, Clone)]
pub enum BridgeAction {
    /// The caller requested `descriptor`
    Arm(RequestDescriptor),

    /// The store reader observed a new value for the armed request
    StoreRead(ExternalSnapshot),

    /// A provider call finished
    Settled {
        /// Signature of the descriptor the call was issued for
        signature: String,
        /// Whether the call resolved; the payload is deliberately dropped
        outcome: Result<(), OperationError>,
    },
}

/// State of one bridge instance
#[derive(Debug, Clone, Default)]
pub struct BridgeState {
    /// What callers observe
    pub lifecycle: LifecycleState,
    /// Descriptor of the latest distinct request
    pub armed: Option<RequestDescriptor>,
    /// Signature of `armed`
    pub signature: Option<String>,
    /// Provider calls issued so far
    pub invocations: u64,
    /// Settlements dropped because their request was superseded
    pub stale_settlements: u64,
}

impl BridgeState {
    /// Coarse phase, `Idle` until something is armed
    #[must_use]
    pub const fn phase(&self) -> Phase {
        if self.armed.is_none() {
            Phase::Idle
        } else {
            self.lifecycle.phase()
        }
    }

    /// Whether `signature` belongs to the armed request
    #[must_use]
    pub fn is_current(&self, signature: &str) -> bool {
        self.signature.as_deref() == Some(signature)
    }
}

/// Injected dependencies of the lifecycle reducer
#[derive(Clone)]
pub struct BridgeEnvironment {
    /// Executor of data operations
    pub provider: Arc<dyn DataProvider>,
}

impl BridgeEnvironment {
    /// Environment backed by `provider`
    #[must_use]
    pub fn new(provider: Arc<dyn DataProvider>) -> Self {
        Self { provider }
    }
}

impl std::fmt::Debug for BridgeEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeEnvironment").finish_non_exhaustive()
    }
}

/// Lifecycle reducer
#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeReducer;

impl BridgeReducer {
    fn invoke(
        descriptor: &RequestDescriptor,
        signature: String,
        env: &BridgeEnvironment,
    ) -> Effect<BridgeAction> {
        let provider = Arc::clone(&env.provider);
        let request = ProviderRequest::from_descriptor(descriptor);

        Effect::Future(Box::pin(async move {
            let operation = request.operation.clone();
            let outcome = provider.invoke(request).await.map(|_response| ());
            match &outcome {
                Ok(()) => tracing::debug!(%operation, "provider call resolved"),
                Err(error) => tracing::warn!(%operation, %error, "provider call rejected"),
            }
            Some(BridgeAction::Settled { signature, outcome })
        }))
    }
}

impl Reducer for BridgeReducer {
    type State = BridgeState;
    type Action = BridgeAction;
    type Environment = BridgeEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            BridgeAction::Arm(descriptor) => {
                let signature = descriptor.signature();
                if state.is_current(&signature) {
                    tracing::trace!(%signature, "request unchanged, not re-invoking");
                    return smallvec![Effect::None];
                }

                tracing::debug!(
                    operation = %descriptor.operation(),
                    resource = descriptor.resource(),
                    "arming request"
                );
                let effect = Self::invoke(&descriptor, signature.clone(), env);
                state.lifecycle = state.lifecycle.armed();
                state.armed = Some(descriptor);
                state.signature = Some(signature);
                state.invocations += 1;
                smallvec![effect]
            },
            BridgeAction::StoreRead(external) => {
                state.lifecycle = merge(&state.lifecycle, &external);
                smallvec![Effect::None]
            },
            BridgeAction::Settled { signature, outcome } => {
                if !state.is_current(&signature) {
                    state.stale_settlements += 1;
                    tracing::debug!(%signature, "dropping stale settlement");
                    return smallvec![Effect::None];
                }

                state.lifecycle = match outcome {
                    Ok(()) => state.lifecycle.succeeded(),
                    Err(error) => state.lifecycle.failed(error),
                };
                smallvec![Effect::None]
            },
        }
    }
}
