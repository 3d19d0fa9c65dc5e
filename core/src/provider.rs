//! Outbound data-provider contract.
//!
//! The bridge never performs I/O itself. It hands a [`ProviderRequest`] to a
//! [`DataProvider`] and only looks at whether the call resolved or rejected.
//! Writing the result into the store is the provider's business (see the
//! runtime's read-through provider).

use crate::descriptor::{Operation, RequestDescriptor, RequestOptions};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors reported by a data provider
///
/// These become `LifecycleState::error`; they are never rethrown to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// The call was rejected
    #[error("{0}")]
    Rejected(String),

    /// The provider has no such operation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The requested record or resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

impl OperationError {
    /// Rejection with a free-form reason
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

/// What the bridge asks a provider to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// Operation to run
    pub operation: Operation,
    /// Resource name
    pub resource: String,
    /// Operation parameters
    pub params: Value,
    /// Passthrough options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<RequestOptions>,
}

impl ProviderRequest {
    /// Build the request for `descriptor`
    #[must_use]
    pub fn from_descriptor(descriptor: &RequestDescriptor) -> Self {
        Self {
            operation: descriptor.operation().clone(),
            resource: descriptor.resource().to_string(),
            params: descriptor.params().clone(),
            options: descriptor.options().cloned(),
        }
    }
}

/// Payload of a resolved call
///
/// The lifecycle reducer ignores it; read-through providers store it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationResponse {
    /// Returned data
    pub data: Value,
    /// Total count for list operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl OperationResponse {
    /// Response carrying `data` only
    #[must_use]
    pub const fn new(data: Value) -> Self {
        Self { data, total: None }
    }

    /// Attach a total
    #[must_use]
    pub const fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }
}

/// Result of a provider call
pub type ProviderResult = Result<OperationResponse, OperationError>;

/// Executor of data operations
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn` so the
/// provider can live behind `Arc<dyn DataProvider>` and be captured by effects.
pub trait DataProvider: Send + Sync {
    /// Run `request`
    ///
    /// Implementations may write the response into the store as a side effect
    /// before resolving.
    fn invoke(
        &self,
        request: ProviderRequest,
    ) -> Pin<Box<dyn Future<Output = ProviderResult> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejection_displays_reason_verbatim() {
        assert_eq!(OperationError::rejected("network down").to_string(), "network down");
        assert_eq!(
            OperationError::Unsupported("frobnicate".to_string()).to_string(),
            "Unsupported operation: frobnicate"
        );
    }

    #[test]
    fn request_mirrors_descriptor() {
        let descriptor = RequestDescriptor::new(Operation::GetOne, "users", json!({ "id": 7 }))
            .with_options(RequestOptions::default().with_meta(json!("m")));
        let request = ProviderRequest::from_descriptor(&descriptor);

        assert_eq!(request.operation, Operation::GetOne);
        assert_eq!(request.resource, "users");
        assert_eq!(request.params, json!({ "id": 7 }));
        assert_eq!(request.options.and_then(|o| o.meta), Some(json!("m")));
    }

    #[test]
    fn response_serializes_without_missing_total() -> Result<(), serde_json::Error> {
        let response = OperationResponse::new(json!([]));
        assert_eq!(serde_json::to_value(&response)?, json!({ "data": [] }));
        let with_total = response.with_total(3);
        assert_eq!(serde_json::to_value(&with_total)?, json!({ "data": [], "total": 3 }));
        Ok(())
    }
}
