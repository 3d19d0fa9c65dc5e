//! Request descriptors.
//!
//! A [`RequestDescriptor`] records which operation was requested, on which
//! resource, with which parameters. Descriptors are immutable once built: a new
//! request is a new descriptor. Identity is structural (see
//! [`crate::cache_key::signature`]), never by reference.
//!
//! The dispatch surface is a typed command object. [`Operation`] is a closed set
//! of data-provider verbs with an open [`Operation::Custom`] extension point,
//! and [`TrailingArgs`] implements the positional policy for the optional
//! arguments following `(resource, params)`.

use crate::cache_key;
use crate::selector::{Selector, SelectorError};
use crate::snapshot::StoreSnapshot;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Operation requested from the data provider
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Paginated, sorted, filtered list
    GetList,
    /// Single record by id
    GetOne,
    /// Several records by ids
    GetMany,
    /// Records referencing another record
    GetManyReference,
    /// Create a record
    Create,
    /// Update a record
    Update,
    /// Update several records
    UpdateMany,
    /// Delete a record
    Delete,
    /// Delete several records
    DeleteMany,
    /// Any provider-specific operation
    Custom(String),
}

impl Operation {
    /// Wire name of the operation, as the data provider knows it
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::GetList => "getList",
            Self::GetOne => "getOne",
            Self::GetMany => "getMany",
            Self::GetManyReference => "getManyReference",
            Self::Create => "create",
            Self::Update => "update",
            Self::UpdateMany => "updateMany",
            Self::Delete => "delete",
            Self::DeleteMany => "deleteMany",
            Self::Custom(name) => name,
        }
    }

    /// Map a wire name to an operation, falling back to [`Operation::Custom`]
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "getList" => Self::GetList,
            "getOne" => Self::GetOne,
            "getMany" => Self::GetMany,
            "getManyReference" => Self::GetManyReference,
            "create" => Self::Create,
            "update" => Self::Update,
            "updateMany" => Self::UpdateMany,
            "delete" => Self::Delete,
            "deleteMany" => Self::DeleteMany,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Custom operation by name
    ///
    /// Names of built-in verbs resolve to the typed variant, so
    /// `Operation::custom("getOne") == Operation::GetOne`.
    #[must_use]
    pub fn custom(name: impl AsRef<str>) -> Self {
        Self::parse(name.as_ref())
    }

    /// Whether this is a provider-specific operation
    #[must_use]
    pub const fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse(&name))
    }
}

/// Passthrough metadata attached to a request
///
/// Opaque to the bridge. It is forwarded to the data provider untouched and
/// takes part in the descriptor signature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
    /// Side-effect metadata for the provider's own dispatch path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    /// Side effects requested on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<Value>,
    /// Side effects requested on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<Value>,
}

impl RequestOptions {
    /// Set the `meta` passthrough
    #[must_use]
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Set the success side effects
    #[must_use]
    pub fn with_on_success(mut self, on_success: Value) -> Self {
        self.on_success = Some(on_success);
        self
    }

    /// Set the failure side effects
    #[must_use]
    pub fn with_on_failure(mut self, on_failure: Value) -> Self {
        self.on_failure = Some(on_failure);
        self
    }

    /// JSON form used for the descriptor signature
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(meta) = &self.meta {
            map.insert("meta".to_string(), meta.clone());
        }
        if let Some(on_success) = &self.on_success {
            map.insert("onSuccess".to_string(), on_success.clone());
        }
        if let Some(on_failure) = &self.on_failure {
            map.insert("onFailure".to_string(), on_failure.clone());
        }
        Value::Object(map)
    }
}

/// One optional argument following `(resource, params)`
#[derive(Debug, Clone)]
pub enum TrailingArg {
    /// A store selector (read selector first, then total selector)
    Selector(Selector),
    /// Passthrough options
    Options(RequestOptions),
}

impl From<Selector> for TrailingArg {
    fn from(selector: Selector) -> Self {
        Self::Selector(selector)
    }
}

impl From<RequestOptions> for TrailingArg {
    fn from(options: RequestOptions) -> Self {
        Self::Options(options)
    }
}

/// Trailing arguments resolved into their roles
///
/// Resolution is positional and permissive so that both the single-selector
/// read form `(resource, params, read, options)` and the list form
/// `(resource, params, read, total, options)` are accepted:
///
/// - selectors fill the read slot, then the total slot, in the order given;
///   further selectors are ignored
/// - the last options argument wins
///
/// A lone trailing argument is classified by its own type: a selector is the
/// read selector, anything else is options. It is never taken as a total
/// selector.
#[derive(Debug, Clone, Default)]
pub struct TrailingArgs {
    /// Selector for the data value
    pub read_selector: Option<Selector>,
    /// Selector for the total count
    pub total_selector: Option<Selector>,
    /// Passthrough options
    pub options: Option<RequestOptions>,
}

impl TrailingArgs {
    /// Resolve positional trailing arguments
    #[must_use]
    pub fn resolve<I>(args: I) -> Self
    where
        I: IntoIterator<Item = TrailingArg>,
    {
        let mut resolved = Self::default();
        for arg in args {
            match arg {
                TrailingArg::Selector(selector) => {
                    if resolved.read_selector.is_none() {
                        resolved.read_selector = Some(selector);
                    } else if resolved.total_selector.is_none() {
                        resolved.total_selector = Some(selector);
                    } else {
                        tracing::trace!("ignoring surplus trailing selector");
                    }
                },
                TrailingArg::Options(options) => resolved.options = Some(options),
            }
        }
        resolved
    }
}

/// Immutable record of a single request
#[derive(Clone)]
pub struct RequestDescriptor {
    operation: Operation,
    resource: String,
    params: Value,
    read_selector: Option<Selector>,
    total_selector: Option<Selector>,
    options: Option<RequestOptions>,
}

impl RequestDescriptor {
    /// Create a descriptor with default selectors and no options
    #[must_use]
    pub fn new(operation: Operation, resource: impl Into<String>, params: Value) -> Self {
        Self {
            operation,
            resource: resource.into(),
            params,
            read_selector: None,
            total_selector: None,
            options: None,
        }
    }

    /// Use `selector` instead of the derived-key slot for the data value
    #[must_use]
    pub fn with_read_selector(mut self, selector: Selector) -> Self {
        self.read_selector = Some(selector);
        self
    }

    /// Use `selector` instead of the constant `0` for the total
    #[must_use]
    pub fn with_total_selector(mut self, selector: Selector) -> Self {
        self.total_selector = Some(selector);
        self
    }

    /// Attach passthrough options
    #[must_use]
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Apply resolved trailing arguments; absent roles keep their current value
    #[must_use]
    pub fn with_trailing(mut self, trailing: TrailingArgs) -> Self {
        if let Some(selector) = trailing.read_selector {
            self.read_selector = Some(selector);
        }
        if let Some(selector) = trailing.total_selector {
            self.total_selector = Some(selector);
        }
        if let Some(options) = trailing.options {
            self.options = Some(options);
        }
        self
    }

    /// Requested operation
    #[must_use]
    pub const fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Resource name
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Operation parameters
    #[must_use]
    pub const fn params(&self) -> &Value {
        &self.params
    }

    /// Passthrough options
    #[must_use]
    pub const fn options(&self) -> Option<&RequestOptions> {
        self.options.as_ref()
    }

    /// Whether a caller-supplied read selector is attached
    #[must_use]
    pub const fn has_read_selector(&self) -> bool {
        self.read_selector.is_some()
    }

    /// Store key derived from `{resource, params}`
    #[must_use]
    pub fn cache_key(&self) -> String {
        cache_key::derive_key(&self.resource, &self.params)
    }

    /// Scheduler dependency key
    #[must_use]
    pub fn signature(&self) -> String {
        cache_key::signature(self)
    }

    /// Read the data value for this request from `snapshot`
    ///
    /// # Errors
    ///
    /// Returns the selector's error unchanged; selector failures are not
    /// recovered.
    pub fn read_data(&self, snapshot: &StoreSnapshot) -> Result<Option<Value>, SelectorError> {
        match &self.read_selector {
            Some(selector) => selector.select(snapshot),
            None => Ok(snapshot.slot(&self.cache_key()).cloned()),
        }
    }

    /// Read the total for this request from `snapshot`
    ///
    /// # Errors
    ///
    /// Returns the selector's error, or [`SelectorError::NotACount`] when the
    /// selector yields something other than a non-negative integer.
    pub fn read_total(&self, snapshot: &StoreSnapshot) -> Result<u64, SelectorError> {
        match &self.total_selector {
            Some(selector) => selector.select_count(snapshot),
            None => Ok(0),
        }
    }
}

impl PartialEq for RequestDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.operation == other.operation
            && self.resource == other.resource
            && self.params == other.params
            && self.options == other.options
    }
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("operation", &self.operation)
            .field("resource", &self.resource)
            .field("params", &self.params)
            .field("read_selector", &self.read_selector.is_some())
            .field("total_selector", &self.total_selector.is_some())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operation_names_round_trip() {
        for op in [
            Operation::GetList,
            Operation::GetOne,
            Operation::GetMany,
            Operation::GetManyReference,
            Operation::Create,
            Operation::Update,
            Operation::UpdateMany,
            Operation::Delete,
            Operation::DeleteMany,
        ] {
            assert_eq!(Operation::parse(op.name()), op);
            assert!(!op.is_custom());
        }
    }

    #[test]
    fn custom_operation_keeps_its_name() {
        let op = Operation::custom("publishAll");
        assert!(op.is_custom());
        assert_eq!(op.to_string(), "publishAll");
        assert_eq!(Operation::custom("getOne"), Operation::GetOne);
    }

    #[test]
    fn operation_serializes_as_wire_name() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_value(Operation::GetManyReference)?, json!("getManyReference"));
        let parsed: Operation = serde_json::from_value(json!("archive"))?;
        assert_eq!(parsed, Operation::Custom("archive".to_string()));
        Ok(())
    }

    #[test]
    fn single_selector_argument_is_the_read_selector() {
        let trailing = TrailingArgs::resolve([TrailingArg::from(Selector::constant(json!(1)))]);
        assert!(trailing.read_selector.is_some());
        assert!(trailing.total_selector.is_none());
        assert!(trailing.options.is_none());
    }

    #[test]
    fn single_options_argument_is_options() {
        let trailing = TrailingArgs::resolve([TrailingArg::from(
            RequestOptions::default().with_meta(json!("m")),
        )]);
        assert!(trailing.read_selector.is_none());
        assert!(trailing.total_selector.is_none());
        assert_eq!(trailing.options.and_then(|o| o.meta), Some(json!("m")));
    }

    #[test]
    fn list_form_fills_read_then_total_then_options() {
        let trailing = TrailingArgs::resolve([
            TrailingArg::from(Selector::constant(json!([]))),
            TrailingArg::from(Selector::constant(json!(4))),
            TrailingArg::from(RequestOptions::default()),
        ]);
        assert!(trailing.read_selector.is_some());
        assert!(trailing.total_selector.is_some());
        assert!(trailing.options.is_some());
    }

    #[test]
    fn last_options_argument_wins() {
        let trailing = TrailingArgs::resolve([
            TrailingArg::from(RequestOptions::default().with_meta(json!(1))),
            TrailingArg::from(RequestOptions::default().with_meta(json!(2))),
        ]);
        assert_eq!(trailing.options.and_then(|o| o.meta), Some(json!(2)));
    }

    #[test]
    fn default_selectors_read_slot_and_zero_total() -> Result<(), SelectorError> {
        let descriptor = RequestDescriptor::new(Operation::GetOne, "users", json!({ "id": 7 }));
        let snapshot = StoreSnapshot::new()
            .with_slot(descriptor.cache_key(), json!({ "id": 7, "name": "Ann" }))
            .with_total(descriptor.cache_key(), 12);

        assert_eq!(
            descriptor.read_data(&snapshot)?,
            Some(json!({ "id": 7, "name": "Ann" }))
        );
        assert_eq!(descriptor.read_total(&snapshot)?, 0);
        Ok(())
    }

    #[test]
    fn equality_ignores_selectors() {
        let left = RequestDescriptor::new(Operation::GetList, "posts", json!({ "page": 1 }));
        let right = left.clone().with_read_selector(Selector::constant(json!(null)));
        assert_eq!(left, right);
        assert_ne!(
            left,
            RequestDescriptor::new(Operation::GetList, "posts", json!({ "page": 2 }))
        );
    }

    #[test]
    fn with_trailing_keeps_unset_roles() {
        let descriptor = RequestDescriptor::new(Operation::GetList, "posts", json!({}))
            .with_options(RequestOptions::default().with_meta(json!("keep")))
            .with_trailing(TrailingArgs::resolve([TrailingArg::from(Selector::constant(
                json!([]),
            ))]));
        assert!(descriptor.has_read_selector());
        assert_eq!(
            descriptor.options().and_then(|o| o.meta.clone()),
            Some(json!("keep"))
        );
    }
}
