//! Cache-key derivation.
//!
//! Two strings identify a request:
//!
//! - the **cache key** ([`derive_key`]): canonical JSON of `{resource, params}`.
//!   It names the store slot read by the default selector, so two descriptors
//!   with equal resource and params always share a slot no matter which
//!   operation or selectors they carry.
//! - the **signature** ([`signature`]): canonical JSON of
//!   `{operation, resource, params, options}`. The scheduler re-invokes the
//!   data provider only when this string changes.
//!
//! Selectors are functions and never take part in either string.

use crate::descriptor::RequestDescriptor;
use serde_json::{Map, Value};

/// Recursively rebuild `value` with object keys in sorted order.
///
/// Array order is preserved. The output serializes identically whether or not
/// `serde_json` keeps insertion order.
#[must_use]
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                if let Some(inner) = map.get(key) {
                    sorted.insert(key.clone(), canonicalize(inner));
                }
            }
            Value::Object(sorted)
        },
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Derive the store key for `{resource, params}`
///
/// Used both as the default read path and as the slot a read-through provider
/// writes into.
#[must_use]
pub fn derive_key(resource: &str, params: &Value) -> String {
    let mut map = Map::with_capacity(2);
    map.insert("params".to_string(), canonicalize(params));
    map.insert("resource".to_string(), Value::String(resource.to_string()));
    Value::Object(map).to_string()
}

/// Derive the scheduler dependency key for a descriptor
#[must_use]
pub fn signature(descriptor: &RequestDescriptor) -> String {
    let mut map = Map::with_capacity(4);
    map.insert(
        "operation".to_string(),
        Value::String(descriptor.operation().name().to_string()),
    );
    map.insert(
        "options".to_string(),
        descriptor
            .options()
            .map_or(Value::Null, |options| canonicalize(&options.to_value())),
    );
    map.insert("params".to_string(), canonicalize(descriptor.params()));
    map.insert(
        "resource".to_string(),
        Value::String(descriptor.resource().to_string()),
    );
    Value::Object(map).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Operation, RequestOptions};
    use crate::selector::Selector;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn key_ignores_object_key_order() {
        let left = derive_key("posts", &json!({ "page": 1, "perPage": 10 }));
        let right = derive_key("posts", &json!({ "perPage": 10, "page": 1 }));
        assert_eq!(left, right);
    }

    #[test]
    fn key_preserves_array_order() {
        let left = derive_key("posts", &json!({ "ids": [1, 2] }));
        let right = derive_key("posts", &json!({ "ids": [2, 1] }));
        assert_ne!(left, right);
    }

    #[test]
    fn key_distinguishes_resources() {
        let params = json!({ "id": 7 });
        assert_ne!(derive_key("users", &params), derive_key("posts", &params));
    }

    #[test]
    fn key_ignores_operation_and_selectors() {
        let one = RequestDescriptor::new(Operation::GetOne, "users", json!({ "id": 7 }))
            .with_read_selector(Selector::constant(json!("a")));
        let lookup = Operation::custom("lookup");
        let custom = RequestDescriptor::new(lookup, "users", json!({ "id": 7 }))
            .with_read_selector(Selector::constant(json!("b")));
        assert_eq!(one.cache_key(), custom.cache_key());
    }

    #[test]
    fn signature_tracks_operation_and_options() {
        let base = RequestDescriptor::new(Operation::GetList, "posts", json!({}));
        let other_op = RequestDescriptor::new(Operation::GetMany, "posts", json!({}));
        let with_options = base
            .clone()
            .with_options(RequestOptions::default().with_meta(json!({ "refresh": true })));

        assert_ne!(signature(&base), signature(&other_op));
        assert_ne!(signature(&base), signature(&with_options));
    }

    #[test]
    fn signature_ignores_selectors() {
        let plain = RequestDescriptor::new(Operation::GetList, "posts", json!({ "page": 2 }));
        let selected = plain
            .clone()
            .with_read_selector(Selector::constant(json!([])))
            .with_total_selector(Selector::constant(json!(3)));
        assert_eq!(signature(&plain), signature(&selected));
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-z]{0,6}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn equal_params_derive_equal_keys(resource in "[a-z]{1,8}", params in arb_json()) {
            let reserialized: Value = serde_json::from_str(&params.to_string())
                .unwrap_or(Value::Null);
            prop_assert_eq!(derive_key(&resource, &params), derive_key(&resource, &reserialized));
        }

        #[test]
        fn canonicalize_is_idempotent(value in arb_json()) {
            let once = canonicalize(&value);
            prop_assert_eq!(canonicalize(&once), once);
        }
    }
}
