//! Proptest strategies for event names and payloads

use proptest::prelude::*;
use serde_json::{Map, Value};

/// Kebab-case command kinds such as `fetch` or `clean-old`
pub fn command_kind_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,8}(-[a-z]{1,8}){0,2}"
}

pub fn action_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of("[a-z]{1,10}")
}

/// Event names that do not start with `mamiya:`
pub fn foreign_event_name_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9:_-]{0,24}".prop_filter("must be outside the namespace", |name| {
        !name.starts_with("mamiya:")
    })
}

/// Flat JSON objects with string and number values
pub fn payload_strategy() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map(
        "[a-z]{1,6}",
        prop_oneof![
            "[a-zA-Z0-9.]{0,12}".prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
        ],
        0..5,
    )
    .prop_map(|entries| entries.into_iter().collect())
}
