//! # Filter Policies
//!
//! Structural predicates over event bodies, compiled from JSON so that
//! subscriber filters stay configuration rather than code.
//!
//! ```json
//! {"mail": {"tags": {"message_type": ["primary"]}}}
//! {"webhookEntry": [{"exists": true}]}
//! {"eventType": [{"prefix": "TEXT_"}, {"anything-but": ["TEXT_UNKNOWN"]}]}
//! ```
//!
//! Every key of a policy object must match. An array is a list of
//! alternatives for that field; a nested object descends into the event.
//! String fields holding serialized JSON objects are descended as if they
//! were objects.

use serde_json::{Map, Value};
use std::borrow::Cow;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("Filter policy must be a JSON object, got {found}")]
    NotAnObject { found: String },

    #[error("Invalid filter policy at `{path}`: {reason}")]
    InvalidPolicy { path: String, reason: String },
}

impl FilterError {
    fn invalid(path: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Equals(Value),
    Exists(bool),
    Prefix(String),
    AnythingBut(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
enum PolicyNode {
    /// Alternatives for one field; any may match
    Conditions(Vec<Condition>),
    Nested(Vec<(String, PolicyNode)>),
}

/// Compiled filter policy
#[derive(Debug, Clone, PartialEq)]
pub struct FilterPolicy {
    fields: Vec<(String, PolicyNode)>,
    source: Value,
}

impl FilterPolicy {
    pub fn compile(policy: &Value) -> Result<Self, FilterError> {
        let object = policy.as_object().ok_or_else(|| FilterError::NotAnObject {
            found: type_name(policy).to_string(),
        })?;
        Ok(Self {
            fields: compile_object(object, "")?,
            source: policy.clone(),
        })
    }

    /// Policy that matches when `path` (dot separated) exists in the event
    pub fn field_exists(path: &str) -> Self {
        let mut policy = Value::Array(vec![serde_json::json!({"exists": true})]);
        for segment in path.rsplit('.') {
            let mut map = Map::new();
            map.insert(segment.to_string(), policy);
            policy = Value::Object(map);
        }
        Self::from_trusted(policy)
    }

    /// Policy that matches when `path` (dot separated) equals `value`
    pub fn field_equals(path: &str, value: impl Into<Value>) -> Self {
        let mut policy = Value::Array(vec![value.into()]);
        for segment in path.rsplit('.') {
            let mut map = Map::new();
            map.insert(segment.to_string(), policy);
            policy = Value::Object(map);
        }
        Self::from_trusted(policy)
    }

    fn from_trusted(policy: Value) -> Self {
        let fields = policy
            .as_object()
            .map(|o| compile_object(o, ""))
            .and_then(Result::ok)
            .unwrap_or_default();
        Self {
            fields,
            source: policy,
        }
    }

    /// The JSON this policy was compiled from
    pub fn source(&self) -> &Value {
        &self.source
    }

    pub fn matches(&self, event: &Value) -> bool {
        match as_object(event) {
            Some(object) => matches_fields(&self.fields, &object),
            None => false,
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn compile_object(
    object: &Map<String, Value>,
    path: &str,
) -> Result<Vec<(String, PolicyNode)>, FilterError> {
    if object.is_empty() {
        return Err(FilterError::invalid(path, "empty object matches nothing"));
    }

    object
        .iter()
        .map(|(key, value)| {
            let path = child_path(path, key);
            let node = match value {
                Value::Object(nested) => PolicyNode::Nested(compile_object(nested, &path)?),
                Value::Array(alternatives) => {
                    if alternatives.is_empty() {
                        return Err(FilterError::invalid(&path, "empty condition list"));
                    }
                    PolicyNode::Conditions(
                        alternatives
                            .iter()
                            .map(|c| compile_condition(c, &path))
                            .collect::<Result<_, _>>()?,
                    )
                }
                other => {
                    return Err(FilterError::invalid(
                        &path,
                        format!("expected an array of conditions or an object, got {}", type_name(other)),
                    ))
                }
            };
            Ok((key.clone(), node))
        })
        .collect()
}

fn compile_condition(condition: &Value, path: &str) -> Result<Condition, FilterError> {
    let Value::Object(operator) = condition else {
        return Ok(Condition::Equals(condition.clone()));
    };

    let mut entries = operator.iter();
    let (Some((name, argument)), None) = (entries.next(), entries.next()) else {
        return Err(FilterError::invalid(path, "operator objects take exactly one key"));
    };

    match (name.as_str(), argument) {
        ("exists", Value::Bool(flag)) => Ok(Condition::Exists(*flag)),
        ("prefix", Value::String(prefix)) => Ok(Condition::Prefix(prefix.clone())),
        ("anything-but", Value::Array(values)) => Ok(Condition::AnythingBut(values.clone())),
        ("anything-but", scalar) if !scalar.is_object() => {
            Ok(Condition::AnythingBut(vec![scalar.clone()]))
        }
        (name, argument) => Err(FilterError::invalid(
            path,
            format!("unsupported operator `{name}` with {} argument", type_name(argument)),
        )),
    }
}

/// View `value` as an object, decoding string-encoded JSON objects
fn as_object(value: &Value) -> Option<Cow<'_, Map<String, Value>>> {
    match value {
        Value::Object(map) => Some(Cow::Borrowed(map)),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Some(Cow::Owned(map)),
            _ => None,
        },
        _ => None,
    }
}

fn matches_fields(fields: &[(String, PolicyNode)], event: &Map<String, Value>) -> bool {
    fields
        .iter()
        .all(|(key, node)| matches_node(node, event.get(key)))
}

fn matches_node(node: &PolicyNode, value: Option<&Value>) -> bool {
    match node {
        PolicyNode::Conditions(conditions) => conditions.iter().any(|c| matches_condition(c, value)),
        PolicyNode::Nested(fields) => match value {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(as_object)
                .any(|object| matches_fields(fields, &object)),
            Some(other) => as_object(other).is_some_and(|object| matches_fields(fields, &object)),
            // every leaf under a missing parent is absent
            None => matches_fields(fields, &Map::new()),
        },
    }
}

fn matches_condition(condition: &Condition, value: Option<&Value>) -> bool {
    match (condition, value) {
        (Condition::Exists(expected), value) => value.is_some() == *expected,
        (_, None) => false,
        (condition, Some(Value::Array(items))) => {
            items.iter().any(|item| matches_scalar(condition, item))
        }
        (condition, Some(value)) => matches_scalar(condition, value),
    }
}

fn matches_scalar(condition: &Condition, value: &Value) -> bool {
    match condition {
        Condition::Equals(expected) => value == expected,
        Condition::Prefix(prefix) => value.as_str().is_some_and(|s| s.starts_with(prefix)),
        Condition::AnythingBut(excluded) => !excluded.contains(value),
        Condition::Exists(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_equality() {
        let policy = FilterPolicy::compile(&json!({"mail": {"tags": {"message_type": ["primary"]}}})).unwrap();

        assert!(policy.matches(&json!({"mail": {"tags": {"message_type": "primary"}}})));
        assert!(policy.matches(&json!({"mail": {"tags": {"message_type": ["primary"]}}})));
        assert!(!policy.matches(&json!({"mail": {"tags": {"message_type": "bulk"}}})));
        assert!(!policy.matches(&json!({"context": {"message_type": "primary"}})));
    }

    #[test]
    fn test_existence_ignores_value() {
        let policy = FilterPolicy::compile(&json!({"webhookEntry": [{"exists": true}]})).unwrap();

        assert!(policy.matches(&json!({"webhookEntry": null})));
        assert!(policy.matches(&json!({"webhookEntry": "{}", "mail": {}})));
        assert!(!policy.matches(&json!({"other": 1})));

        let absent = FilterPolicy::compile(&json!({"mail": [{"exists": false}]})).unwrap();
        assert!(absent.matches(&json!({"context": {}})));
        assert!(!absent.matches(&json!({"mail": {}})));
    }

    #[test]
    fn test_nested_absence_matches_missing_parent() {
        let policy = FilterPolicy::compile(&json!({"mail": {"tags": [{"exists": false}]}})).unwrap();

        assert!(policy.matches(&json!({"context": {}})));
        assert!(policy.matches(&json!({"mail": {}})));
        assert!(!policy.matches(&json!({"mail": {"tags": {}}})));

        let present = FilterPolicy::compile(&json!({"mail": {"tags": [{"exists": true}]}})).unwrap();
        assert!(!present.matches(&json!({"context": {}})));
    }

    #[test]
    fn test_prefix_and_anything_but() {
        let policy = FilterPolicy::compile(&json!({
            "eventType": [{"prefix": "TEXT_"}],
            "context": {"message_type": [{"anything-but": ["bulk"]}]}
        }))
        .unwrap();

        assert!(policy.matches(&json!({"eventType": "TEXT_DELIVERED", "context": {"message_type": "primary"}})));
        assert!(!policy.matches(&json!({"eventType": "TEXT_DELIVERED", "context": {"message_type": "bulk"}})));
        assert!(!policy.matches(&json!({"eventType": "VOICE_DELIVERED", "context": {"message_type": "primary"}})));
    }

    #[test]
    fn test_string_encoded_objects_are_descended() {
        let policy = FilterPolicy::compile(&json!({"webhookEntry": {"changes": {"field": ["messages"]}}})).unwrap();
        let entry = json!({"changes": [{"field": "messages"}]}).to_string();

        assert!(policy.matches(&json!({"webhookEntry": entry})));
        assert!(!policy.matches(&json!({"webhookEntry": "not json"})));
    }

    #[test]
    fn test_helper_constructors() {
        let policy = FilterPolicy::field_equals("context.message_type", "primary");
        assert_eq!(policy.source(), &json!({"context": {"message_type": ["primary"]}}));
        assert!(FilterPolicy::field_exists("webhookEntry").matches(&json!({"webhookEntry": 1})));
    }

    #[test]
    fn test_invalid_policies_are_rejected() {
        assert!(matches!(
            FilterPolicy::compile(&json!(["primary"])),
            Err(FilterError::NotAnObject { .. })
        ));
        assert!(FilterPolicy::compile(&json!({"a": "primary"})).is_err());
        assert!(FilterPolicy::compile(&json!({"a": []})).is_err());
        assert!(FilterPolicy::compile(&json!({"a": [{"numeric": [">", 1]}]})).is_err());
        assert!(FilterPolicy::compile(&json!({"a": [{"exists": true, "prefix": "x"}]})).is_err());
    }
}
