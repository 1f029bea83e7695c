//! Provider-native attribute values.
//!
//! The durable provider stores items as maps of typed attribute values. This
//! module converts JSON values to attributes and back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::store::{StoreError, StoreResult};

/// A stored item: attribute name -> value.
pub type Item = BTreeMap<String, AttributeValue>;

/// Item attribute holding the record key.
pub const KEY_ATTR: &str = "key";
/// Item attribute holding the JSON payload.
pub const JSON_ATTR: &str = "rawJson";
/// Item attribute holding the string list.
pub const STR_LIST_ATTR: &str = "strList";

/// A typed attribute value.
///
/// Serialized with single-letter type tags, e.g. `{"S": "abc"}` or
/// `{"N": "42"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    #[serde(rename = "S")]
    S(String),
    /// Numbers travel as their decimal text.
    #[serde(rename = "N")]
    N(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    #[serde(rename = "L")]
    L(Vec<AttributeValue>),
    #[serde(rename = "M")]
    M(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    /// Short type tag, for error messages.
    pub fn type_tag(&self) -> &'static str {
        match self {
            AttributeValue::S(_) => "S",
            AttributeValue::N(_) => "N",
            AttributeValue::Bool(_) => "BOOL",
            AttributeValue::Null(_) => "NULL",
            AttributeValue::L(_) => "L",
            AttributeValue::M(_) => "M",
        }
    }

    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_m(&self) -> Option<&BTreeMap<String, AttributeValue>> {
        match self {
            AttributeValue::M(m) => Some(m),
            _ => None,
        }
    }
}

/// Convert a JSON value to an attribute value.
pub fn to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(items) => AttributeValue::L(items.iter().map(to_attribute).collect()),
        Value::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| (k.clone(), to_attribute(v)))
                .collect(),
        ),
    }
}

/// Convert a list of strings to an `L` of `S` attributes.
pub fn string_list(items: &[String]) -> AttributeValue {
    AttributeValue::L(items.iter().cloned().map(AttributeValue::S).collect())
}

/// Convert an attribute value back to JSON.
pub fn from_attribute(attr: &AttributeValue) -> StoreResult<Value> {
    Ok(match attr {
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => Value::Number(parse_number(n)?),
        AttributeValue::L(items) => {
            Value::Array(items.iter().map(from_attribute).collect::<StoreResult<_>>()?)
        }
        AttributeValue::M(map) => {
            let mut object = Map::with_capacity(map.len());
            for (k, v) in map {
                object.insert(k.clone(), from_attribute(v)?);
            }
            Value::Object(object)
        }
    })
}

/// Convert an `L` of `S` attributes back to strings.
pub fn from_string_list(attr: &AttributeValue) -> StoreResult<Vec<String>> {
    match attr {
        AttributeValue::L(items) => items
            .iter()
            .map(|item| {
                item.as_s().map(str::to_string).ok_or_else(|| StoreError::Decode {
                    key: None,
                    reason: format!("expected a string list element, found {}", item.type_tag()),
                })
            })
            .collect(),
        other => Err(StoreError::Decode {
            key: None,
            reason: format!("expected a string list, found {}", other.type_tag()),
        }),
    }
}

fn parse_number(text: &str) -> StoreResult<Number> {
    serde_json::from_str::<Number>(text).map_err(|_| StoreError::Decode {
        key: None,
        reason: format!("invalid number attribute '{}'", text),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_document() {
        let doc = json!({
            "name": "Alice",
            "age": 30,
            "score": -1.5,
            "tags": ["a", "b"],
            "address": {"city": "Paris", "zip": null},
            "active": true
        });

        let attr = to_attribute(&doc);
        let map = attr.as_m().unwrap();
        assert_eq!(map["age"], AttributeValue::N("30".into()));
        assert_eq!(map["address"].as_m().unwrap()["zip"], AttributeValue::Null(true));

        assert_eq!(from_attribute(&attr).unwrap(), doc);
    }

    #[test]
    fn test_wire_format() {
        let attr = to_attribute(&json!({"n": 7}));
        let text = serde_json::to_string(&attr).unwrap();
        assert_eq!(text, r#"{"M":{"n":{"N":"7"}}}"#);
    }

    #[test]
    fn test_invalid_number() {
        let result = from_attribute(&AttributeValue::N("seven".into()));
        assert!(matches!(result, Err(StoreError::Decode { .. })));
    }

    #[test]
    fn test_string_list() {
        let items = vec!["x".to_string(), "y".to_string()];
        let attr = string_list(&items);
        assert_eq!(from_string_list(&attr).unwrap(), items);

        let mixed = AttributeValue::L(vec![AttributeValue::S("x".into()), AttributeValue::Bool(true)]);
        assert!(from_string_list(&mixed).is_err());
        assert!(from_string_list(&AttributeValue::S("x".into())).is_err());
    }
}
