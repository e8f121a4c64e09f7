//! Resource - Representing resources and their state

use std::collections::HashMap;

/// Unique identifier for a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    /// Resource type (e.g., "cce_cluster", "cts_tracker")
    pub resource_type: String,
    /// Resource name (the local name chosen by the caller)
    pub name: String,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

/// Attribute value of a resource
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Returns true for the zero value of the variant ("", 0, false, empty list or map).
    ///
    /// Optional attributes holding a zero value are treated as unset when building
    /// request bodies.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::String(s) => s.is_empty(),
            Value::Int(i) => *i == 0,
            Value::Float(f) => *f == 0.0,
            Value::Bool(b) => !*b,
            Value::List(items) => items.is_empty(),
            Value::Map(map) => map.is_empty(),
        }
    }

    /// Convert a JSON value into an attribute value. JSON null has no attribute form.
    pub fn from_json(value: &serde_json::Value) -> Option<Value> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(Value::String(s.clone())),
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Value::Int(i))
                } else {
                    n.as_f64().map(Value::Float)
                }
            }
            serde_json::Value::Array(arr) => {
                Some(Value::List(arr.iter().filter_map(Value::from_json).collect()))
            }
            serde_json::Value::Object(obj) => Some(Value::Map(
                obj.iter()
                    .filter_map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
                    .collect(),
            )),
        }
    }

    /// Convert an attribute value into JSON
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::List(items.into_iter().map(Value::String).collect())
    }
}

impl From<HashMap<String, String>> for Value {
    fn from(map: HashMap<String, String>) -> Self {
        Value::Map(map.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
    }
}

/// Attribute map shared by desired resources and observed state
pub type Attributes = HashMap<String, Value>;

/// Typed lookups over an attribute map
///
/// The `get_*` accessors skip zero values, so an optional attribute set to ""
/// reads the same as one that was never set.
pub trait AttributeMap {
    fn get_value(&self, key: &str) -> Option<&Value>;

    fn get_str(&self, key: &str) -> Option<&str> {
        self.get_value(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// String attribute, or "" when unset
    fn str_or_empty(&self, key: &str) -> &str {
        self.get_str(key).unwrap_or("")
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        self.get_value(key).and_then(Value::as_int).filter(|i| *i != 0)
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_value(key).and_then(Value::as_bool)
    }

    /// Boolean attribute, or false when unset
    fn flag(&self, key: &str) -> bool {
        self.get_bool(key).unwrap_or(false)
    }

    fn get_list(&self, key: &str) -> Option<&[Value]> {
        self.get_value(key)
            .and_then(Value::as_list)
            .filter(|l| !l.is_empty())
    }

    fn get_map(&self, key: &str) -> Option<&HashMap<String, Value>> {
        self.get_value(key)
            .and_then(Value::as_map)
            .filter(|m| !m.is_empty())
    }

    /// List of strings; non-string items are skipped
    fn string_list(&self, key: &str) -> Vec<String> {
        self.get_list(key)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Map of strings; non-string values are skipped
    fn string_map(&self, key: &str) -> HashMap<String, String> {
        self.get_map(key)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The single element of a one-item block (a list holding one map)
    fn block(&self, key: &str) -> Option<&HashMap<String, Value>> {
        self.get_list(key)
            .and_then(|items| items.first())
            .and_then(Value::as_map)
    }

    /// Every element of a repeated block
    fn blocks(&self, key: &str) -> Vec<&HashMap<String, Value>> {
        self.get_list(key)
            .map(|items| items.iter().filter_map(Value::as_map).collect())
            .unwrap_or_default()
    }
}

impl AttributeMap for HashMap<String, Value> {
    fn get_value(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }
}

/// Desired state declared by the caller
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub attributes: Attributes,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(resource_type, name),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Current state fetched from actual infrastructure
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub id: ResourceId,
    /// Cloud-side identifier (e.g., a cluster UID or a node ID)
    pub identifier: Option<String>,
    pub attributes: Attributes,
    /// Whether this state exists
    pub exists: bool,
}

impl State {
    pub fn not_found(id: ResourceId) -> Self {
        Self {
            id,
            identifier: None,
            attributes: HashMap::new(),
            exists: false,
        }
    }

    pub fn existing(id: ResourceId, attributes: Attributes) -> Self {
        Self {
            id,
            identifier: None,
            attributes,
            exists: true,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_conversion_drops_nulls() {
        let value = Value::from_json(&json!({"name": "demo", "alias": null, "count": 3}));
        let map = value.as_ref().and_then(Value::as_map).unwrap();
        assert_eq!(map.get("name"), Some(&Value::String("demo".to_string())));
        assert_eq!(map.get("count"), Some(&Value::Int(3)));
        assert!(!map.contains_key("alias"));
    }

    #[test]
    fn json_conversion_keeps_floats() {
        assert_eq!(Value::from_json(&json!(0.5)), Some(Value::Float(0.5)));
        assert_eq!(Value::Float(0.5).to_json(), json!(0.5));
    }

    #[test]
    fn accessors_skip_zero_values() {
        let attrs: Attributes = [
            ("empty".to_string(), Value::from("")),
            ("name".to_string(), Value::from("cluster")),
            ("count".to_string(), Value::Int(0)),
        ]
        .into_iter()
        .collect();

        assert_eq!(attrs.get_str("empty"), None);
        assert_eq!(attrs.get_str("name"), Some("cluster"));
        assert_eq!(attrs.get_int("count"), None);
        assert_eq!(attrs.str_or_empty("missing"), "");
    }

    #[test]
    fn block_returns_first_map() {
        let mut inner = HashMap::new();
        inner.insert("size".to_string(), Value::Int(40));
        let attrs: Attributes = [(
            "root_volume".to_string(),
            Value::List(vec![Value::Map(inner)]),
        )]
        .into_iter()
        .collect();

        let block = attrs.block("root_volume").unwrap();
        assert_eq!(block.get_int("size"), Some(40));
        assert!(attrs.block("data_volumes").is_none());
    }
}
