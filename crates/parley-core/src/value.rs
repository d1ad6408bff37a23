//! Tagged session values.
//!
//! A session's data bag holds [`SessionValue`]s rather than raw JSON so that
//! handlers get a closed set of shapes to match on. The serialized form is
//! untagged and maps one-to-one onto JSON: `{"key1": 10}` stores
//! `Int(10)` under `key1`.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;

/// Key/value data attached to a session.
pub type DataBag = BTreeMap<String, SessionValue>;

/// Errors converting JSON into session values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValueError {
    /// Unsigned integer that does not fit in `i64`.
    #[error("number {0} does not fit in a signed 64-bit integer")]
    IntegerOutOfRange(u64),
    /// Expected a JSON object at the top level.
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// A single value stored in a session data bag.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SessionValue {
    /// JSON `null`.
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Ordered list of values.
    List(Vec<SessionValue>),
    /// Nested map, ordered by key.
    Map(BTreeMap<String, SessionValue>),
}

impl SessionValue {
    /// Nesting depth: scalars are 1, each list/map level adds one.
    pub fn depth(&self) -> usize {
        match self {
            Self::List(items) => 1 + items.iter().map(Self::depth).max().unwrap_or(0),
            Self::Map(entries) => 1 + entries.values().map(Self::depth).max().unwrap_or(0),
            _ => 1,
        }
    }

    /// Whether every float in this value (recursively) is finite.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Float(f) => f.is_finite(),
            Self::List(items) => items.iter().all(Self::is_finite),
            Self::Map(entries) => entries.values().all(Self::is_finite),
            _ => true,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Convert to a JSON value. Non-finite floats become `null`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Number((*i).into()),
            Self::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Self::Text(s) => Value::String(s.clone()),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl TryFrom<Value> for SessionValue {
    type Error = ValueError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(u) = n.as_u64() {
                    return Err(ValueError::IntegerOutOfRange(u));
                } else {
                    // serde_json numbers that are neither i64 nor u64 are finite f64
                    Self::Float(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => Self::Text(s),
            Value::Array(items) => Self::List(
                items
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| Self::try_from(v).map(|v| (k, v)))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

impl<'de> Deserialize<'de> for SessionValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::try_from(value).map_err(serde::de::Error::custom)
    }
}

impl From<SessionValue> for Value {
    fn from(value: SessionValue) -> Self {
        value.to_json()
    }
}

impl From<bool> for SessionValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for SessionValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for SessionValue {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for SessionValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for SessionValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for SessionValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Convert a JSON object into a data bag.
pub fn bag_from_json(value: Value) -> Result<DataBag, ValueError> {
    match value {
        Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| SessionValue::try_from(v).map(|v| (k, v)))
            .collect(),
        Value::Null => Err(ValueError::NotAnObject("null")),
        Value::Bool(_) => Err(ValueError::NotAnObject("bool")),
        Value::Number(_) => Err(ValueError::NotAnObject("number")),
        Value::String(_) => Err(ValueError::NotAnObject("string")),
        Value::Array(_) => Err(ValueError::NotAnObject("array")),
    }
}

/// Render a data bag as a JSON object.
pub fn bag_to_json(bag: &DataBag) -> Value {
    Value::Object(bag.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
}
