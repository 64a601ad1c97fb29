//! Native structured values exchanged between application logic and the store codec.
//!
//! `StructuredValue` is a closed sum type: exactly six kinds are representable.
//! Anything else coming from a dynamic source (JSON `null`, integers outside the
//! signed 64-bit range) is rejected with [`UnsupportedValueKind`] instead of being
//! coerced to a neighbouring kind.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// A record of named fields. Key order carries no meaning.
pub type Record = BTreeMap<String, StructuredValue>;

/// A dynamically-kinded recursive value.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredValue {
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Sequence(Vec<StructuredValue>),
    Record(Record),
}

/// Raised when a foreign value has no `StructuredValue` counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported value kind `{kind}` at `{path}`")]
pub struct UnsupportedValueKind {
    /// Dotted/indexed location of the offending value (`meta.tags[2]`), empty at the root.
    pub path: String,
    /// Human-readable name of the rejected kind.
    pub kind: &'static str,
}

impl StructuredValue {
    /// Name of this value's kind, as used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            StructuredValue::String(_) => "string",
            StructuredValue::Integer(_) => "integer",
            StructuredValue::Double(_) => "double",
            StructuredValue::Boolean(_) => "boolean",
            StructuredValue::Sequence(_) => "sequence",
            StructuredValue::Record(_) => "record",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StructuredValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StructuredValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view: integers widen to `f64`, doubles pass through.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StructuredValue::Integer(i) => Some(*i as f64),
            StructuredValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StructuredValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[StructuredValue]> {
        match self {
            StructuredValue::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            StructuredValue::Record(fields) => Some(fields),
            _ => None,
        }
    }

    /// Convert a JSON value, reporting the first unsupported node.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, UnsupportedValueKind> {
        from_json_at(value, &mut String::new())
    }

    /// Convert a JSON object into a record, reporting the first unsupported field.
    pub fn record_from_json(
        object: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Record, UnsupportedValueKind> {
        let mut path = String::new();
        record_from_json_at(object, &mut path)
    }

    /// Convert into plain JSON. Non-finite doubles become `null`, which is the
    /// only lossy case on this path.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            StructuredValue::String(s) => serde_json::Value::String(s.clone()),
            StructuredValue::Integer(i) => serde_json::Value::from(*i),
            StructuredValue::Double(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            StructuredValue::Boolean(b) => serde_json::Value::Bool(*b),
            StructuredValue::Sequence(items) => {
                serde_json::Value::Array(items.iter().map(StructuredValue::to_json).collect())
            }
            StructuredValue::Record(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

fn from_json_at(
    value: &serde_json::Value,
    path: &mut String,
) -> Result<StructuredValue, UnsupportedValueKind> {
    match value {
        serde_json::Value::Null => Err(UnsupportedValueKind {
            path: path.clone(),
            kind: "null",
        }),
        serde_json::Value::Bool(b) => Ok(StructuredValue::Boolean(*b)),
        serde_json::Value::String(s) => Ok(StructuredValue::String(s.clone())),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(StructuredValue::Integer(i))
            } else if n.is_u64() {
                Err(UnsupportedValueKind {
                    path: path.clone(),
                    kind: "unsigned integer above i64::MAX",
                })
            } else {
                n.as_f64()
                    .map(StructuredValue::Double)
                    .ok_or_else(|| UnsupportedValueKind {
                        path: path.clone(),
                        kind: "number",
                    })
            }
        }
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let mark = path.len();
                path.push_str(&format!("[{index}]"));
                let converted = from_json_at(item, path);
                path.truncate(mark);
                out.push(converted?);
            }
            Ok(StructuredValue::Sequence(out))
        }
        serde_json::Value::Object(object) => {
            record_from_json_at(object, path).map(StructuredValue::Record)
        }
    }
}

fn record_from_json_at(
    object: &serde_json::Map<String, serde_json::Value>,
    path: &mut String,
) -> Result<Record, UnsupportedValueKind> {
    let mut out = Record::new();
    for (key, item) in object {
        let mark = path.len();
        if !path.is_empty() {
            path.push('.');
        }
        path.push_str(key);
        let converted = from_json_at(item, path);
        path.truncate(mark);
        out.insert(key.clone(), converted?);
    }
    Ok(out)
}

impl fmt::Display for StructuredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl TryFrom<serde_json::Value> for StructuredValue {
    type Error = UnsupportedValueKind;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        StructuredValue::from_json(&value)
    }
}

impl From<&str> for StructuredValue {
    fn from(s: &str) -> Self {
        StructuredValue::String(s.to_string())
    }
}

impl From<String> for StructuredValue {
    fn from(s: String) -> Self {
        StructuredValue::String(s)
    }
}

impl From<i64> for StructuredValue {
    fn from(i: i64) -> Self {
        StructuredValue::Integer(i)
    }
}

impl From<i32> for StructuredValue {
    fn from(i: i32) -> Self {
        StructuredValue::Integer(i64::from(i))
    }
}

impl From<u32> for StructuredValue {
    fn from(i: u32) -> Self {
        StructuredValue::Integer(i64::from(i))
    }
}

impl From<f64> for StructuredValue {
    fn from(d: f64) -> Self {
        StructuredValue::Double(d)
    }
}

impl From<bool> for StructuredValue {
    fn from(b: bool) -> Self {
        StructuredValue::Boolean(b)
    }
}

impl From<Record> for StructuredValue {
    fn from(fields: Record) -> Self {
        StructuredValue::Record(fields)
    }
}

impl<T: Into<StructuredValue>> From<Vec<T>> for StructuredValue {
    fn from(items: Vec<T>) -> Self {
        StructuredValue::Sequence(items.into_iter().map(Into::into).collect())
    }
}
