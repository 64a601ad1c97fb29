//! Tagged value codec for the document store's REST wire format.
//!
//! Wire format (one tag per node):
//! ```text
//! "abc"          ──► {"stringValue": "abc"}
//! 42             ──► {"integerValue": "42"}        (decimal string)
//! 1.5            ──► {"doubleValue": 1.5}
//! true           ──► {"booleanValue": true}
//! [a, b]         ──► {"arrayValue": {"values": [<a>, <b>]}}
//! {k: v}         ──► {"mapValue": {"fields": {"k": <v>}}}
//! ```
//!
//! Encoding is strict: foreign values with no [`StructuredValue`] counterpart are
//! rejected with [`UnsupportedValueKind`]. Decoding is tolerant: a node with zero or
//! several recognized tags or a wrongly-typed payload is treated as an absent field
//! and logged at `debug`.
//!
//! The store answers an empty array with `{"arrayValue": {}}` and an empty map with
//! `{"mapValue": {}}`; those decode as an empty sequence / record so empty
//! containers survive a write and read back.

use std::collections::BTreeMap;

use neurolink_core::{Record, StructuredValue, UnsupportedValueKind};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

pub const STRING_TAG: &str = "stringValue";
pub const INTEGER_TAG: &str = "integerValue";
pub const DOUBLE_TAG: &str = "doubleValue";
pub const BOOLEAN_TAG: &str = "booleanValue";
pub const ARRAY_TAG: &str = "arrayValue";
pub const MAP_TAG: &str = "mapValue";

const TAGS: [&str; 6] = [STRING_TAG, INTEGER_TAG, DOUBLE_TAG, BOOLEAN_TAG, ARRAY_TAG, MAP_TAG];

const ARRAY_VALUES: &str = "values";
const MAP_FIELDS: &str = "fields";

/// A field record in wire form.
pub type WireFields = BTreeMap<String, WireValue>;

/// A store-tagged value node.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Array(Vec<WireValue>),
    Map(WireFields),
}

impl WireValue {
    /// The single tag this node carries on the wire.
    pub fn tag(&self) -> &'static str {
        match self {
            WireValue::String(_) => STRING_TAG,
            WireValue::Integer(_) => INTEGER_TAG,
            WireValue::Double(_) => DOUBLE_TAG,
            WireValue::Boolean(_) => BOOLEAN_TAG,
            WireValue::Array(_) => ARRAY_TAG,
            WireValue::Map(_) => MAP_TAG,
        }
    }

    /// Render as wire JSON.
    pub fn to_json(&self) -> Value {
        let payload = match self {
            WireValue::String(s) => Value::String(s.clone()),
            WireValue::Integer(i) => Value::String(i.to_string()),
            WireValue::Double(d) => double_to_json(*d),
            WireValue::Boolean(b) => Value::Bool(*b),
            WireValue::Array(items) => {
                let mut container = Map::new();
                container.insert(
                    ARRAY_VALUES.to_string(),
                    Value::Array(items.iter().map(WireValue::to_json).collect()),
                );
                Value::Object(container)
            }
            WireValue::Map(fields) => {
                let mut container = Map::new();
                container.insert(MAP_FIELDS.to_string(), Value::Object(fields_to_json(fields)));
                Value::Object(container)
            }
        };
        let mut node = Map::with_capacity(1);
        node.insert(self.tag().to_string(), payload);
        Value::Object(node)
    }

    /// Parse one wire node. Returns `None` for any shape this codec does not
    /// recognize; the caller treats that as "field not present".
    pub fn from_json(node: &Value) -> Option<WireValue> {
        let object = node.as_object()?;
        let mut present = TAGS.iter().filter(|tag| object.contains_key(**tag));
        let tag = present.next()?;
        if present.next().is_some() {
            log::debug!("wire node carries more than one tag: {:?}", object.keys().collect::<Vec<_>>());
            return None;
        }
        let payload = &object[*tag];
        match *tag {
            STRING_TAG => payload.as_str().map(|s| WireValue::String(s.to_string())),
            INTEGER_TAG => parse_integer(payload).map(WireValue::Integer),
            DOUBLE_TAG => parse_double(payload).map(WireValue::Double),
            BOOLEAN_TAG => payload.as_bool().map(WireValue::Boolean),
            // The store omits `values` / `fields` on empty containers.
            ARRAY_TAG => match payload.as_object()?.get(ARRAY_VALUES) {
                None => Some(WireValue::Array(Vec::new())),
                Some(values) => Some(WireValue::Array(
                    values.as_array()?.iter().filter_map(WireValue::from_json).collect(),
                )),
            },
            MAP_TAG => match payload.as_object()?.get(MAP_FIELDS) {
                None => Some(WireValue::Map(WireFields::new())),
                Some(fields) => Some(WireValue::Map(fields_from_json(fields.as_object()?))),
            },
            _ => None,
        }
    }
}

impl Serialize for WireValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            WireValue::String(s) => map.serialize_entry(STRING_TAG, s)?,
            WireValue::Integer(i) => map.serialize_entry(INTEGER_TAG, &i.to_string())?,
            WireValue::Double(d) => map.serialize_entry(DOUBLE_TAG, &double_to_json(*d))?,
            WireValue::Boolean(b) => map.serialize_entry(BOOLEAN_TAG, b)?,
            WireValue::Array(items) => {
                map.serialize_entry(ARRAY_TAG, &ArrayContainer { values: items })?
            }
            WireValue::Map(fields) => map.serialize_entry(MAP_TAG, &MapContainer { fields })?,
        }
        map.end()
    }
}

#[derive(serde::Serialize)]
struct ArrayContainer<'a> {
    values: &'a [WireValue],
}

#[derive(serde::Serialize)]
struct MapContainer<'a> {
    fields: &'a WireFields,
}

/// Non-finite doubles travel as the strings the store uses for them.
fn double_to_json(d: f64) -> Value {
    match serde_json::Number::from_f64(d) {
        Some(n) => Value::Number(n),
        None if d.is_nan() => Value::String("NaN".into()),
        None if d > 0.0 => Value::String("Infinity".into()),
        None => Value::String("-Infinity".into()),
    }
}

fn parse_integer(payload: &Value) -> Option<i64> {
    match payload {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

fn parse_double(payload: &Value) -> Option<f64> {
    match payload {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => match s.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            _ => None,
        },
        _ => None,
    }
}

/// Render a wire field record as a JSON object.
pub fn fields_to_json(fields: &WireFields) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), value.to_json()))
        .collect()
}

/// Parse a JSON `fields` object, dropping entries that are not valid wire nodes.
pub fn fields_from_json(object: &Map<String, Value>) -> WireFields {
    object
        .iter()
        .filter_map(|(key, node)| match WireValue::from_json(node) {
            Some(value) => Some((key.clone(), value)),
            None => {
                log::debug!("dropping unrecognized wire field `{key}`");
                None
            }
        })
        .collect()
}

// ─── StructuredValue ⇄ WireValue ─────────────────────────────────────────────

/// Encode a native value. Total: every `StructuredValue` kind has a tag.
pub fn encode(value: &StructuredValue) -> WireValue {
    match value {
        StructuredValue::String(s) => WireValue::String(s.clone()),
        StructuredValue::Integer(i) => WireValue::Integer(*i),
        StructuredValue::Double(d) => WireValue::Double(*d),
        StructuredValue::Boolean(b) => WireValue::Boolean(*b),
        StructuredValue::Sequence(items) => WireValue::Array(items.iter().map(encode).collect()),
        StructuredValue::Record(fields) => WireValue::Map(encode_fields(fields)),
    }
}

/// Decode a wire node back into a native value.
pub fn decode(value: &WireValue) -> StructuredValue {
    match value {
        WireValue::String(s) => StructuredValue::String(s.clone()),
        WireValue::Integer(i) => StructuredValue::Integer(*i),
        WireValue::Double(d) => StructuredValue::Double(*d),
        WireValue::Boolean(b) => StructuredValue::Boolean(*b),
        WireValue::Array(items) => StructuredValue::Sequence(items.iter().map(decode).collect()),
        WireValue::Map(fields) => StructuredValue::Record(decode_fields(fields)),
    }
}

pub fn encode_fields(record: &Record) -> WireFields {
    record
        .iter()
        .map(|(key, value)| (key.clone(), encode(value)))
        .collect()
}

pub fn decode_fields(fields: &WireFields) -> Record {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), decode(value)))
        .collect()
}

/// Strict encode of a dynamic JSON value.
pub fn encode_json(value: &Value) -> Result<WireValue, UnsupportedValueKind> {
    StructuredValue::from_json(value).map(|v| encode(&v))
}

/// Strict encode of a dynamic JSON object into a field record.
pub fn encode_json_fields(object: &Map<String, Value>) -> Result<WireFields, UnsupportedValueKind> {
    StructuredValue::record_from_json(object).map(|record| encode_fields(&record))
}

/// Skip-with-warning encode: fields that cannot be represented are dropped.
pub fn encode_json_fields_lenient(object: &Map<String, Value>) -> WireFields {
    let mut out = WireFields::new();
    for (key, value) in object {
        match StructuredValue::from_json(value) {
            Ok(native) => {
                out.insert(key.clone(), encode(&native));
            }
            Err(err) => {
                let path = if err.path.is_empty() {
                    key.clone()
                } else if err.path.starts_with('[') {
                    format!("{key}{}", err.path)
                } else {
                    format!("{key}.{}", err.path)
                };
                log::warn!("skipping field `{path}`: unsupported value kind `{}`", err.kind);
            }
        }
    }
    out
}

/// Decode a raw JSON `fields` object straight into a native record.
///
/// Anything other than an object yields an empty record.
pub fn decode_fields_json(fields: &Value) -> Record {
    fields
        .as_object()
        .map(|object| decode_fields(&fields_from_json(object)))
        .unwrap_or_default()
}
