//! Encoded search attribute payloads and their decoding into index values.
//!
//! A payload is a metadata map plus opaque data. The `encoding` metadata entry
//! says how `data` was produced:
//!
//! - `json/plain`: JSON text. Strings arrive quote-encoded (`"alex"`) and are
//!   unquoted here.
//! - `binary/plain`: raw bytes, indexed as a binary value.
//! - `binary/null`: an explicit "no value"; the attribute is left out of the
//!   document.
//!
//! An optional `type` metadata entry pins the indexed value type; without it
//! the type is inferred from the JSON value.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::FieldValue;
use crate::error::EncodingError;

pub const METADATA_ENCODING: &str = "encoding";
pub const METADATA_TYPE: &str = "type";

pub const ENCODING_JSON: &str = "json/plain";
pub const ENCODING_BINARY: &str = "binary/plain";
pub const ENCODING_NULL: &str = "binary/null";

/// One encoded search attribute value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Payload {
    pub metadata: BTreeMap<String, String>,
    #[serde(with = "crate::record::base64_bytes")]
    pub data: Vec<u8>,
}

impl Payload {
    /// JSON-encode a string, the way callers hand string attributes over.
    pub fn string(value: &str) -> Self {
        Self::json(&Value::String(value.to_string()))
    }

    pub fn int(value: i64) -> Self {
        Self::json(&Value::from(value))
    }

    pub fn double(value: f64) -> Self {
        Self::json(&Value::from(value))
    }

    pub fn boolean(value: bool) -> Self {
        Self::json(&Value::Bool(value))
    }

    pub fn keyword_list<S: AsRef<str>>(values: &[S]) -> Self {
        let items = values
            .iter()
            .map(|v| Value::String(v.as_ref().to_string()))
            .collect();
        Self::json(&Value::Array(items))
    }

    pub fn datetime(value: DateTime<Utc>) -> Self {
        Self::string(&value.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))
            .with_type(IndexedValueType::Datetime)
    }

    /// `json/plain` payload holding `value`.
    pub fn json(value: &Value) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(METADATA_ENCODING.to_string(), ENCODING_JSON.to_string());
        Self {
            metadata,
            data: value.to_string().into_bytes(),
        }
    }

    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(METADATA_ENCODING.to_string(), ENCODING_BINARY.to_string());
        Self {
            metadata,
            data: data.into(),
        }
    }

    pub fn null() -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(METADATA_ENCODING.to_string(), ENCODING_NULL.to_string());
        Self {
            metadata,
            data: Vec::new(),
        }
    }

    /// Pin the indexed value type.
    #[must_use]
    pub fn with_type(mut self, value_type: IndexedValueType) -> Self {
        self.metadata
            .insert(METADATA_TYPE.to_string(), value_type.as_str().to_string());
        self
    }

    #[must_use]
    pub fn encoding(&self) -> Option<&str> {
        self.metadata.get(METADATA_ENCODING).map(String::as_str)
    }
}

/// Declared type of a custom search attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexedValueType {
    Keyword,
    Text,
    Int,
    Double,
    Bool,
    Datetime,
    KeywordList,
}

impl IndexedValueType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Keyword => "Keyword",
            Self::Text => "Text",
            Self::Int => "Int",
            Self::Double => "Double",
            Self::Bool => "Bool",
            Self::Datetime => "Datetime",
            Self::KeywordList => "KeywordList",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Keyword" => Some(Self::Keyword),
            "Text" => Some(Self::Text),
            "Int" => Some(Self::Int),
            "Double" => Some(Self::Double),
            "Bool" => Some(Self::Bool),
            "Datetime" => Some(Self::Datetime),
            "KeywordList" => Some(Self::KeywordList),
            _ => None,
        }
    }
}

/// Decode `payload` for attribute `name`.
///
/// Returns `Ok(None)` for explicit null values; the attribute is then omitted
/// from the document rather than written as null.
pub fn decode(name: &str, payload: &Payload) -> Result<Option<FieldValue>, EncodingError> {
    let encoding = payload
        .encoding()
        .ok_or_else(|| EncodingError::MissingEncoding {
            attribute: name.to_string(),
        })?;

    let declared = match payload.metadata.get(METADATA_TYPE) {
        Some(raw) => Some(IndexedValueType::parse(raw).ok_or_else(|| {
            EncodingError::UnknownValueType {
                attribute: name.to_string(),
                value_type: raw.clone(),
            }
        })?),
        None => None,
    };

    match encoding {
        ENCODING_NULL => Ok(None),
        ENCODING_BINARY => Ok(Some(FieldValue::Bytes(payload.data.clone()))),
        ENCODING_JSON => {
            let value: Value = serde_json::from_slice(&payload.data).map_err(|source| {
                EncodingError::InvalidJson {
                    attribute: name.to_string(),
                    source,
                }
            })?;
            match declared {
                Some(value_type) => decode_typed(name, value, value_type),
                None => decode_inferred(name, value),
            }
        }
        other => Err(EncodingError::UnsupportedEncoding {
            attribute: name.to_string(),
            encoding: other.to_string(),
        }),
    }
}

fn decode_inferred(name: &str, value: Value) -> Result<Option<FieldValue>, EncodingError> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(FieldValue::Bool(b))),
        Value::String(s) => Ok(Some(FieldValue::String(s))),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Some(FieldValue::Int(i))),
            None => n
                .as_f64()
                .map(|f| Some(FieldValue::Double(f)))
                .ok_or_else(|| EncodingError::UnsupportedShape {
                    attribute: name.to_string(),
                    found: "number out of range",
                }),
        },
        Value::Array(items) => keyword_list(name, items).map(Some),
        Value::Object(_) => Err(EncodingError::UnsupportedShape {
            attribute: name.to_string(),
            found: "object",
        }),
    }
}

fn decode_typed(
    name: &str,
    value: Value,
    value_type: IndexedValueType,
) -> Result<Option<FieldValue>, EncodingError> {
    if value.is_null() {
        return Ok(None);
    }
    let mismatch = |expected: &'static str, found: &Value| EncodingError::TypeMismatch {
        attribute: name.to_string(),
        expected,
        found: json_kind(found),
    };

    let decoded = match value_type {
        IndexedValueType::Keyword | IndexedValueType::Text => match value {
            Value::String(s) => FieldValue::String(s),
            other => return Err(mismatch("string", &other)),
        },
        IndexedValueType::Int => match value.as_i64() {
            Some(i) => FieldValue::Int(i),
            None => return Err(mismatch("integer", &value)),
        },
        IndexedValueType::Double => match value.as_f64() {
            Some(f) => FieldValue::Double(f),
            None => return Err(mismatch("number", &value)),
        },
        IndexedValueType::Bool => match value {
            Value::Bool(b) => FieldValue::Bool(b),
            other => return Err(mismatch("bool", &other)),
        },
        IndexedValueType::Datetime => match value {
            Value::String(s) => match DateTime::parse_from_rfc3339(&s) {
                Ok(ts) => FieldValue::Time(ts.with_timezone(&Utc)),
                Err(_) => {
                    return Err(EncodingError::InvalidDatetime {
                        attribute: name.to_string(),
                        value: s,
                    });
                }
            },
            other => return Err(mismatch("RFC 3339 string", &other)),
        },
        IndexedValueType::KeywordList => match value {
            Value::Array(items) => keyword_list(name, items)?,
            Value::String(s) => FieldValue::KeywordList(vec![s]),
            other => return Err(mismatch("array of strings", &other)),
        },
    };
    Ok(Some(decoded))
}

fn keyword_list(name: &str, items: Vec<Value>) -> Result<FieldValue, EncodingError> {
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            other => Err(EncodingError::TypeMismatch {
                attribute: name.to_string(),
                expected: "array of strings",
                found: json_kind(&other),
            }),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(FieldValue::KeywordList)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn string_payload_is_quoted_on_the_wire_and_unquoted_on_decode() {
        let payload = Payload::string("alex");
        assert_eq!(payload.data, b"\"alex\"");
        assert_eq!(
            decode("CustomStringField", &payload).unwrap(),
            Some(FieldValue::String("alex".to_string()))
        );
    }

    #[test]
    fn inferred_scalars() {
        assert_eq!(
            decode("a", &Payload::int(-7)).unwrap(),
            Some(FieldValue::Int(-7))
        );
        assert_eq!(
            decode("a", &Payload::double(1.5)).unwrap(),
            Some(FieldValue::Double(1.5))
        );
        assert_eq!(
            decode("a", &Payload::boolean(true)).unwrap(),
            Some(FieldValue::Bool(true))
        );
        assert_eq!(
            decode("a", &Payload::keyword_list(&["x", "y"])).unwrap(),
            Some(FieldValue::KeywordList(vec!["x".into(), "y".into()]))
        );
    }

    #[test]
    fn nulls_are_omitted() {
        assert_eq!(decode("a", &Payload::null()).unwrap(), None);
        assert_eq!(decode("a", &Payload::json(&Value::Null)).unwrap(), None);
        let typed_null = Payload::json(&Value::Null).with_type(IndexedValueType::Int);
        assert_eq!(decode("a", &typed_null).unwrap(), None);
    }

    #[test]
    fn binary_payload_keeps_bytes() {
        assert_eq!(
            decode("a", &Payload::binary(vec![0u8, 1, 2])).unwrap(),
            Some(FieldValue::Bytes(vec![0, 1, 2]))
        );
    }

    #[test]
    fn datetime_payload_keeps_nanoseconds() {
        let ts = Utc.timestamp_opt(1_600_000_000, 123_456_789).unwrap();
        assert_eq!(
            decode("CustomDatetimeField", &Payload::datetime(ts)).unwrap(),
            Some(FieldValue::Time(ts))
        );
    }

    #[test]
    fn typed_int_accepts_whole_numbers_only() {
        let payload = Payload::string("12").with_type(IndexedValueType::Int);
        let err = decode("CustomIntField", &payload).unwrap_err();
        assert!(matches!(
            err,
            EncodingError::TypeMismatch {
                expected: "integer",
                found: "string",
                ..
            }
        ));
    }

    #[test]
    fn typed_double_accepts_integers() {
        let payload = Payload::int(3).with_type(IndexedValueType::Double);
        assert_eq!(
            decode("CustomDoubleField", &payload).unwrap(),
            Some(FieldValue::Double(3.0))
        );
    }

    #[test]
    fn typed_keyword_list_accepts_single_string() {
        let payload = Payload::string("solo").with_type(IndexedValueType::KeywordList);
        assert_eq!(
            decode("a", &payload).unwrap(),
            Some(FieldValue::KeywordList(vec!["solo".into()]))
        );
    }

    #[test]
    fn missing_encoding_is_an_error() {
        let payload = Payload {
            metadata: BTreeMap::new(),
            data: b"\"x\"".to_vec(),
        };
        let err = decode("CustomStringField", &payload).unwrap_err();
        assert!(matches!(err, EncodingError::MissingEncoding { .. }));
        assert_eq!(err.attribute(), "CustomStringField");
    }

    #[test]
    fn unsupported_encoding_is_an_error() {
        let mut payload = Payload::string("x");
        payload
            .metadata
            .insert(METADATA_ENCODING.to_string(), "binary/protobuf".to_string());
        let err = decode("a", &payload).unwrap_err();
        assert!(matches!(
            err,
            EncodingError::UnsupportedEncoding { ref encoding, .. } if encoding == "binary/protobuf"
        ));
    }

    #[test]
    fn unquoted_string_is_invalid_json() {
        let mut payload = Payload::string("x");
        payload.data = b"alex".to_vec();
        assert!(matches!(
            decode("a", &payload).unwrap_err(),
            EncodingError::InvalidJson { .. }
        ));
    }

    #[test]
    fn objects_and_mixed_lists_are_rejected() {
        let object = Payload::json(&serde_json::json!({"nested": 1}));
        assert!(matches!(
            decode("a", &object).unwrap_err(),
            EncodingError::UnsupportedShape { found: "object", .. }
        ));
        let mixed = Payload::json(&serde_json::json!(["a", 1]));
        assert!(matches!(
            decode("a", &mixed).unwrap_err(),
            EncodingError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn unknown_declared_type_is_rejected() {
        let mut payload = Payload::string("x");
        payload
            .metadata
            .insert(METADATA_TYPE.to_string(), "Geo".to_string());
        assert!(matches!(
            decode("a", &payload).unwrap_err(),
            EncodingError::UnknownValueType { .. }
        ));
    }

    #[test]
    fn invalid_datetime_is_rejected() {
        let payload = Payload::string("yesterday").with_type(IndexedValueType::Datetime);
        assert!(matches!(
            decode("a", &payload).unwrap_err(),
            EncodingError::InvalidDatetime { .. }
        ));
    }
}
