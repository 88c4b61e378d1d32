//! services/app/src/adapters/firestore_codec.rs
//!
//! Converts between plain JSON documents and Firestore's typed REST values.
//!
//! The record time fields listed in `TIMESTAMP_FIELDS` are written as
//! `timestampValue` so the backend orders them chronologically; they come back
//! as RFC 3339 strings. Every other string is stored as text, even when it
//! happens to look like a date.

use chrono::DateTime;
use humonix_core::ports::{Document, PortError, PortResult};
use serde_json::{json, Map, Value};

/// Top-level fields that hold a point in time on every stored record.
pub const TIMESTAMP_FIELDS: [&str; 3] = ["timestamp", "createdAt", "updatedAt"];

pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                json!({ "integerValue": i.to_string() })
            } else if let Some(u) = n.as_u64() {
                json!({ "integerValue": u.to_string() })
            } else {
                json!({ "doubleValue": n.as_f64() })
            }
        }
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(fields) => json!({ "mapValue": { "fields": encode_fields(fields) } }),
    }
}

pub fn encode_fields(fields: &Document) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(name, value)| (name.clone(), encode_field(name, value)))
            .collect(),
    )
}

fn encode_field(name: &str, value: &Value) -> Value {
    match value {
        Value::String(s)
            if TIMESTAMP_FIELDS.contains(&name) && DateTime::parse_from_rfc3339(s).is_ok() =>
        {
            json!({ "timestampValue": s })
        }
        _ => encode_value(value),
    }
}

pub fn decode_value(value: &Value) -> PortResult<Value> {
    let Some((kind, inner)) = value.as_object().and_then(|obj| obj.iter().next()) else {
        return Err(malformed(value));
    };

    match kind.as_str() {
        "nullValue" => Ok(Value::Null),
        "booleanValue" | "doubleValue" => Ok(inner.clone()),
        "integerValue" => match inner {
            Value::String(raw) => raw
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| malformed(value)),
            Value::Number(_) => Ok(inner.clone()),
            _ => Err(malformed(value)),
        },
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => Ok(inner.clone()),
        "geoPointValue" => Ok(inner.clone()),
        "arrayValue" => {
            let items = match inner.get("values") {
                Some(Value::Array(items)) => items
                    .iter()
                    .map(decode_value)
                    .collect::<PortResult<Vec<_>>>()?,
                _ => Vec::new(),
            };
            Ok(Value::Array(items))
        }
        "mapValue" => Ok(Value::Object(decode_fields(inner.get("fields"))?)),
        _ => Err(malformed(value)),
    }
}

/// Decodes a REST `fields` object. A missing object is an empty document.
pub fn decode_fields(fields: Option<&Value>) -> PortResult<Document> {
    match fields {
        None => Ok(Map::new()),
        Some(Value::Object(fields)) => fields
            .iter()
            .map(|(name, value)| -> PortResult<(String, Value)> {
                Ok((name.clone(), decode_value(value)?))
            })
            .collect(),
        Some(other) => Err(malformed(other)),
    }
}

/// The document id is the last segment of its resource name.
pub fn document_id(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

fn malformed(value: &Value) -> PortError {
    PortError::MalformedRecord(format!("unrecognised Firestore value {}", value))
}
