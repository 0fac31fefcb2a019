//! Payload tree and JSON-safe serialization.
//!
//! Outbound event payloads arrive from many producers and carry shapes JSON
//! cannot hold directly: timestamps, enum-like tagged values, sets, maps with
//! non-string keys. `serialize` flattens any `Payload` into a
//! `serde_json::Value` and never fails; values with no JSON mapping fall back
//! to their string form with a logged warning.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

/// Scalar carried by a tagged (enum-like) value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    fn to_value(&self) -> Value {
        match self {
            Scalar::Str(s) => Value::String(s.clone()),
            Scalar::Int(i) => json!(i),
            Scalar::Float(f) => json!(f),
            Scalar::Bool(b) => Value::Bool(*b),
        }
    }

    fn to_key_string(&self) -> String {
        match self {
            Scalar::Str(s) => s.clone(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

/// Map key; non-string keys are stringified during serialization.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadKey {
    Str(String),
    Int(i64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    /// Enum-like key; reduces to its scalar's string form, not its label.
    Tagged { label: String, value: Scalar },
}

impl PayloadKey {
    fn to_key_string(&self) -> String {
        match self {
            PayloadKey::Str(s) => s.clone(),
            PayloadKey::Int(i) => i.to_string(),
            PayloadKey::Bool(b) => b.to_string(),
            PayloadKey::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::Micros, true),
            PayloadKey::Tagged { value, .. } => value.to_key_string(),
        }
    }
}

/// Heterogeneous payload value.
///
/// Dispatch runs variant by variant; `Opaque` is the terminal fallback for
/// shapes nothing else matched upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Timestamp(DateTime<Utc>),
    /// Enum-like value; serializes to its declared scalar, not its label.
    Tagged { label: String, value: Scalar },
    List(Vec<Payload>),
    /// Unordered collection; serializes to an array, order not guaranteed.
    Set(Vec<Payload>),
    Map(Vec<(PayloadKey, Payload)>),
    /// Unanticipated shape captured as its string representation.
    Opaque(String),
}

impl Payload {
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Payload)>,
    {
        Payload::Map(
            entries
                .into_iter()
                .map(|(k, v)| (PayloadKey::Str(k.into()), v))
                .collect(),
        )
    }

    pub fn tagged(label: impl Into<String>, value: Scalar) -> Self {
        Payload::Tagged {
            label: label.into(),
            value,
        }
    }
}

/// "Dump to mapping" capability for model-like payload producers.
pub trait ToPayload {
    fn to_payload(&self) -> Payload;
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Str(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Str(s)
    }
}

impl From<i64> for Payload {
    fn from(i: i64) -> Self {
        Payload::Int(i)
    }
}

impl From<f64> for Payload {
    fn from(f: f64) -> Self {
        Payload::Float(f)
    }
}

impl From<bool> for Payload {
    fn from(b: bool) -> Self {
        Payload::Bool(b)
    }
}

impl From<DateTime<Utc>> for Payload {
    fn from(ts: DateTime<Utc>) -> Self {
        Payload::Timestamp(ts)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Payload::Null,
            Value::Bool(b) => Payload::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Payload::Int(i)
                } else {
                    Payload::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => Payload::Str(s),
            Value::Array(items) => Payload::List(items.into_iter().map(Payload::from).collect()),
            Value::Object(map) => Payload::Map(
                map.into_iter()
                    .map(|(k, v)| (PayloadKey::Str(k), Payload::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<HashMap<String, String>> for Payload {
    fn from(map: HashMap<String, String>) -> Self {
        Payload::Map(
            map.into_iter()
                .map(|(k, v)| (PayloadKey::Str(k), Payload::Str(v)))
                .collect(),
        )
    }
}

/// Convert a payload into a JSON-safe value. Total: never fails.
pub fn serialize(payload: &Payload) -> Value {
    match payload {
        Payload::Null => Value::Null,
        Payload::Bool(b) => Value::Bool(*b),
        Payload::Int(i) => json!(i),
        Payload::Float(f) => json!(f),
        Payload::Str(s) => Value::String(s.clone()),
        Payload::Timestamp(ts) => {
            Value::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true))
        }
        Payload::Tagged { value, .. } => value.to_value(),
        Payload::List(items) | Payload::Set(items) => {
            Value::Array(items.iter().map(serialize).collect())
        }
        Payload::Map(entries) => {
            let mut object = Map::with_capacity(entries.len());
            for (key, value) in entries {
                object.insert(key.to_key_string(), serialize(value));
            }
            Value::Object(object)
        }
        Payload::Opaque(repr) => {
            // Unanticipated payload shape; keep delivery going with the
            // string form but leave a trace for the producer to fix.
            tracing::warn!(
                repr = %repr,
                "Serializing unrecognized payload shape via string fallback"
            );
            Value::String(repr.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_primitives_pass_through() {
        assert_eq!(serialize(&Payload::Null), Value::Null);
        assert_eq!(serialize(&Payload::Bool(true)), json!(true));
        assert_eq!(serialize(&Payload::Int(-7)), json!(-7));
        assert_eq!(serialize(&Payload::Float(1.5)), json!(1.5));
        assert_eq!(serialize(&Payload::Str("hi".into())), json!("hi"));
    }

    #[test]
    fn test_timestamp_is_iso8601() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 45).unwrap();
        let value = serialize(&Payload::Timestamp(ts));
        let rendered = value.as_str().unwrap();
        assert!(rendered.starts_with("2025-03-01T12:30:45"));
        assert!(rendered.ends_with('Z'));
    }

    #[test]
    fn test_tagged_reduces_to_scalar_value() {
        let status = Payload::tagged("Status::Active", Scalar::Str("active".into()));
        assert_eq!(serialize(&status), json!("active"));

        let code = Payload::tagged("Code::NotFound", Scalar::Int(404));
        assert_eq!(serialize(&code), json!(404));
    }

    #[test]
    fn test_set_becomes_array() {
        let set = Payload::Set(vec![Payload::Int(1), Payload::Int(2)]);
        let value = serialize(&set);
        let items = value.as_array().unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_non_string_keys_are_stringified() {
        let map = Payload::Map(vec![
            (PayloadKey::Int(42), Payload::Str("int key".into())),
            (PayloadKey::Bool(true), Payload::Str("bool key".into())),
            (
                PayloadKey::Tagged {
                    label: "Kind::Tool".into(),
                    value: Scalar::Str("tool".into()),
                },
                Payload::Str("enum key".into()),
            ),
        ]);
        let value = serialize(&map);
        let object = value.as_object().unwrap();
        assert_eq!(object["42"], json!("int key"));
        assert_eq!(object["true"], json!("bool key"));
        assert_eq!(object["tool"], json!("enum key"));
    }

    #[test]
    fn test_opaque_falls_back_to_string() {
        let value = serialize(&Payload::Opaque("<SocketRef 0x7f>".into()));
        assert_eq!(value, json!("<SocketRef 0x7f>"));
    }

    #[test]
    fn test_mixed_tree_always_valid_json() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 9, 8, 0, 0).unwrap();
        let tree = Payload::Map(vec![
            (PayloadKey::Str("when".into()), Payload::Timestamp(ts)),
            (
                PayloadKey::Str("state".into()),
                Payload::tagged("State::Running", Scalar::Str("running".into())),
            ),
            (
                PayloadKey::Str("tags".into()),
                Payload::Set(vec![Payload::Str("a".into()), Payload::Str("b".into())]),
            ),
            (
                PayloadKey::Str("handle".into()),
                Payload::Opaque("<Handle>".into()),
            ),
        ]);

        let value = serialize(&tree);
        // Round-trips through a JSON string without loss of validity
        let text = serde_json::to_string(&value).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_model_dump_via_trait() {
        struct ToolRun {
            tool: String,
            duration_ms: i64,
        }

        impl ToPayload for ToolRun {
            fn to_payload(&self) -> Payload {
                Payload::map([
                    ("tool", Payload::Str(self.tool.clone())),
                    ("duration_ms", Payload::Int(self.duration_ms)),
                ])
            }
        }

        let run = ToolRun {
            tool: "search".into(),
            duration_ms: 112,
        };
        let value = serialize(&run.to_payload());
        assert_eq!(value, json!({"tool": "search", "duration_ms": 112}));
    }

    #[test]
    fn test_from_json_value() {
        let value = json!({"a": [1, 2], "b": {"nested": null}});
        let payload = Payload::from(value.clone());
        assert_eq!(serialize(&payload), value);
    }
}
