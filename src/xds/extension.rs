//! Typed extension config unwrapping.
//!
//! Envoy transports extension configuration as `google.protobuf.Any`. Two
//! envelope formats wrap a further level of indirection: `udpa.type.v1.
//! TypedStruct` (legacy) and `xds.type.v3.TypedStruct`, both carrying the real
//! type URL next to a `google.protobuf.Struct` payload. This module peels one
//! envelope layer and normalizes the result so filter and cluster-specifier
//! providers receive either raw protobuf bytes or a JSON body.

use envoy_types::pb::google::protobuf::Any;
use prost::Message;
use prost_types::value::Kind;
use prost_types::{ListValue, Struct, Value};
use serde_json::{json, Map as JsonMap, Value as JsonValue};

use crate::errors::ResourceInvalid;

/// Legacy TypedStruct envelope URL.
pub const UDPA_TYPED_STRUCT_TYPE_URL: &str = "type.googleapis.com/udpa.type.v1.TypedStruct";

/// Current TypedStruct envelope URL.
pub const XDS_TYPED_STRUCT_TYPE_URL: &str = "type.googleapis.com/xds.type.v3.TypedStruct";

/// `udpa.type.v1.TypedStruct` and `xds.type.v3.TypedStruct` share one wire
/// layout (type_url = 1, value = 2), so a single decode type covers both
/// envelope URLs.
#[derive(Clone, PartialEq, ::prost::Message)]
struct TypedStructEnvelope {
    #[prost(string, tag = "1")]
    type_url: String,
    #[prost(message, optional, tag = "2")]
    value: Option<Struct>,
}

/// Configuration payload handed to an extension provider after envelope
/// unwrapping.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtensionPayload {
    /// Raw protobuf serialization of the final typed config.
    Proto(Vec<u8>),
    /// JSON body of a TypedStruct envelope.
    Json(JsonValue),
}

/// An extension config reduced to its final type URL plus payload.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedExtension {
    pub type_url: String,
    pub payload: ExtensionPayload,
}

/// Peel a TypedStruct envelope off `any`, if one is present.
///
/// Non-envelope configs pass through with their bytes untouched. Envelopes are
/// not unwrapped recursively; a TypedStruct inside a TypedStruct keeps the
/// inner envelope URL as its final type.
pub fn unwrap_extension(any: &Any) -> Result<TypedExtension, ResourceInvalid> {
    if any.type_url != UDPA_TYPED_STRUCT_TYPE_URL && any.type_url != XDS_TYPED_STRUCT_TYPE_URL {
        return Ok(TypedExtension {
            type_url: any.type_url.clone(),
            payload: ExtensionPayload::Proto(any.value.clone()),
        });
    }

    let envelope = TypedStructEnvelope::decode(any.value.as_slice())
        .map_err(|e| ResourceInvalid::new(format!("Invalid TypedStruct envelope: {}", e)))?;
    let body = struct_to_json(&envelope.value.unwrap_or_default());

    Ok(TypedExtension { type_url: envelope.type_url, payload: ExtensionPayload::Json(body) })
}

/// Convert a `google.protobuf.Struct` into `serde_json::Value`.
///
/// Integral numbers come back as JSON integers so providers can read counts
/// and sizes without floating-point round trips.
pub fn struct_to_json(value: &Struct) -> JsonValue {
    let mut map = JsonMap::with_capacity(value.fields.len());
    for (key, field) in &value.fields {
        map.insert(key.clone(), value_to_json(field));
    }
    JsonValue::Object(map)
}

fn value_to_json(value: &Value) -> JsonValue {
    match &value.kind {
        None | Some(Kind::NullValue(_)) => JsonValue::Null,
        Some(Kind::NumberValue(n)) => number_to_json(*n),
        Some(Kind::StringValue(s)) => JsonValue::String(s.clone()),
        Some(Kind::BoolValue(b)) => JsonValue::Bool(*b),
        Some(Kind::StructValue(s)) => struct_to_json(s),
        Some(Kind::ListValue(list)) => list_to_json(list),
    }
}

fn list_to_json(list: &ListValue) -> JsonValue {
    JsonValue::Array(list.values.iter().map(value_to_json).collect())
}

fn number_to_json(n: f64) -> JsonValue {
    if n.is_finite() && n.fract() == 0.0 && (i64::MIN as f64..=i64::MAX as f64).contains(&n) {
        json!(n as i64)
    } else {
        json!(n)
    }
}

/// Parse a protobuf-JSON duration literal (e.g. `"1.5s"`).
pub(crate) fn parse_proto_duration(text: &str) -> Result<std::time::Duration, String> {
    let seconds = text
        .strip_suffix('s')
        .ok_or_else(|| format!("Invalid duration '{}': missing 's' suffix", text))?
        .parse::<f64>()
        .map_err(|e| format!("Invalid duration '{}': {}", text, e))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(format!("Invalid duration '{}': must be non-negative", text));
    }
    Ok(std::time::Duration::from_nanos((seconds * 1e9) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn string_value(s: &str) -> Value {
        Value { kind: Some(Kind::StringValue(s.to_string())) }
    }

    fn envelope_any(envelope_url: &str, inner_url: &str, fields: BTreeMap<String, Value>) -> Any {
        let envelope = TypedStructEnvelope {
            type_url: inner_url.to_string(),
            value: Some(Struct { fields }),
        };
        Any { type_url: envelope_url.to_string(), value: envelope.encode_to_vec() }
    }

    #[test]
    fn plain_configs_pass_through() {
        let any = Any { type_url: "type.googleapis.com/test.Config".into(), value: vec![1, 2, 3] };
        let unwrapped = unwrap_extension(&any).expect("unwrap");
        assert_eq!(unwrapped.type_url, "type.googleapis.com/test.Config");
        assert_eq!(unwrapped.payload, ExtensionPayload::Proto(vec![1, 2, 3]));
    }

    #[test]
    fn typed_struct_exposes_inner_type_url() {
        for envelope_url in [UDPA_TYPED_STRUCT_TYPE_URL, XDS_TYPED_STRUCT_TYPE_URL] {
            let mut fields = BTreeMap::new();
            fields.insert("mode".to_string(), string_value("strict"));
            let any = envelope_any(envelope_url, "type.googleapis.com/test.Config", fields);

            let unwrapped = unwrap_extension(&any).expect("unwrap");
            assert_eq!(unwrapped.type_url, "type.googleapis.com/test.Config");
            assert_eq!(
                unwrapped.payload,
                ExtensionPayload::Json(json!({ "mode": "strict" }))
            );
        }
    }

    #[test]
    fn nested_envelopes_are_not_recursed() {
        let mut fields = BTreeMap::new();
        fields.insert("ignored".to_string(), string_value("x"));
        let any = envelope_any(XDS_TYPED_STRUCT_TYPE_URL, UDPA_TYPED_STRUCT_TYPE_URL, fields);

        let unwrapped = unwrap_extension(&any).expect("unwrap");
        assert_eq!(unwrapped.type_url, UDPA_TYPED_STRUCT_TYPE_URL);
        assert!(matches!(unwrapped.payload, ExtensionPayload::Json(_)));
    }

    #[test]
    fn malformed_envelope_is_rejected() {
        let any = Any { type_url: XDS_TYPED_STRUCT_TYPE_URL.into(), value: vec![0xff, 0xff] };
        let err = unwrap_extension(&any).expect_err("should fail");
        assert!(err.message().contains("Invalid TypedStruct envelope"));
    }

    #[test]
    fn struct_to_json_preserves_integers_and_nesting() {
        let mut inner = BTreeMap::new();
        inner.insert("count".to_string(), Value { kind: Some(Kind::NumberValue(64.0)) });
        inner.insert("ratio".to_string(), Value { kind: Some(Kind::NumberValue(0.5)) });
        let mut fields = BTreeMap::new();
        fields.insert(
            "nested".to_string(),
            Value { kind: Some(Kind::StructValue(Struct { fields: inner })) },
        );
        fields.insert(
            "tags".to_string(),
            Value {
                kind: Some(Kind::ListValue(ListValue {
                    values: vec![string_value("a"), string_value("b")],
                })),
            },
        );

        let body = struct_to_json(&Struct { fields });
        assert_eq!(body, json!({ "nested": { "count": 64, "ratio": 0.5 }, "tags": ["a", "b"] }));
        assert_eq!(body["nested"]["count"].as_i64(), Some(64));
    }

    #[test]
    fn proto_duration_literals() {
        assert_eq!(parse_proto_duration("5s").unwrap(), std::time::Duration::from_secs(5));
        assert_eq!(
            parse_proto_duration("0.25s").unwrap(),
            std::time::Duration::from_millis(250)
        );
        assert!(parse_proto_duration("5").is_err());
        assert!(parse_proto_duration("-1s").is_err());
    }
}
