//! OTLP utility functions
//!
//! Conversion of OTLP protobuf attribute values into JSON with native types
//! preserved.

use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue, any_value};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Convert AnyValue to JSON value (preserves native types)
pub fn any_value_to_json(value: &AnyValue) -> JsonValue {
    match &value.value {
        Some(any_value::Value::StringValue(s)) => serde_json::json!(s),
        Some(any_value::Value::BoolValue(b)) => serde_json::json!(b),
        Some(any_value::Value::IntValue(i)) => serde_json::json!(i),
        Some(any_value::Value::DoubleValue(d)) => serde_json::json!(d),
        Some(any_value::Value::ArrayValue(arr)) => {
            serde_json::json!(arr.values.iter().map(any_value_to_json).collect::<Vec<_>>())
        }
        Some(any_value::Value::KvlistValue(kvlist)) => {
            JsonValue::Object(build_attributes_map(&kvlist.values))
        }
        Some(any_value::Value::BytesValue(b)) => serde_json::json!(hex::encode(b)),
        None => JsonValue::Null,
    }
}

/// Build a JSON map from KeyValue attributes, skipping entries without a value
pub fn build_attributes_map(attrs: &[KeyValue]) -> JsonMap<String, JsonValue> {
    attrs
        .iter()
        .filter_map(|kv| {
            kv.value
                .as_ref()
                .map(|v| (kv.key.clone(), any_value_to_json(v)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use opentelemetry_proto::tonic::common::v1::{ArrayValue, KeyValueList};

    use super::*;

    fn make_any_value(value: any_value::Value) -> AnyValue {
        AnyValue { value: Some(value) }
    }

    fn kv(key: &str, value: any_value::Value) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: Some(make_any_value(value)),
        }
    }

    #[test]
    fn test_any_value_to_json_int() {
        let json = any_value_to_json(&make_any_value(any_value::Value::IntValue(42)));
        assert_eq!(json, serde_json::json!(42));
        assert!(
            json.is_i64(),
            "Int should be preserved as i64, not stringified"
        );
    }

    #[test]
    fn test_any_value_to_json_double() {
        let json = any_value_to_json(&make_any_value(any_value::Value::DoubleValue(0.5)));
        assert!(json.is_f64());
    }

    #[test]
    fn test_any_value_to_json_none() {
        let av = AnyValue { value: None };
        assert_eq!(any_value_to_json(&av), JsonValue::Null);
    }

    #[test]
    fn test_any_value_to_json_bytes() {
        let av = make_any_value(any_value::Value::BytesValue(vec![0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(any_value_to_json(&av), serde_json::json!("deadbeef"));
    }

    #[test]
    fn test_any_value_to_json_array() {
        let arr = ArrayValue {
            values: vec![
                make_any_value(any_value::Value::IntValue(1)),
                make_any_value(any_value::Value::StringValue("two".to_string())),
                make_any_value(any_value::Value::BoolValue(true)),
            ],
        };
        let json = any_value_to_json(&make_any_value(any_value::Value::ArrayValue(arr)));
        assert_eq!(json, serde_json::json!([1, "two", true]));
    }

    #[test]
    fn test_build_attributes_map_nested_kvlist() {
        let nested = KeyValueList {
            values: vec![kv("model", any_value::Value::StringValue("m".into()))],
        };
        let attrs = vec![
            kv("llm", any_value::Value::KvlistValue(nested)),
            kv("count", any_value::Value::IntValue(5)),
            KeyValue {
                key: "empty".to_string(),
                value: None,
            },
        ];
        let map = build_attributes_map(&attrs);
        assert_eq!(map.len(), 2);
        assert_eq!(map["llm"]["model"], serde_json::json!("m"));
        assert_eq!(map["count"], serde_json::json!(5));
    }
}
