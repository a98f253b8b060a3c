//! OTLP input
//!
//! Flattens an `ExportTraceServiceRequest` into wire-format `RawSpan`s. Ids
//! become lowercase hex, enum values their lowercase names. Resource
//! attributes are carried on every span under `resource`, which the
//! normalizer files under `meta.resource.*`.

use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::trace::v1::Span;
use prost::Message;
use serde_json::{Map as JsonMap, Value as JsonValue};

use super::types::{RawEvent, RawLink, RawSpan, SpanKind, StatusCode};
use crate::utils::otlp::build_attributes_map;

const RESOURCE_ATTR: &str = "resource";

/// Decode a protobuf `ExportTraceServiceRequest` body into raw spans
pub fn raw_spans_from_protobuf(body: &[u8]) -> Result<Vec<RawSpan>, prost::DecodeError> {
    let request = ExportTraceServiceRequest::decode(body)?;
    Ok(raw_spans_from_request(&request))
}

pub fn raw_spans_from_request(request: &ExportTraceServiceRequest) -> Vec<RawSpan> {
    let mut spans = Vec::new();
    for resource_spans in &request.resource_spans {
        let resource_attrs = resource_spans
            .resource
            .as_ref()
            .map(|r| build_attributes_map(&r.attributes))
            .unwrap_or_default();

        for scope_spans in &resource_spans.scope_spans {
            for span in &scope_spans.spans {
                spans.push(raw_span_from_otlp(span, &resource_attrs));
            }
        }
    }
    spans
}

fn raw_span_from_otlp(span: &Span, resource_attrs: &JsonMap<String, JsonValue>) -> RawSpan {
    let mut attributes = build_attributes_map(&span.attributes);
    if !resource_attrs.is_empty() && !attributes.contains_key(RESOURCE_ATTR) {
        attributes.insert(
            RESOURCE_ATTR.to_string(),
            JsonValue::Object(resource_attrs.clone()),
        );
    }

    let (status_code, status_message) = match &span.status {
        Some(status) => (
            StatusCode::from_otlp(status.code),
            Some(status.message.clone()).filter(|m| !m.is_empty()),
        ),
        None => (StatusCode::Unset, None),
    };

    RawSpan {
        trace_id: hex::encode(&span.trace_id),
        span_id: hex::encode(&span.span_id),
        parent_id: (!span.parent_span_id.is_empty()).then(|| hex::encode(&span.parent_span_id)),
        kind: SpanKind::from_otlp(span.kind).as_str().to_string(),
        name: span.name.clone(),
        start_time: span.start_time_unix_nano,
        end_time: span.end_time_unix_nano,
        status_code: status_code.as_str().to_string(),
        status_message,
        attributes,
        events: span
            .events
            .iter()
            .map(|e| RawEvent {
                name: e.name.clone(),
                timestamp: e.time_unix_nano,
                attributes: build_attributes_map(&e.attributes),
            })
            .collect(),
        links: span
            .links
            .iter()
            .map(|l| RawLink {
                trace_id: hex::encode(&l.trace_id),
                span_id: hex::encode(&l.span_id),
                attributes: build_attributes_map(&l.attributes),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue, any_value};
    use opentelemetry_proto::tonic::resource::v1::Resource;
    use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Status, span};

    use super::*;
    use crate::domain::traces::SpanFeaturePipeline;
    use crate::domain::traces::builders::FLAT_BUILDER;

    fn kv(key: &str, value: &str) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: Some(AnyValue {
                value: Some(any_value::Value::StringValue(value.to_string())),
            }),
        }
    }

    fn request() -> ExportTraceServiceRequest {
        let root = Span {
            trace_id: vec![0xab; 16],
            span_id: vec![0x01; 8],
            name: "root".into(),
            kind: 2,
            start_time_unix_nano: 1_000,
            end_time_unix_nano: 3_000_000,
            attributes: vec![kv("tags.env", "prod")],
            status: Some(Status {
                message: String::new(),
                code: 1,
            }),
            ..Default::default()
        };
        let child = Span {
            trace_id: vec![0xab; 16],
            span_id: vec![0x02; 8],
            parent_span_id: vec![0x01; 8],
            name: "child".into(),
            kind: 3,
            events: vec![span::Event {
                name: "retry".into(),
                time_unix_nano: 2_000,
                ..Default::default()
            }],
            ..Default::default()
        };

        ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                resource: Some(Resource {
                    attributes: vec![kv("service.name", "checkout")],
                    ..Default::default()
                }),
                scope_spans: vec![ScopeSpans {
                    spans: vec![root, child],
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }
    }

    #[test]
    fn test_converts_ids_and_enums() {
        let spans = raw_spans_from_request(&request());
        assert_eq!(spans.len(), 2);

        let root = &spans[0];
        assert_eq!(root.trace_id, "ab".repeat(16));
        assert_eq!(root.span_id, "0101010101010101");
        assert!(root.parent_id.is_none());
        assert_eq!(root.kind, "server");
        assert_eq!(root.status_code, "ok");
        assert!(root.status_message.is_none());

        let child = &spans[1];
        assert_eq!(child.parent_id.as_deref(), Some("0101010101010101"));
        assert_eq!(child.kind, "client");
        assert_eq!(child.status_code, "unset");
        assert_eq!(child.events[0].name, "retry");
    }

    #[test]
    fn test_decodes_protobuf_body() {
        let body = request().encode_to_vec();
        let spans = raw_spans_from_protobuf(&body).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].name, "child");

        assert!(raw_spans_from_protobuf(b"\xff\xff\xff").is_err());
        assert!(raw_spans_from_protobuf(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_resource_attributes_land_in_meta() {
        let spans = raw_spans_from_request(&request());
        let results = SpanFeaturePipeline::new().run(&spans[0]);
        let flat = results[FLAT_BUILDER].clone().into_domain().unwrap();
        assert_eq!(
            flat.meta.get("resource.service.name"),
            Some(&serde_json::json!("checkout"))
        );
        assert_eq!(flat.tags.get("env"), Some(&serde_json::json!("prod")));
    }
}
