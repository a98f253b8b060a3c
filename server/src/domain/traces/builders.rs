//! Span builders
//!
//! A builder turns a raw span plus its extracted features into one
//! downstream representation. Builders run independently: one failing never
//! affects the others.
//!
//! | Name   | Output        | Fails on                                    |
//! |--------|---------------|---------------------------------------------|
//! | `flat` | `DomainSpan`  | malformed ids, unknown kind or status       |
//! | `otel` | archival JSON | never                                       |

use std::collections::BTreeMap;

use serde_json::{Value as JsonValue, json};
use thiserror::Error;

use super::features::SpanFeatures;
use super::ids::{IdError, span_id_to_uuid, trace_id_to_uuid};
use super::normalize::flatten_object;
use super::types::{
    DomainSpan, FlatMap, RawSpan, SpanEvent, SpanKind, SpanLink, StatusCode, UnknownVariant,
};
use crate::utils::time::{nanos_to_datetime, nanos_to_iso};

pub const FLAT_BUILDER: &str = "flat";
pub const OTEL_BUILDER: &str = "otel";

#[derive(Error, Debug)]
pub enum SpanBuildError {
    #[error("invalid {field} '{value}': {reason}")]
    InvalidId {
        field: &'static str,
        value: String,
        reason: IdError,
    },

    #[error("invalid span kind: {0}")]
    InvalidKind(UnknownVariant),

    #[error("invalid status code: {0}")]
    InvalidStatus(UnknownVariant),
}

/// Output of one builder
#[derive(Debug, Clone, PartialEq)]
pub enum BuiltSpan {
    Flat(Box<DomainSpan>),
    Otel(JsonValue),
}

impl BuiltSpan {
    pub fn into_domain(self) -> Option<DomainSpan> {
        match self {
            BuiltSpan::Flat(span) => Some(*span),
            BuiltSpan::Otel(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            BuiltSpan::Otel(value) => Some(value),
            BuiltSpan::Flat(_) => None,
        }
    }
}

pub trait SpanDataBuilder: Send + Sync {
    fn name(&self) -> &'static str;

    fn build(&self, raw: &RawSpan, features: &SpanFeatures) -> Result<BuiltSpan, SpanBuildError>;
}

// ============================================================================
// FLAT BUILDER
// ============================================================================

/// Builds `DomainSpan`s with UUID ids and remapped legacy keys
#[derive(Debug, Default)]
pub struct FlatSpanBuilder;

impl SpanDataBuilder for FlatSpanBuilder {
    fn name(&self) -> &'static str {
        FLAT_BUILDER
    }

    fn build(&self, raw: &RawSpan, features: &SpanFeatures) -> Result<BuiltSpan, SpanBuildError> {
        let trace_id = trace_id_to_uuid(&raw.trace_id).map_err(|reason| {
            SpanBuildError::InvalidId {
                field: "trace_id",
                value: raw.trace_id.clone(),
                reason,
            }
        })?;
        let span_id =
            span_id_to_uuid(&raw.span_id).map_err(|reason| SpanBuildError::InvalidId {
                field: "span_id",
                value: raw.span_id.clone(),
                reason,
            })?;
        let parent_id = match raw.parent_id.as_deref().filter(|p| !p.is_empty()) {
            Some(parent) => Some(span_id_to_uuid(parent).map_err(|reason| {
                SpanBuildError::InvalidId {
                    field: "parent_id",
                    value: parent.to_string(),
                    reason,
                }
            })?),
            None => None,
        };

        let span_kind: SpanKind = raw.kind.parse().map_err(SpanBuildError::InvalidKind)?;
        let status_code: StatusCode = raw
            .status_code
            .parse()
            .map_err(SpanBuildError::InvalidStatus)?;

        let types = remap_keys(&features.types, remap_type_key);

        Ok(BuiltSpan::Flat(Box::new(DomainSpan {
            trace_id,
            span_id,
            parent_id,
            trace_type: types.get("trace").and_then(json_string),
            span_type: types.get("span").and_then(json_string),
            span_kind,
            span_name: raw.name.clone(),
            start_time: nanos_to_datetime(raw.start_time),
            end_time: nanos_to_datetime(raw.end_time),
            status_code,
            status_message: raw.status_message.clone().filter(|m| !m.is_empty()),
            data: features.data.clone(),
            metrics: remap_keys(&features.metrics, remap_metric_key),
            meta: features.meta.clone(),
            refs: remap_keys(&features.refs, remap_reference_key),
            tags: features.tags.clone(),
            flags: features.flags.clone(),
            events: raw
                .events
                .iter()
                .map(|event| SpanEvent {
                    name: event.name.clone(),
                    timestamp: nanos_to_datetime(event.timestamp),
                    attributes: flatten_object(&event.attributes),
                })
                .collect(),
            links: build_links(&features.links),
        })))
    }
}

fn json_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Null => None,
        other => Some(other.to_string()),
    }
}

fn remap_keys(map: &FlatMap, remap: fn(&str) -> String) -> FlatMap {
    map.iter()
        .map(|(key, value)| (remap(key), value.clone()))
        .collect()
}

/// Replace the first segment of a dotted key
fn replace_head(key: &str, from: &str, to: &str) -> Option<String> {
    match key.split_once('.') {
        Some((head, rest)) if head == from => Some(format!("{to}.{rest}")),
        None if key == from => Some(to.to_string()),
        _ => None,
    }
}

/// `variant.*` → `application_variant.*`, `revision.*` → `application_revision.*`,
/// `app.*` → `application.*`
fn remap_reference_key(key: &str) -> String {
    replace_head(key, "variant", "application_variant")
        .or_else(|| replace_head(key, "revision", "application_revision"))
        .or_else(|| replace_head(key, "app", "application"))
        .unwrap_or_else(|| key.to_string())
}

/// `acc.X.*` → `X.cumulative.*`, `unit.X.*` → `X.incremental.*`
fn remap_metric_key(key: &str) -> String {
    let (scope, rest) = match key.split_once('.') {
        Some(("acc", rest)) => ("cumulative", rest),
        Some(("unit", rest)) => ("incremental", rest),
        _ => return key.to_string(),
    };
    match rest.split_once('.') {
        Some((metric, tail)) => format!("{metric}.{scope}.{tail}"),
        None => format!("{rest}.{scope}"),
    }
}

/// `tree` → `trace`, `node` → `span`
fn remap_type_key(key: &str) -> String {
    match key {
        "tree" => "trace".to_string(),
        "node" => "span".to_string(),
        other => other.to_string(),
    }
}

/// Rebuild links from flattened `<index>.trace_id|span_id|attributes.*` keys
fn build_links(flat: &FlatMap) -> Vec<SpanLink> {
    let mut grouped: BTreeMap<usize, FlatMap> = BTreeMap::new();
    for (key, value) in flat {
        if let Some((index, field)) = key.split_once('.')
            && let Ok(index) = index.parse::<usize>()
        {
            grouped
                .entry(index)
                .or_default()
                .insert(field.to_string(), value.clone());
        }
    }

    let mut links = Vec::with_capacity(grouped.len());
    for (index, fields) in grouped {
        let trace_id = fields
            .get("trace_id")
            .and_then(JsonValue::as_str)
            .map(trace_id_to_uuid);
        let span_id = fields
            .get("span_id")
            .and_then(JsonValue::as_str)
            .map(span_id_to_uuid);

        match (trace_id, span_id) {
            (Some(Ok(trace_id)), Some(Ok(span_id))) => {
                let attributes = fields
                    .iter()
                    .filter_map(|(k, v)| {
                        k.strip_prefix("attributes.")
                            .map(|attr| (attr.to_string(), v.clone()))
                    })
                    .collect();
                links.push(SpanLink {
                    trace_id,
                    span_id,
                    attributes,
                });
            }
            _ => {
                tracing::warn!(link = index, "Skipping link with invalid ids");
            }
        }
    }
    links
}

// ============================================================================
// OTEL JSON BUILDER
// ============================================================================

/// Builds the archival JSON document of a raw span (ids kept as hex)
#[derive(Debug, Default)]
pub struct OtelJsonBuilder;

impl SpanDataBuilder for OtelJsonBuilder {
    fn name(&self) -> &'static str {
        OTEL_BUILDER
    }

    fn build(&self, raw: &RawSpan, _features: &SpanFeatures) -> Result<BuiltSpan, SpanBuildError> {
        let mut map = serde_json::Map::new();

        // Identity fields first
        map.insert("trace_id".into(), json!(&raw.trace_id));
        map.insert("span_id".into(), json!(&raw.span_id));
        map.insert(
            "parent_span_id".into(),
            raw.parent_id
                .as_ref()
                .map(|p| json!(p))
                .unwrap_or(JsonValue::Null),
        );
        map.insert("name".into(), json!(&raw.name));
        map.insert("kind".into(), json!(&raw.kind));

        // Timing
        map.insert("start_time_unix_nano".into(), json!(raw.start_time));
        map.insert("end_time_unix_nano".into(), json!(raw.end_time));
        map.insert("start_time".into(), json!(nanos_to_iso(raw.start_time)));
        map.insert("end_time".into(), json!(nanos_to_iso(raw.end_time)));

        map.insert(
            "status".into(),
            json!({
                "code": &raw.status_code,
                "message": &raw.status_message,
            }),
        );

        map.insert(
            "attributes".into(),
            JsonValue::Object(raw.attributes.clone()),
        );

        let events: Vec<JsonValue> = raw
            .events
            .iter()
            .map(|e| {
                json!({
                    "name": &e.name,
                    "timestamp": nanos_to_iso(e.timestamp),
                    "attributes": &e.attributes,
                })
            })
            .collect();
        map.insert("events".into(), json!(events));

        let links: Vec<JsonValue> = raw
            .links
            .iter()
            .map(|l| {
                json!({
                    "trace_id": &l.trace_id,
                    "span_id": &l.span_id,
                    "attributes": &l.attributes,
                })
            })
            .collect();
        map.insert("links".into(), json!(links));

        Ok(BuiltSpan::Otel(JsonValue::Object(map)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::traces::features::AdapterRegistry;
    use crate::domain::traces::normalize::Normalizer;
    use crate::domain::traces::types::{RawEvent, RawLink};

    fn raw_span(attributes: JsonValue) -> RawSpan {
        RawSpan {
            trace_id: "0af7651916cd43dd8448eb211c80319c".into(),
            span_id: "b7ad6b7169203331".into(),
            parent_id: Some("00f067aa0ba902b7".into()),
            kind: "SPAN_KIND_CLIENT".into(),
            name: "llm.call".into(),
            start_time: 1_700_000_000_000_000_000,
            end_time: 1_700_000_000_500_000_000,
            status_code: "ok".into(),
            status_message: Some(String::new()),
            attributes: attributes.as_object().cloned().unwrap_or_default(),
            events: vec![RawEvent {
                name: "exception".into(),
                timestamp: 1_700_000_000_100_000_000,
                attributes: json!({"exception": {"type": "Timeout"}})
                    .as_object()
                    .cloned()
                    .unwrap(),
            }],
            links: vec![RawLink {
                trace_id: "4bf92f3577b34da6a3ce929d0e0e4736".into(),
                span_id: "00f067aa0ba902b7".into(),
                attributes: Default::default(),
            }],
        }
    }

    fn build_flat(raw: &RawSpan) -> Result<DomainSpan, SpanBuildError> {
        let features = AdapterRegistry::default().extract(&Normalizer::new().normalize(raw));
        FlatSpanBuilder
            .build(raw, &features)
            .map(|built| built.into_domain().unwrap())
    }

    #[test]
    fn test_flat_builder_shapes_ids_and_enums() {
        let span = build_flat(&raw_span(json!({}))).unwrap();
        assert_eq!(
            span.trace_id.to_string(),
            "0af76519-16cd-43dd-8448-eb211c80319c"
        );
        assert_eq!(
            span.span_id.to_string(),
            "00000000-0000-0000-b7ad-6b7169203331"
        );
        assert_eq!(
            span.parent_id.unwrap().to_string(),
            "00000000-0000-0000-00f0-67aa0ba902b7"
        );
        assert_eq!(span.span_kind, SpanKind::Client);
        assert_eq!(span.status_code, StatusCode::Ok);
        assert!(span.status_message.is_none());
        assert_eq!(span.events[0].attributes.get("exception.type"), Some(&json!("Timeout")));
        assert_eq!(span.links.len(), 1);
    }

    #[test]
    fn test_flat_builder_remaps_legacy_keys() {
        let span = build_flat(&raw_span(json!({
            "ag": {
                "metrics": {
                    "acc": { "costs": { "total": 1.5 } },
                    "unit": { "tokens": { "prompt": 10, "total": 12 } }
                },
                "refs": { "variant": { "id": "v1" }, "app": { "slug": "bot" } },
                "type": { "tree": "invocation", "node": "chat" }
            },
            "references.revision.version": 3
        })))
        .unwrap();

        assert_eq!(span.metrics.get("costs.cumulative.total"), Some(&json!(1.5)));
        assert_eq!(span.metrics.get("tokens.incremental.prompt"), Some(&json!(10)));
        assert_eq!(span.metrics.get("duration.incremental"), Some(&json!(500.0)));
        assert_eq!(span.refs.get("application_variant.id"), Some(&json!("v1")));
        assert_eq!(span.refs.get("application.slug"), Some(&json!("bot")));
        assert_eq!(span.refs.get("application_revision.version"), Some(&json!(3)));
        assert_eq!(span.trace_type.as_deref(), Some("invocation"));
        assert_eq!(span.span_type.as_deref(), Some("chat"));
    }

    #[test]
    fn test_flat_builder_rejects_bad_trace_id() {
        let mut raw = raw_span(json!({}));
        raw.trace_id = "zz".into();
        let err = build_flat(&raw).unwrap_err();
        assert!(matches!(
            err,
            SpanBuildError::InvalidId {
                field: "trace_id",
                ..
            }
        ));
    }

    #[test]
    fn test_flat_builder_rejects_unknown_kind() {
        let mut raw = raw_span(json!({}));
        raw.kind = "sideways".into();
        assert!(matches!(
            build_flat(&raw).unwrap_err(),
            SpanBuildError::InvalidKind(_)
        ));
    }

    #[test]
    fn test_flat_builder_skips_links_with_bad_ids() {
        let mut raw = raw_span(json!({}));
        raw.links[0].span_id = "nope".into();
        let span = build_flat(&raw).unwrap();
        assert!(span.links.is_empty());
    }

    #[test]
    fn test_remap_metric_key_edge_cases() {
        assert_eq!(remap_metric_key("acc.costs"), "costs.cumulative");
        assert_eq!(remap_metric_key("duration.incremental"), "duration.incremental");
        assert_eq!(remap_metric_key("unitless.value"), "unitless.value");
    }

    #[test]
    fn test_otel_builder_keeps_hex_ids_of_invalid_span() {
        let mut raw = raw_span(json!({"http": {"method": "GET"}}));
        raw.trace_id = "not-hex".into();
        let built = OtelJsonBuilder
            .build(&raw, &SpanFeatures::default())
            .unwrap();
        let doc = built.as_json().unwrap();
        assert_eq!(doc["trace_id"], json!("not-hex"));
        assert_eq!(doc["attributes"]["http"]["method"], json!("GET"));
        assert_eq!(doc["events"][0]["name"], json!("exception"));
        assert_eq!(doc["start_time"], json!("2023-11-14T22:13:20.000000Z"));
    }
}
