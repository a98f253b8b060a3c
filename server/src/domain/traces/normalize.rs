//! Attribute normalization
//!
//! Turns the free-form attribute object of a `RawSpan` into one flat,
//! namespace-prefixed map:
//!
//! - nested objects are flattened into dotted keys (arrays stay values)
//! - a leading `ag.` vendor prefix is stripped
//! - `refs.` is accepted as an alias of `references.`
//! - keys outside the known namespaces land under `meta.`
//! - computed fields are added: `metrics.duration.incremental` (ms) and
//!   `links.<i>.*` for every link

use std::collections::BTreeMap;

use serde_json::{Map as JsonMap, Value as JsonValue};

use super::types::{FlatMap, RawSpan};

/// Vendor prefix stripped from attribute keys
const VENDOR_PREFIX: &str = "ag.";

pub mod namespaces {
    pub const DATA: &str = "data";
    pub const METRICS: &str = "metrics";
    pub const TAGS: &str = "tags";
    pub const META: &str = "meta";
    pub const REFERENCES: &str = "references";
    pub const TYPE: &str = "type";
    pub const FLAGS: &str = "flags";
    pub const LINKS: &str = "links";

    /// Namespaces accepted from span attributes (`links` is computed only)
    pub const ATTRIBUTE_NAMESPACES: &[&str] = &[DATA, METRICS, TAGS, META, REFERENCES, TYPE, FLAGS];

    /// Short spelling accepted for `references`
    pub const REFS_ALIAS: &str = "refs";
}

/// Computed incremental duration key
pub const DURATION_KEY: &str = "metrics.duration.incremental";

/// Flattened, namespace-prefixed attributes of one span
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedAttributes(BTreeMap<String, JsonValue>);

impl NormalizedAttributes {
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries of one namespace with the `namespace.` prefix removed
    pub fn namespace<'a>(
        &'a self,
        namespace: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a JsonValue)> + 'a {
        self.0.iter().filter_map(move |(key, value)| {
            key.strip_prefix(namespace)
                .and_then(|rest| rest.strip_prefix('.'))
                .map(|suffix| (suffix, value))
        })
    }
}

/// Produces `NormalizedAttributes` from raw spans
#[derive(Debug, Clone, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, span: &RawSpan) -> NormalizedAttributes {
        let mut flat = FlatMap::new();
        for (key, value) in &span.attributes {
            flatten_into(&mut flat, key, value);
        }

        let mut out = BTreeMap::new();
        for (key, value) in flat {
            out.insert(qualify_key(&key), value);
        }

        let duration_ms = span.end_time.saturating_sub(span.start_time) as f64 / 1_000_000.0;
        out.insert(DURATION_KEY.to_string(), JsonValue::from(duration_ms));

        for (index, link) in span.links.iter().enumerate() {
            let prefix = format!("{}.{}", namespaces::LINKS, index);
            out.insert(
                format!("{prefix}.trace_id"),
                JsonValue::String(link.trace_id.clone()),
            );
            out.insert(
                format!("{prefix}.span_id"),
                JsonValue::String(link.span_id.clone()),
            );
            let mut link_attrs = FlatMap::new();
            for (key, value) in &link.attributes {
                flatten_into(&mut link_attrs, key, value);
            }
            for (key, value) in link_attrs {
                out.insert(format!("{prefix}.attributes.{key}"), value);
            }
        }

        NormalizedAttributes(out)
    }
}

/// Flatten nested objects into dotted keys
pub fn flatten_into(out: &mut FlatMap, key: &str, value: &JsonValue) {
    match value {
        JsonValue::Object(map) if !map.is_empty() => {
            for (child_key, child) in map {
                flatten_into(out, &format!("{key}.{child_key}"), child);
            }
        }
        _ => {
            out.insert(key.to_string(), value.clone());
        }
    }
}

/// Flatten a whole attribute object
pub fn flatten_object(map: &JsonMap<String, JsonValue>) -> FlatMap {
    let mut out = FlatMap::new();
    for (key, value) in map {
        flatten_into(&mut out, key, value);
    }
    out
}

/// Strip the vendor prefix, resolve aliases and place unknown keys under `meta.`
fn qualify_key(key: &str) -> String {
    let key = key.strip_prefix(VENDOR_PREFIX).unwrap_or(key);
    let (head, rest) = match key.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (key, None),
    };

    match rest {
        Some(rest) if head == namespaces::REFS_ALIAS => {
            format!("{}.{}", namespaces::REFERENCES, rest)
        }
        Some(_) if namespaces::ATTRIBUTE_NAMESPACES.contains(&head) => key.to_string(),
        _ => format!("{}.{}", namespaces::META, key),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::traces::types::RawLink;

    fn raw_span(attributes: JsonValue) -> RawSpan {
        RawSpan {
            trace_id: "0af7651916cd43dd8448eb211c80319c".into(),
            span_id: "b7ad6b7169203331".into(),
            parent_id: None,
            kind: "server".into(),
            name: "root".into(),
            start_time: 1_000_000_000,
            end_time: 1_250_000_000,
            status_code: "ok".into(),
            status_message: None,
            attributes: attributes.as_object().cloned().unwrap_or_default(),
            events: vec![],
            links: vec![],
        }
    }

    #[test]
    fn test_flattens_nested_objects() {
        let attrs = Normalizer::new().normalize(&raw_span(json!({
            "data": { "inputs": { "q": "hi" }, "outputs": ["a", "b"] }
        })));
        assert_eq!(attrs.get("data.inputs.q"), Some(&json!("hi")));
        assert_eq!(attrs.get("data.outputs"), Some(&json!(["a", "b"])));
    }

    #[test]
    fn test_strips_vendor_prefix_and_resolves_alias() {
        let attrs = Normalizer::new().normalize(&raw_span(json!({
            "ag.metrics.unit.costs.total": 0.5,
            "refs.application.id": "app-1"
        })));
        assert_eq!(attrs.get("metrics.unit.costs.total"), Some(&json!(0.5)));
        assert_eq!(attrs.get("references.application.id"), Some(&json!("app-1")));
    }

    #[test]
    fn test_unknown_namespace_goes_to_meta() {
        let attrs = Normalizer::new().normalize(&raw_span(json!({
            "http.method": "GET",
            "tags": "loose"
        })));
        assert_eq!(attrs.get("meta.http.method"), Some(&json!("GET")));
        assert_eq!(attrs.get("meta.tags"), Some(&json!("loose")));
    }

    #[test]
    fn test_computes_duration_in_ms() {
        let attrs = Normalizer::new().normalize(&raw_span(json!({})));
        assert_eq!(attrs.get(DURATION_KEY), Some(&json!(250.0)));
    }

    #[test]
    fn test_duration_clamps_when_end_precedes_start() {
        let mut span = raw_span(json!({}));
        span.end_time = 0;
        let attrs = Normalizer::new().normalize(&span);
        assert_eq!(attrs.get(DURATION_KEY), Some(&json!(0.0)));
    }

    #[test]
    fn test_links_are_flattened() {
        let mut span = raw_span(json!({}));
        span.links.push(RawLink {
            trace_id: "aa".repeat(16),
            span_id: "bb".repeat(8),
            attributes: json!({ "kind": { "name": "follows" } })
                .as_object()
                .cloned()
                .unwrap(),
        });
        let attrs = Normalizer::new().normalize(&span);
        assert_eq!(attrs.get("links.0.span_id"), Some(&json!("bb".repeat(8))));
        assert_eq!(
            attrs.get("links.0.attributes.kind.name"),
            Some(&json!("follows"))
        );
    }

    #[test]
    fn test_namespace_iterator_strips_prefix() {
        let attrs = Normalizer::new().normalize(&raw_span(json!({
            "tags": { "env": "prod" },
            "tagsx.other": 1
        })));
        let tags: Vec<_> = attrs.namespace("tags").collect();
        assert_eq!(tags, vec![("env", &json!("prod"))]);
    }
}
