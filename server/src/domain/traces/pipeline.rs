//! Span feature pipeline
//!
//! ```text
//! RawSpan ──▶ Normalizer ──▶ AdapterRegistry ──▶ Builders
//!             (flatten,      (one adapter per     (flat, otel, ...)
//!              namespaces)    bucket)
//! ```
//!
//! Every registered builder runs on every span. Results are keyed by builder
//! name; a failing builder is logged and left out of the map without
//! affecting its siblings.

use std::collections::BTreeMap;

use super::builders::{BuiltSpan, FlatSpanBuilder, OtelJsonBuilder, SpanDataBuilder};
use super::features::AdapterRegistry;
use super::normalize::Normalizer;
use super::types::RawSpan;

pub struct SpanFeaturePipeline {
    normalizer: Normalizer,
    registry: AdapterRegistry,
    builders: Vec<Box<dyn SpanDataBuilder>>,
}

impl Default for SpanFeaturePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl SpanFeaturePipeline {
    /// Pipeline with the default adapters and the `flat` and `otel` builders
    pub fn new() -> Self {
        Self::with_builders(vec![
            Box::new(FlatSpanBuilder),
            Box::new(OtelJsonBuilder),
        ])
    }

    pub fn with_builders(builders: Vec<Box<dyn SpanDataBuilder>>) -> Self {
        Self {
            normalizer: Normalizer::new(),
            registry: AdapterRegistry::default(),
            builders,
        }
    }

    pub fn registry_mut(&mut self) -> &mut AdapterRegistry {
        &mut self.registry
    }

    pub fn builder_names(&self) -> Vec<&'static str> {
        self.builders.iter().map(|b| b.name()).collect()
    }

    /// Run all builders on one span
    pub fn run(&self, raw: &RawSpan) -> BTreeMap<String, BuiltSpan> {
        let attrs = self.normalizer.normalize(raw);
        let features = self.registry.extract(&attrs);

        let mut results = BTreeMap::new();
        for builder in &self.builders {
            match builder.build(raw, &features) {
                Ok(built) => {
                    results.insert(builder.name().to_string(), built);
                }
                Err(e) => {
                    tracing::warn!(
                        span_id = %raw.span_id,
                        trace_id = %raw.trace_id,
                        builder = builder.name(),
                        error = %e,
                        "Span builder failed"
                    );
                }
            }
        }

        if results.is_empty() && !self.builders.is_empty() {
            tracing::warn!(
                span_id = %raw.span_id,
                trace_id = %raw.trace_id,
                "All span builders failed"
            );
        }

        results
    }

    pub fn run_batch(&self, spans: &[RawSpan]) -> Vec<BTreeMap<String, BuiltSpan>> {
        spans.iter().map(|span| self.run(span)).collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::traces::builders::{FLAT_BUILDER, OTEL_BUILDER, SpanBuildError};
    use crate::domain::traces::features::SpanFeatures;
    use crate::domain::traces::types::UnknownVariant;

    fn raw_span(trace_id: &str) -> RawSpan {
        RawSpan {
            trace_id: trace_id.into(),
            span_id: "b7ad6b7169203331".into(),
            parent_id: None,
            kind: "server".into(),
            name: "root".into(),
            start_time: 1_000,
            end_time: 2_000,
            status_code: "ok".into(),
            status_message: None,
            attributes: json!({"tags": {"env": "dev"}})
                .as_object()
                .cloned()
                .unwrap(),
            events: vec![],
            links: vec![],
        }
    }

    #[test]
    fn test_runs_every_builder() {
        let results = SpanFeaturePipeline::new().run(&raw_span("0af7651916cd43dd8448eb211c80319c"));
        assert_eq!(results.len(), 2);

        let flat = results[FLAT_BUILDER].clone().into_domain().unwrap();
        assert_eq!(flat.tags.get("env"), Some(&json!("dev")));
        assert!(results[OTEL_BUILDER].as_json().is_some());
    }

    #[test]
    fn test_flat_failure_keeps_otel() {
        let results = SpanFeaturePipeline::new().run(&raw_span("xyz"));
        assert!(!results.contains_key(FLAT_BUILDER));
        assert!(results.contains_key(OTEL_BUILDER));
    }

    struct FailingBuilder;

    impl SpanDataBuilder for FailingBuilder {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn build(&self, _raw: &RawSpan, _f: &SpanFeatures) -> Result<BuiltSpan, SpanBuildError> {
            Err(SpanBuildError::InvalidKind(UnknownVariant("x".into())))
        }
    }

    #[test]
    fn test_all_builders_failing_yields_empty_map() {
        let pipeline = SpanFeaturePipeline::with_builders(vec![
            Box::new(FailingBuilder),
            Box::new(FailingBuilder),
        ]);
        assert_eq!(pipeline.builder_names(), vec!["failing", "failing"]);
        assert!(pipeline.run(&raw_span("0af7651916cd43dd8448eb211c80319c")).is_empty());
    }

    #[test]
    fn test_run_batch_preserves_order() {
        let pipeline = SpanFeaturePipeline::new();
        let results = pipeline.run_batch(&[
            raw_span("0af7651916cd43dd8448eb211c80319c"),
            raw_span("bad"),
        ]);
        assert_eq!(results.len(), 2);
        assert!(results[0].contains_key(FLAT_BUILDER));
        assert!(!results[1].contains_key(FLAT_BUILDER));
    }
}
