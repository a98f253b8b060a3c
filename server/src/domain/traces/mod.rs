//! Span processing
//!
//! - `types` - Wire (`RawSpan`) and normalized (`DomainSpan`) span types
//! - `ids` - Hex id to UUID shaping
//! - `normalize` - Attribute flattening into namespaces
//! - `features` - Per-bucket feature adapters
//! - `builders` - `flat` and `otel` span builders
//! - `pipeline` - Normalizer, adapters and builders chained per span
//! - `tree` - Hierarchy reconstruction, metric rollup, name grouping
//! - `otlp` - `ExportTraceServiceRequest` to `RawSpan`

pub mod builders;
pub mod features;
pub mod ids;
pub mod normalize;
pub mod otlp;
mod pipeline;
pub mod tree;
mod types;

pub use builders::{BuiltSpan, FLAT_BUILDER, OTEL_BUILDER, SpanBuildError, SpanDataBuilder};
pub use pipeline::SpanFeaturePipeline;
pub use tree::{GroupedNodes, GroupedSpan, SpanTree, build_trees};
pub use types::*;

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::DateTime;
    use uuid::Uuid;

    use super::{DomainSpan, FlatMap, RawSpan, SpanKind, StatusCode};

    /// Wire span with hex ids and no attributes
    pub fn raw_span(trace_id: &str, span_id: &str, parent_id: Option<&str>) -> RawSpan {
        RawSpan {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_id: parent_id.map(Into::into),
            kind: "internal".into(),
            name: format!("span-{span_id}"),
            start_time: 1_000_000_000,
            end_time: 2_000_000_000,
            status_code: "unset".into(),
            status_message: None,
            attributes: Default::default(),
            events: Vec::new(),
            links: Vec::new(),
        }
    }

    /// Span `n` of a fixed trace, optionally under span `parent`, starting at `start` seconds
    pub fn domain_span(n: u64, parent: Option<u64>, start: i64) -> DomainSpan {
        let start_time = DateTime::from_timestamp(start, 0).unwrap_or_default();
        DomainSpan {
            trace_id: Uuid::from_u128(0xabcd),
            span_id: Uuid::from_u128(n as u128),
            parent_id: parent.map(|p| Uuid::from_u128(p as u128)),
            trace_type: None,
            span_type: None,
            span_kind: SpanKind::Internal,
            span_name: format!("span-{n}"),
            start_time,
            end_time: start_time,
            status_code: StatusCode::Unset,
            status_message: None,
            data: FlatMap::new(),
            metrics: FlatMap::new(),
            meta: FlatMap::new(),
            refs: FlatMap::new(),
            tags: FlatMap::new(),
            flags: FlatMap::new(),
            events: Vec::new(),
            links: Vec::new(),
        }
    }
}
