//! Domain logic for span ingestion
//!
//! - `ingest` - Stream consumer, batching, tenant grouping, quota gate, worker loop
//! - `traces` - Span normalization, builders and tree rollup

pub mod ingest;
pub mod traces;
