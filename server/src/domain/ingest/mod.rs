//! Span ingestion worker
//!
//! - `consumer` - Consumer group reads, acks and stale-entry claims
//! - `batch` - Time/size windowed batch accumulation
//! - `envelope` - MessagePack payload of a stream entry
//! - `tenant` - Payload decoding and grouping by organization/project/user
//! - `gate` - Per-organization trace quota
//! - `worker` - The read, gate, store, ack loop
//! - `publisher` - Producer side of the stream

mod batch;
mod consumer;
mod envelope;
mod gate;
mod publisher;
mod tenant;
mod worker;

pub use batch::{BatchAccumulator, BatchSource};
pub use consumer::{AckOutcome, StreamConsumer};
pub use envelope::{EnvelopeError, SpanEnvelope};
pub use gate::{EntitlementGate, GateOutcome};
pub use publisher::{PublishError, PublishReport, SpanPublisher};
pub use tenant::{DecodedBatch, OrgBucket, ProjectKey, SpanDeserializer, TenantGrouper};
pub use worker::{BatchReport, IngestionWorker};
