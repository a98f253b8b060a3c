//! Producer side of the span stream
//!
//! Raw spans go through the feature pipeline; the `flat` result is wrapped in
//! a `SpanEnvelope` and appended to the stream. Spans the `flat` builder
//! rejects are skipped.

use std::sync::Arc;

use thiserror::Error;

use super::envelope::{EnvelopeError, SpanEnvelope};
use crate::data::topics::{StreamBackend, TopicError};
use crate::domain::traces::{FLAT_BUILDER, RawSpan, SpanFeaturePipeline};

#[derive(Error, Debug)]
pub enum PublishError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Topic(#[from] TopicError),
}

/// Counts returned by `SpanPublisher::publish`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub published: usize,
    pub skipped: usize,
}

pub struct SpanPublisher {
    backend: Arc<dyn StreamBackend>,
    stream: String,
    pipeline: Arc<SpanFeaturePipeline>,
}

impl SpanPublisher {
    pub fn new(
        backend: Arc<dyn StreamBackend>,
        stream: impl Into<String>,
        pipeline: Arc<SpanFeaturePipeline>,
    ) -> Self {
        Self {
            backend,
            stream: stream.into(),
            pipeline,
        }
    }

    /// Publish spans of one tenant, stopping at the first stream error
    pub async fn publish(
        &self,
        organization_id: &str,
        project_id: &str,
        user_id: &str,
        spans: &[RawSpan],
    ) -> Result<PublishReport, PublishError> {
        let mut report = PublishReport::default();
        for raw in spans {
            let Some(span) = self
                .pipeline
                .run(raw)
                .remove(FLAT_BUILDER)
                .and_then(|built| built.into_domain())
            else {
                report.skipped += 1;
                continue;
            };

            let envelope = SpanEnvelope::new(organization_id, project_id, user_id, span);
            let payload = envelope.encode()?;
            let id = self.backend.stream_publish(&self.stream, &payload).await?;
            tracing::trace!(msg_id = %id, span_id = %raw.span_id, "Span published");
            report.published += 1;
        }

        tracing::debug!(
            stream = %self.stream,
            published = report.published,
            skipped = report.skipped,
            "Spans published"
        );
        Ok(report)
    }
}
