//! Batch decoding and tenant grouping
//!
//! Messages are decoded in read order under a byte budget. Once the running
//! payload total passes the budget the rest of the batch is left unacked for
//! the next cycle; the first message is always taken so an oversized one
//! cannot block the consumer. Undecodable messages are acked and dropped.

use std::collections::BTreeMap;

use super::envelope::SpanEnvelope;
use crate::data::topics::StreamMessage;
use crate::domain::traces::DomainSpan;

/// `(project_id, user_id)`
pub type ProjectKey = (String, String);

/// Spans of one organization, per project and user, in read order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrgBucket {
    pub projects: BTreeMap<ProjectKey, Vec<DomainSpan>>,
}

impl OrgBucket {
    /// Spans without a parent
    pub fn root_count(&self) -> usize {
        self.projects
            .values()
            .flatten()
            .filter(|span| span.is_root())
            .count()
    }

    pub fn span_count(&self) -> usize {
        self.projects.values().map(Vec::len).sum()
    }
}

/// Groups decoded spans by organization, then by (project, user)
#[derive(Debug, Default)]
pub struct TenantGrouper {
    orgs: BTreeMap<String, OrgBucket>,
}

impl TenantGrouper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, envelope: SpanEnvelope) {
        let SpanEnvelope {
            organization_id,
            project_id,
            user_id,
            span,
        } = envelope;
        self.orgs
            .entry(organization_id)
            .or_default()
            .projects
            .entry((project_id, user_id))
            .or_default()
            .push(span);
    }

    pub fn span_count(&self) -> usize {
        self.orgs.values().map(OrgBucket::span_count).sum()
    }

    pub fn into_orgs(self) -> BTreeMap<String, OrgBucket> {
        self.orgs
    }
}

/// Result of decoding one batch
#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub orgs: BTreeMap<String, OrgBucket>,
    /// Message ids to acknowledge (decoded or undecodable)
    pub processed: Vec<String>,
    pub decode_failures: usize,
    /// Messages left unacked by the byte budget
    pub truncated: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct SpanDeserializer {
    max_batch_bytes: usize,
}

impl SpanDeserializer {
    pub fn new(max_batch_bytes: usize) -> Self {
        Self { max_batch_bytes }
    }

    pub fn decode_batch(&self, messages: &[StreamMessage]) -> DecodedBatch {
        let mut grouper = TenantGrouper::new();
        let mut batch = DecodedBatch::default();
        let mut total_bytes = 0usize;

        for (index, message) in messages.iter().enumerate() {
            total_bytes = total_bytes.saturating_add(message.payload.len());
            if index > 0 && total_bytes > self.max_batch_bytes {
                batch.truncated = messages.len() - index;
                tracing::warn!(
                    processed = index,
                    remaining = batch.truncated,
                    max_batch_bytes = self.max_batch_bytes,
                    "Batch byte budget exceeded, leaving remainder pending"
                );
                break;
            }

            match SpanEnvelope::decode(&message.payload) {
                Ok(envelope) => grouper.push(envelope),
                Err(e) => {
                    batch.decode_failures += 1;
                    tracing::warn!(
                        error = %e,
                        msg_id = %message.id,
                        "Failed to decode message, acking to discard"
                    );
                }
            }
            batch.processed.push(message.id.clone());
        }

        tracing::trace!(
            spans = grouper.span_count(),
            processed = batch.processed.len(),
            "Batch decoded"
        );
        batch.orgs = grouper.into_orgs();
        batch
    }
}
