//! Stream payload format
//!
//! Each stream entry carries one span with its tenant identity, encoded as a
//! MessagePack map in the entry's `payload` field.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::traces::DomainSpan;

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("Failed to encode span envelope: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to decode span envelope: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEnvelope {
    pub organization_id: String,
    pub project_id: String,
    pub user_id: String,
    pub span: DomainSpan,
}

impl SpanEnvelope {
    pub fn new(
        organization_id: impl Into<String>,
        project_id: impl Into<String>,
        user_id: impl Into<String>,
        span: DomainSpan,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            project_id: project_id.into(),
            user_id: user_id.into(),
            span,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(rmp_serde::from_slice(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::traces::test_support::domain_span;

    #[test]
    fn test_envelope_keeps_attribute_types() {
        let mut span = domain_span(7, Some(3), 42);
        span.metrics.insert("costs.incremental.total".into(), json!(0.25));
        span.metrics.insert("tokens.incremental.total".into(), json!(12));
        span.data.insert("inputs".into(), json!({"q": ["a", null, true]}));

        let envelope = SpanEnvelope::new("org", "proj", "user", span);
        let decoded = SpanEnvelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = SpanEnvelope::decode(b"\xc1not msgpack").unwrap_err();
        assert!(matches!(err, EnvelopeError::Decode(_)));
    }
}
