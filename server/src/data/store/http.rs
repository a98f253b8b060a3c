use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{SpanStore, StoreError};
use crate::core::constants::HTTP_CLIENT_TIMEOUT_SECS;
use crate::domain::traces::DomainSpan;

/// Client for an external span store
///
/// `POST {base_url}/projects/{project_id}/spans` with `{user_id, spans}`.
#[derive(Debug)]
pub struct HttpSpanStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct IngestRequest<'a> {
    user_id: &'a str,
    spans: &'a [DomainSpan],
}

impl HttpSpanStore {
    pub fn new(base_url: &str) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_CLIENT_TIMEOUT_SECS))
            .build()
            .map_err(|e| StoreError::Config(format!("failed to build HTTP client: {}", e)))?;

        tracing::debug!(url = %base_url, "HTTP span store initialized");
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn spans_url(&self, project_id: &str) -> String {
        format!("{}/projects/{}/spans", self.base_url, project_id)
    }
}

#[async_trait]
impl SpanStore for HttpSpanStore {
    async fn ingest(
        &self,
        project_id: &str,
        user_id: &str,
        spans: Vec<DomainSpan>,
    ) -> Result<(), StoreError> {
        let url = self.spans_url(project_id);
        let body = IngestRequest {
            user_id,
            spans: &spans,
        };
        let resp = self.client.post(&url).json(&body).send().await?;

        if !resp.status().is_success() {
            return Err(StoreError::Rejected(format!(
                "POST {} returned {}",
                url,
                resp.status()
            )));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_url() {
        let store = HttpSpanStore::new("http://store.local/").unwrap();
        assert_eq!(
            store.spans_url("proj-1"),
            "http://store.local/projects/proj-1/spans"
        );
    }
}
