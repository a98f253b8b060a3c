use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{QuotaDecision, QuotaError, QuotaMeter};
use crate::core::constants::HTTP_CLIENT_TIMEOUT_SECS;

/// Client for an external entitlements service
///
/// `POST {base_url}/meters/check` with `{organization_id, key, delta, use_cache}`,
/// answered by a `QuotaDecision` JSON body.
#[derive(Debug)]
pub struct HttpQuotaMeter {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct CheckRequest<'a> {
    organization_id: &'a str,
    key: &'a str,
    delta: i64,
    use_cache: bool,
}

impl HttpQuotaMeter {
    pub fn new(base_url: &str) -> Result<Self, QuotaError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_CLIENT_TIMEOUT_SECS))
            .build()
            .map_err(|e| QuotaError::Config(format!("failed to build HTTP client: {}", e)))?;

        tracing::debug!(url = %base_url, "HTTP quota meter initialized");
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn check_url(&self) -> String {
        format!("{}/meters/check", self.base_url)
    }
}

#[async_trait]
impl QuotaMeter for HttpQuotaMeter {
    async fn check_and_adjust(
        &self,
        organization_id: &str,
        key: &str,
        delta: i64,
        use_cache: bool,
    ) -> Result<QuotaDecision, QuotaError> {
        let url = self.check_url();
        let body = CheckRequest {
            organization_id,
            key,
            delta,
            use_cache,
        };
        let resp = self.client.post(&url).json(&body).send().await?;

        if !resp.status().is_success() {
            return Err(QuotaError::Backend(format!(
                "POST {} returned {}",
                url,
                resp.status()
            )));
        }

        Ok(resp.json::<QuotaDecision>().await?)
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}
