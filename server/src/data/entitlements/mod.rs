//! Per-organization usage meters
//!
//! The worker only needs one operation from the entitlements system:
//! atomically check a counter against its limit and adjust it. Backends:
//! - `memory` - process-local counters with configured limits
//! - `http` - external entitlements service

mod error;
mod http;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::QuotaError;
pub use http::HttpQuotaMeter;
pub use memory::MemoryQuotaMeter;

use crate::core::config::{EntitlementsBackendType, EntitlementsConfig};

/// Snapshot of one counter for one organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meter {
    pub organization_id: String,
    pub key: String,
    pub value: i64,
    /// `None` means unlimited
    pub limit: Option<i64>,
}

/// Outcome of `QuotaMeter::check_and_adjust`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    /// Counter state after the call (unchanged when not allowed)
    pub meter: Option<Meter>,
    /// Counter state to restore to undo the adjustment
    pub rollback: Option<Meter>,
}

/// Authoritative check-and-adjust of usage counters
#[async_trait]
pub trait QuotaMeter: Send + Sync {
    /// Add `delta` to counter `key` of `organization_id` if it stays within the limit
    ///
    /// `use_cache = false` asks the backend for a fresh read of the counter.
    async fn check_and_adjust(
        &self,
        organization_id: &str,
        key: &str,
        delta: i64,
        use_cache: bool,
    ) -> Result<QuotaDecision, QuotaError>;

    /// Backend name for debugging/logging
    fn backend_name(&self) -> &'static str;
}

/// Create the quota meter selected by configuration, `None` when disabled
pub fn build_meter(config: &EntitlementsConfig) -> Result<Option<Arc<dyn QuotaMeter>>, QuotaError> {
    if !config.enabled {
        tracing::debug!("Entitlements disabled, all tenants admitted");
        return Ok(None);
    }

    let meter: Arc<dyn QuotaMeter> = match config.backend {
        EntitlementsBackendType::Memory => {
            Arc::new(MemoryQuotaMeter::with_limits(config.limits.clone()))
        }
        EntitlementsBackendType::Http => {
            let url = config.url.as_ref().ok_or_else(|| {
                QuotaError::Config("entitlements.url required for http backend".into())
            })?;
            Arc::new(HttpQuotaMeter::new(url)?)
        }
    };
    tracing::debug!(backend = meter.backend_name(), "Quota meter initialized");
    Ok(Some(meter))
}
