//! Span persistence boundary
//!
//! The worker never stores spans itself: it hands each tenant's spans to a
//! `SpanStore`. Backends:
//! - `memory` - records every call (development and tests)
//! - `http` - external span store service

mod http;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpSpanStore;
pub use memory::{IngestedBatch, MemorySpanStore};

use crate::core::config::{StoreBackendType, StoreConfig};
use crate::domain::traces::DomainSpan;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Span store configuration error: {0}")]
    Config(String),

    #[error("Span store rejected batch: {0}")]
    Rejected(String),

    #[error("Span store request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[async_trait]
pub trait SpanStore: Send + Sync {
    /// Persist spans of one (project, user) pair
    async fn ingest(
        &self,
        project_id: &str,
        user_id: &str,
        spans: Vec<DomainSpan>,
    ) -> Result<(), StoreError>;

    /// Backend name for debugging/logging
    fn backend_name(&self) -> &'static str;
}

/// Create the span store selected by configuration
pub fn build_store(config: &StoreConfig) -> Result<Arc<dyn SpanStore>, StoreError> {
    let store: Arc<dyn SpanStore> = match config.backend {
        StoreBackendType::Memory => Arc::new(MemorySpanStore::new()),
        StoreBackendType::Http => {
            let url = config
                .url
                .as_ref()
                .ok_or_else(|| StoreError::Config("store.url required for http backend".into()))?;
            Arc::new(HttpSpanStore::new(url)?)
        }
    };
    tracing::debug!(backend = store.backend_name(), "Span store initialized");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_store_memory() {
        let store = build_store(&StoreConfig {
            backend: StoreBackendType::Memory,
            url: None,
        })
        .unwrap();
        assert_eq!(store.backend_name(), "memory");
    }

    #[test]
    fn test_build_store_http_requires_url() {
        let err = build_store(&StoreConfig {
            backend: StoreBackendType::Http,
            url: None,
        })
        .err()
        .unwrap();
        assert_eq!(
            err.to_string(),
            "Span store configuration error: store.url required for http backend"
        );
    }
}
