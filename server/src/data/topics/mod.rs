//! Distributed stream system
//!
//! Append-only logs consumed through consumer groups, with pluggable backends:
//! - In-memory (default) - local-only, for development and single-process
//! - Redis - Redis Streams, for multi-machine deployments
//!
//! ## Configuration
//!
//! - `stream.backend = "memory"` → in-memory streams
//! - `stream.backend = "redis"` → Redis Streams (`stream.redis_url` required)

mod backend;
mod error;
mod memory;
mod redis;

use std::sync::Arc;

pub use backend::{ReadCursor, ReadOptions, StreamBackend, StreamMessage, StreamStats};
pub use error::TopicError;
pub use memory::MemoryStreamBackend;
pub use redis::RedisStreamBackend;

use crate::core::config::{StreamBackendType, StreamConfig};

/// Create the stream backend selected by configuration
pub async fn connect(config: &StreamConfig) -> Result<Arc<dyn StreamBackend>, TopicError> {
    let backend: Arc<dyn StreamBackend> = match config.backend {
        StreamBackendType::Memory => Arc::new(MemoryStreamBackend::new()),
        StreamBackendType::Redis => {
            let url = config.redis_url.as_ref().ok_or_else(|| {
                TopicError::Config("redis_url required for Redis backend".into())
            })?;
            Arc::new(RedisStreamBackend::new(url).await?)
        }
    };
    tracing::debug!(backend = backend.backend_name(), "Stream backend initialized");
    Ok(backend)
}
