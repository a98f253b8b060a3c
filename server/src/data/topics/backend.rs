//! Stream backend trait definition
//!
//! Defines the interface for append-only logs consumed through consumer
//! groups (memory and Redis). Delivery is at-least-once: a message read by a
//! consumer stays pending until it is acknowledged, and can be claimed by
//! another consumer once it has been idle long enough.

use std::time::Duration;

use async_trait::async_trait;

use super::error::TopicError;

/// Message received from a stream with its ID for acknowledgment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    /// Unique message ID (Redis stream ID or memory sequence)
    pub id: String,
    /// Message payload
    pub payload: Vec<u8>,
}

/// Which entries a group read returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCursor {
    /// Entries already delivered to this consumer but not yet acknowledged (`0`)
    Pending,
    /// Entries never delivered to any consumer of the group (`>`)
    New,
}

/// Parameters of a single group read
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    pub cursor: ReadCursor,
    /// Maximum number of entries to return
    pub count: usize,
    /// How long to wait for new entries; `None` returns immediately
    pub block: Option<Duration>,
}

/// Stream backend trait
///
/// Both in-memory and Redis backends implement this trait.
#[async_trait]
pub trait StreamBackend: Send + Sync {
    /// Append a message to the stream, returns the message ID
    async fn stream_publish(&self, stream: &str, payload: &[u8]) -> Result<String, TopicError>;

    /// Create a consumer group reading the stream from the beginning
    ///
    /// Creates the stream if missing. Returns `TopicError::GroupExists` when
    /// the group is already there.
    async fn create_group(&self, stream: &str, group: &str) -> Result<(), TopicError>;

    /// Read entries for `consumer` in `group`
    ///
    /// Returns an empty vector when nothing arrived within the block time.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        opts: ReadOptions,
    ) -> Result<Vec<StreamMessage>, TopicError>;

    /// Remove messages from the group's pending list, returns how many were pending
    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<u64, TopicError>;

    /// Remove messages from the stream, returns how many existed
    async fn delete(&self, stream: &str, ids: &[String]) -> Result<u64, TopicError>;

    /// Claim pending messages that have been idle too long
    ///
    /// Used for recovery when consumers crash without acknowledging.
    /// Claimed messages move to `consumer`'s pending list.
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamMessage>, TopicError>;

    /// Get stream statistics for monitoring
    async fn stream_stats(&self, stream: &str, group: &str) -> Result<StreamStats, TopicError>;

    /// Health check (validates connection)
    async fn health_check(&self) -> Result<(), TopicError>;

    /// Backend name for debugging/logging
    fn backend_name(&self) -> &'static str;
}

/// Stream statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Total messages in the stream
    pub length: u64,
    /// Messages pending acknowledgment
    pub pending: u64,
    /// Number of consumers in the group
    pub consumers: u64,
    /// Oldest pending message age in milliseconds
    pub oldest_pending_ms: Option<u64>,
}
