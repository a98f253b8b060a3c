//! Consumer group reader
//!
//! Delivery is at-least-once: entries stay in this consumer's pending list
//! from the read until `ack_and_delete`. A batch starts with the pending
//! list, so entries left behind (size truncation, failed acks, claims from
//! dead consumers) are retried before new ones are read.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::batch::{BatchAccumulator, BatchSource};
use crate::core::config::WorkerConfig;
use crate::data::topics::{ReadCursor, ReadOptions, StreamBackend, StreamMessage, TopicError};

/// Counts returned by `ack_and_delete`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckOutcome {
    pub acked: u64,
    pub deleted: u64,
}

pub struct StreamConsumer {
    backend: Arc<dyn StreamBackend>,
    stream: String,
    group: String,
    consumer: String,
    accumulator: BatchAccumulator,
}

impl StreamConsumer {
    pub fn new(backend: Arc<dyn StreamBackend>, config: &WorkerConfig) -> Self {
        Self {
            backend,
            stream: config.stream_name.clone(),
            group: config.consumer_group.clone(),
            consumer: config.consumer_name.clone(),
            accumulator: BatchAccumulator::new(
                config.max_batch_size,
                config.max_block(),
                config.max_delay(),
            ),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer
    }

    /// Create the consumer group, tolerating one that already exists
    pub async fn create_consumer_group(&self) -> Result<(), TopicError> {
        match self.backend.create_group(&self.stream, &self.group).await {
            Ok(()) => {
                tracing::debug!(stream = %self.stream, group = %self.group, "Consumer group created");
                Ok(())
            }
            Err(e) if e.is_group_exists() => {
                tracing::trace!(stream = %self.stream, group = %self.group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Read the next batch: pending entries first, otherwise a windowed read of new ones
    pub async fn read_batch(&self) -> Result<Vec<StreamMessage>, TopicError> {
        let pending = self
            .backend
            .read_group(
                &self.stream,
                &self.group,
                &self.consumer,
                ReadOptions {
                    cursor: ReadCursor::Pending,
                    count: self.accumulator.max_batch_size(),
                    block: None,
                },
            )
            .await?;
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "Re-reading pending entries");
            return Ok(pending);
        }

        self.accumulator.accumulate(self).await
    }

    /// Acknowledge then delete entries; failures are logged and leave them pending
    pub async fn ack_and_delete(&self, ids: &[String]) -> AckOutcome {
        let mut outcome = AckOutcome::default();
        if ids.is_empty() {
            return outcome;
        }

        match self.backend.ack(&self.stream, &self.group, ids).await {
            Ok(acked) => outcome.acked = acked,
            Err(e) => {
                tracing::warn!(error = %e, count = ids.len(), "Failed to ack messages");
                return outcome;
            }
        }

        match self.backend.delete(&self.stream, ids).await {
            Ok(deleted) => outcome.deleted = deleted,
            Err(e) => {
                tracing::warn!(error = %e, count = ids.len(), "Failed to delete messages");
            }
        }

        tracing::trace!(
            acked = outcome.acked,
            deleted = outcome.deleted,
            "Messages acknowledged"
        );
        outcome
    }

    /// Move entries idle on other consumers for `min_idle` into this consumer's pending list
    ///
    /// The claimed entries are processed by the next `read_batch`.
    pub async fn claim_stale(&self, min_idle: Duration, count: usize) -> usize {
        match self
            .backend
            .claim(&self.stream, &self.group, &self.consumer, min_idle, count)
            .await
        {
            Ok(messages) if messages.is_empty() => {
                tracing::trace!("No stuck messages to claim");
                0
            }
            Ok(messages) => {
                tracing::debug!(count = messages.len(), "Claimed stuck messages");
                messages.len()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to claim stuck messages");
                0
            }
        }
    }
}

#[async_trait]
impl BatchSource for StreamConsumer {
    async fn read_new(
        &self,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>, TopicError> {
        self.backend
            .read_group(
                &self.stream,
                &self.group,
                &self.consumer,
                ReadOptions {
                    cursor: ReadCursor::New,
                    count,
                    block: Some(block),
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::topics::MemoryStreamBackend;

    fn worker_config(consumer: &str) -> WorkerConfig {
        WorkerConfig {
            consumer_name: consumer.to_string(),
            max_batch_size: 3,
            max_block_ms: 20,
            max_delay_ms: 20,
            ..Default::default()
        }
    }

    async fn consumer_with(backend: &MemoryStreamBackend, name: &str) -> StreamConsumer {
        let consumer = StreamConsumer::new(Arc::new(backend.clone()), &worker_config(name));
        consumer.create_consumer_group().await.unwrap();
        consumer
    }

    #[tokio::test]
    async fn test_create_consumer_group_is_idempotent() {
        let backend = MemoryStreamBackend::new();
        let consumer = consumer_with(&backend, "c1").await;
        consumer.create_consumer_group().await.unwrap();
        assert_eq!(consumer.consumer_name(), "c1");
    }

    #[tokio::test]
    async fn test_read_batch_times_out_empty() {
        let backend = MemoryStreamBackend::new();
        let consumer = consumer_with(&backend, "c1").await;
        assert!(consumer.read_batch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_batch_caps_at_batch_size() {
        let backend = MemoryStreamBackend::new();
        let consumer = consumer_with(&backend, "c1").await;
        for i in 0..5u8 {
            backend.stream_publish(consumer.stream(), &[i]).await.unwrap();
        }
        let batch = consumer.read_batch().await.unwrap();
        assert_eq!(batch.len(), 3);
    }

    #[tokio::test]
    async fn test_unacked_entries_are_read_again_first() {
        let backend = MemoryStreamBackend::new();
        let consumer = consumer_with(&backend, "c1").await;
        for i in 0..3u8 {
            backend.stream_publish(consumer.stream(), &[i]).await.unwrap();
        }

        let first = consumer.read_batch().await.unwrap();
        assert_eq!(first.len(), 3);
        consumer.ack_and_delete(&[first[0].id.clone()]).await;

        let again = consumer.read_batch().await.unwrap();
        let ids: Vec<_> = again.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec![first[1].id.clone(), first[2].id.clone()]);
    }

    #[tokio::test]
    async fn test_ack_and_delete_twice_is_noop() {
        let backend = MemoryStreamBackend::new();
        let consumer = consumer_with(&backend, "c1").await;
        backend.stream_publish(consumer.stream(), b"x").await.unwrap();
        let batch = consumer.read_batch().await.unwrap();
        let ids: Vec<String> = batch.iter().map(|m| m.id.clone()).collect();

        let first = consumer.ack_and_delete(&ids).await;
        assert_eq!(first, AckOutcome { acked: 1, deleted: 1 });
        let second = consumer.ack_and_delete(&ids).await;
        assert_eq!(second, AckOutcome::default());

        let stats = backend.stream_stats(consumer.stream(), "span_ingest").await.unwrap();
        assert_eq!(stats.length, 0);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_claim_stale_moves_entries_of_dead_consumer() {
        let backend = MemoryStreamBackend::new();
        let dead = consumer_with(&backend, "dead").await;
        let alive = consumer_with(&backend, "alive").await;
        backend.stream_publish(dead.stream(), b"orphaned").await.unwrap();

        assert_eq!(dead.read_batch().await.unwrap().len(), 1);
        assert_eq!(alive.claim_stale(Duration::ZERO, 10).await, 1);

        let batch = alive.read_batch().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, b"orphaned");
    }
}
