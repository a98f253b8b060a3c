//! Ingestion worker loop
//!
//! ```text
//! read_batch ──▶ decode + group ──▶ entitlement gate ──▶ SpanStore ──▶ ack + delete
//! ```
//!
//! One cycle runs at a time. Shutdown is checked between cycles only, so a
//! batch that has been read is always finished, including its ack. Failures
//! inside a cycle are logged and never stop the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::consumer::StreamConsumer;
use super::gate::EntitlementGate;
use super::tenant::SpanDeserializer;
use crate::core::config::WorkerConfig;
use crate::core::constants::{CLAIM_MAX_COUNT, LOOP_ERROR_BACKOFF_SECS};
use crate::data::store::SpanStore;
use crate::data::topics::{StreamBackend, StreamMessage, TopicError};

/// Counts for one processed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub read: usize,
    pub acked: usize,
    /// Spans accepted by the store
    pub forwarded: usize,
    /// Spans dropped by the entitlement gate
    pub dropped: usize,
    /// Messages left pending by the byte budget
    pub truncated: usize,
    pub decode_failures: usize,
}

pub struct IngestionWorker {
    consumer: StreamConsumer,
    deserializer: SpanDeserializer,
    gate: EntitlementGate,
    store: Arc<dyn SpanStore>,
    claim_interval: Duration,
    claim_min_idle: Duration,
    store_backoff: Duration,
}

impl IngestionWorker {
    pub fn new(
        backend: Arc<dyn StreamBackend>,
        gate: EntitlementGate,
        store: Arc<dyn SpanStore>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            consumer: StreamConsumer::new(backend, config),
            deserializer: SpanDeserializer::new(config.max_batch_bytes()),
            gate,
            store,
            claim_interval: config.claim_interval(),
            claim_min_idle: config.claim_min_idle(),
            store_backoff: config.store_backoff(),
        }
    }

    /// Create the consumer group; any error other than "already exists" is fatal
    pub async fn prepare(&self) -> Result<(), TopicError> {
        self.consumer.create_consumer_group().await
    }

    /// Spawn the worker loop; the handle resolves once shutdown is observed
    pub fn start(self, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown_rx))
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut claim_interval =
            tokio::time::interval_at(Instant::now() + self.claim_interval, self.claim_interval);
        claim_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(
            stream = %self.consumer.stream(),
            consumer = %self.consumer.consumer_name(),
            store = self.store.backend_name(),
            entitlements = self.gate.is_enabled(),
            "Ingestion worker started"
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let result = tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::debug!("Ingestion worker received shutdown");
                        break;
                    }
                    continue;
                }
                _ = claim_interval.tick() => {
                    self.consumer
                        .claim_stale(self.claim_min_idle, CLAIM_MAX_COUNT)
                        .await;
                    continue;
                }
                result = self.consumer.read_batch() => result,
            };

            match result {
                Ok(messages) if messages.is_empty() => {}
                Ok(messages) => {
                    self.process_batch(messages).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read batch");
                    tokio::time::sleep(Duration::from_secs(LOOP_ERROR_BACKOFF_SECS)).await;
                }
            }
        }

        tracing::debug!("Ingestion worker shutdown complete");
    }

    /// Read and process a single batch
    pub async fn run_once(&self) -> Result<BatchReport, TopicError> {
        let messages = self.consumer.read_batch().await?;
        if messages.is_empty() {
            return Ok(BatchReport::default());
        }
        Ok(self.process_batch(messages).await)
    }

    pub async fn process_batch(&self, messages: Vec<StreamMessage>) -> BatchReport {
        let decoded = self.deserializer.decode_batch(&messages);
        let gated = self.gate.admit(decoded.orgs).await;

        let mut forwarded = 0;
        for (organization_id, bucket) in gated.admitted {
            for ((project_id, user_id), spans) in bucket.projects {
                let count = spans.len();
                match self.store.ingest(&project_id, &user_id, spans).await {
                    Ok(()) => forwarded += count,
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            organization_id = %organization_id,
                            project_id = %project_id,
                            count,
                            "Failed to store spans"
                        );
                        tokio::time::sleep(self.store_backoff).await;
                    }
                }
            }
        }

        let ack = self.consumer.ack_and_delete(&decoded.processed).await;
        let report = BatchReport {
            read: messages.len(),
            acked: ack.acked as usize,
            forwarded,
            dropped: gated.dropped_spans,
            truncated: decoded.truncated,
            decode_failures: decoded.decode_failures,
        };

        tracing::debug!(
            read = report.read,
            acked = report.acked,
            forwarded = report.forwarded,
            dropped = report.dropped,
            truncated = report.truncated,
            decode_failures = report.decode_failures,
            "Batch processed"
        );
        report
    }
}
