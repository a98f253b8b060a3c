//! Time/size windowed batching
//!
//! The first read blocks for up to `max_block`. If it returns a partial
//! batch, follow-up reads ask only for the missing count and block for the
//! rest of a `max_delay` window (never less than `MIN_BATCH_BLOCK_MS`). The
//! batch closes when it is full or the window has elapsed, so a batch takes
//! at most `max_block + max_delay`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::core::constants::MIN_BATCH_BLOCK_MS;
use crate::data::topics::{StreamMessage, TopicError};

/// Blocking reader of new stream entries
#[async_trait]
pub trait BatchSource: Send + Sync {
    /// Read up to `count` new entries, blocking at most `block`
    async fn read_new(
        &self,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>, TopicError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchAccumulator {
    max_batch_size: usize,
    max_block: Duration,
    max_delay: Duration,
}

impl BatchAccumulator {
    pub fn new(max_batch_size: usize, max_block: Duration, max_delay: Duration) -> Self {
        Self {
            max_batch_size: max_batch_size.max(1),
            max_block,
            max_delay,
        }
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Collect one batch; empty when the first read timed out
    pub async fn accumulate<S: BatchSource + ?Sized>(
        &self,
        source: &S,
    ) -> Result<Vec<StreamMessage>, TopicError> {
        let mut batch = source.read_new(self.max_batch_size, self.max_block).await?;
        if batch.is_empty() || batch.len() >= self.max_batch_size {
            return Ok(batch);
        }

        let min_block = Duration::from_millis(MIN_BATCH_BLOCK_MS);
        let deadline = Instant::now() + self.max_delay;
        while batch.len() < self.max_batch_size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let more = source
                .read_new(self.max_batch_size - batch.len(), remaining.max(min_block))
                .await?;
            tracing::trace!(read = more.len(), total = batch.len() + more.len(), "Batch follow-up read");
            batch.extend(more);
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;

    /// Returns scripted reads, sleeping the full block time on an empty one
    struct ScriptedSource {
        reads: Mutex<VecDeque<usize>>,
        calls: Mutex<Vec<(usize, Duration)>>,
        next_id: Mutex<u64>,
    }

    impl ScriptedSource {
        fn new(reads: &[usize]) -> Self {
            Self {
                reads: Mutex::new(reads.iter().copied().collect()),
                calls: Mutex::new(Vec::new()),
                next_id: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl BatchSource for ScriptedSource {
        async fn read_new(
            &self,
            count: usize,
            block: Duration,
        ) -> Result<Vec<StreamMessage>, TopicError> {
            self.calls.lock().push((count, block));
            let available = self.reads.lock().pop_front().unwrap_or(0).min(count);
            if available == 0 {
                tokio::time::sleep(block).await;
                return Ok(Vec::new());
            }
            let mut next_id = self.next_id.lock();
            Ok((0..available)
                .map(|_| {
                    *next_id += 1;
                    StreamMessage {
                        id: next_id.to_string(),
                        payload: vec![0u8; 4],
                    }
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_full_first_read_returns_immediately() {
        let source = ScriptedSource::new(&[5]);
        let acc = BatchAccumulator::new(5, Duration::from_millis(50), Duration::from_millis(50));
        let batch = acc.accumulate(&source).await.unwrap();
        assert_eq!(batch.len(), 5);
        assert_eq!(source.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_follow_up_reads_request_missing_count() {
        let source = ScriptedSource::new(&[1, 1, 1]);
        let acc = BatchAccumulator::new(3, Duration::from_millis(50), Duration::from_millis(500));
        let batch = acc.accumulate(&source).await.unwrap();
        assert_eq!(batch.len(), 3);

        let counts: Vec<usize> = source.calls.lock().iter().map(|(c, _)| *c).collect();
        assert_eq!(counts, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_empty_first_read_returns_empty() {
        let source = ScriptedSource::new(&[0]);
        let acc = BatchAccumulator::new(3, Duration::from_millis(20), Duration::from_millis(500));
        let batch = acc.accumulate(&source).await.unwrap();
        assert!(batch.is_empty());
        assert_eq!(source.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_batch_closes_after_delay_window() {
        let source = ScriptedSource::new(&[2]);
        let max_block = Duration::from_millis(40);
        let max_delay = Duration::from_millis(60);
        let acc = BatchAccumulator::new(10, max_block, max_delay);

        let started = std::time::Instant::now();
        let batch = acc.accumulate(&source).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(batch.len(), 2);
        assert!(elapsed >= max_delay);
        // Follow-up reads never block below the floor, allow scheduler slack on top
        assert!(elapsed < max_block + max_delay + Duration::from_millis(MIN_BATCH_BLOCK_MS + 200));

        let calls = source.calls.lock();
        assert_eq!(calls[0], (10, max_block));
        assert!(calls[1..].iter().all(|(count, block)| *count == 8
            && *block >= Duration::from_millis(MIN_BATCH_BLOCK_MS)
            && *block <= max_delay));
    }
}
