//! In-memory stream backend
//!
//! Simulates Redis Streams consumer groups inside one process:
//! - Entries live in an ordered map keyed by a sequence ID
//! - Each group tracks its last delivered ID and a pending entries list
//! - Blocking reads park on a per-stream `Notify` woken by publishes
//!
//! ## Limitations
//!
//! Suitable for local development, tests and single-process deployments:
//! - Process crash = all messages lost (no persistence)
//! - No cross-process coordination
//!
//! For production durability and multi-machine deployments, use Redis backend.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Notify;

use super::backend::{ReadCursor, ReadOptions, StreamBackend, StreamMessage, StreamStats};
use super::error::TopicError;
use crate::core::constants::DEFAULT_STREAM_MAXLEN;

/// Delivery record of a pending entry
#[derive(Debug, Clone)]
struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
}

/// Consumer group state for a stream
#[derive(Debug, Default)]
struct ConsumerGroup {
    /// Highest ID handed out to any consumer of the group
    last_delivered: u64,
    /// Pending entries: message_id -> delivery record
    pending: BTreeMap<u64, PendingEntry>,
    /// Consumers that have read from the group
    consumers: HashSet<String>,
}

/// Stream state
#[derive(Debug)]
struct StreamState {
    messages: BTreeMap<u64, Vec<u8>>,
    groups: HashMap<String, ConsumerGroup>,
    next_id: u64,
    max_len: usize,
}

impl Default for StreamState {
    fn default() -> Self {
        Self {
            messages: BTreeMap::new(),
            groups: HashMap::new(),
            next_id: 1,
            max_len: DEFAULT_STREAM_MAXLEN as usize,
        }
    }
}

impl StreamState {
    /// Trim stream to max length, oldest first
    fn trim(&mut self) {
        while self.messages.len() > self.max_len {
            if self.messages.pop_first().is_none() {
                break;
            }
        }
    }
}

/// Shared state for memory backend
#[derive(Default)]
struct SharedState {
    streams: RwLock<HashMap<String, StreamState>>,
    /// Per-stream notifiers for immediate reader wakeup (avoids polling)
    notifiers: RwLock<HashMap<String, Arc<Notify>>>,
}

/// In-memory stream backend
#[derive(Clone, Default)]
pub struct MemoryStreamBackend {
    state: Arc<SharedState>,
}

impl MemoryStreamBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create a Notify for a stream (for immediate reader wakeup)
    fn notifier(&self, stream: &str) -> Arc<Notify> {
        {
            let notifiers = self.state.notifiers.read();
            if let Some(n) = notifiers.get(stream) {
                return Arc::clone(n);
            }
        }
        let mut notifiers = self.state.notifiers.write();
        Arc::clone(notifiers.entry(stream.to_string()).or_default())
    }

    /// Single non-blocking pass of a group read
    fn read_now(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        cursor: ReadCursor,
        count: usize,
    ) -> Result<Vec<StreamMessage>, TopicError> {
        let mut streams = self.state.streams.write();
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| TopicError::ConsumerGroup(format!("no such stream: {stream}")))?;
        let StreamState {
            messages, groups, ..
        } = state;
        let cg = groups
            .get_mut(group)
            .ok_or_else(|| TopicError::ConsumerGroup(format!("no such group: {group}")))?;
        cg.consumers.insert(consumer.to_string());

        let mut out = Vec::new();
        match cursor {
            ReadCursor::Pending => {
                for (id, entry) in &cg.pending {
                    if out.len() >= count {
                        break;
                    }
                    if entry.consumer != consumer {
                        continue;
                    }
                    // Deleted entries stay in the PEL until acked, but carry no payload
                    if let Some(payload) = messages.get(id) {
                        out.push(StreamMessage {
                            id: id.to_string(),
                            payload: payload.clone(),
                        });
                    }
                }
            }
            ReadCursor::New => {
                let now = Instant::now();
                let start = cg.last_delivered.saturating_add(1);
                for (id, payload) in messages.range(start..).take(count) {
                    cg.pending.insert(
                        *id,
                        PendingEntry {
                            consumer: consumer.to_string(),
                            delivered_at: now,
                        },
                    );
                    cg.last_delivered = *id;
                    out.push(StreamMessage {
                        id: id.to_string(),
                        payload: payload.clone(),
                    });
                }
            }
        }
        Ok(out)
    }
}

/// Parse memory sequence IDs, skipping anything that is not one
fn parse_ids(ids: &[String]) -> Vec<u64> {
    ids.iter().filter_map(|id| id.parse().ok()).collect()
}

#[async_trait]
impl StreamBackend for MemoryStreamBackend {
    async fn stream_publish(&self, stream: &str, payload: &[u8]) -> Result<String, TopicError> {
        let id = {
            let mut streams = self.state.streams.write();
            let state = streams.entry(stream.to_string()).or_default();
            let id = state.next_id;
            state.next_id += 1;
            state.messages.insert(id, payload.to_vec());
            state.trim();
            id
        };

        self.notifier(stream).notify_waiters();
        Ok(id.to_string())
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<(), TopicError> {
        let mut streams = self.state.streams.write();
        let state = streams.entry(stream.to_string()).or_default();
        if state.groups.contains_key(group) {
            return Err(TopicError::GroupExists(group.to_string()));
        }
        state.groups.insert(group.to_string(), ConsumerGroup::default());
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        opts: ReadOptions,
    ) -> Result<Vec<StreamMessage>, TopicError> {
        if opts.count == 0 {
            return Ok(Vec::new());
        }

        let block = match (opts.cursor, opts.block) {
            (ReadCursor::New, Some(block)) => block,
            _ => return self.read_now(stream, group, consumer, opts.cursor, opts.count),
        };

        let deadline = tokio::time::Instant::now() + block;
        let notifier = self.notifier(stream);
        loop {
            // Register interest before checking so a publish in between is not missed
            let notified = notifier.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let messages = self.read_now(stream, group, consumer, opts.cursor, opts.count)?;
            if !messages.is_empty() {
                return Ok(messages);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<u64, TopicError> {
        let mut streams = self.state.streams.write();
        let Some(cg) = streams
            .get_mut(stream)
            .and_then(|state| state.groups.get_mut(group))
        else {
            return Ok(0);
        };

        let acked = parse_ids(ids)
            .into_iter()
            .filter(|id| cg.pending.remove(id).is_some())
            .count();
        Ok(acked as u64)
    }

    async fn delete(&self, stream: &str, ids: &[String]) -> Result<u64, TopicError> {
        let mut streams = self.state.streams.write();
        let Some(state) = streams.get_mut(stream) else {
            return Ok(0);
        };

        let deleted = parse_ids(ids)
            .into_iter()
            .filter(|id| state.messages.remove(id).is_some())
            .count();
        Ok(deleted as u64)
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamMessage>, TopicError> {
        let mut streams = self.state.streams.write();
        let Some(state) = streams.get_mut(stream) else {
            return Ok(vec![]);
        };
        let StreamState {
            messages, groups, ..
        } = state;
        let Some(cg) = groups.get_mut(group) else {
            return Ok(vec![]);
        };

        let now = Instant::now();
        let idle_ids: Vec<u64> = cg
            .pending
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.delivered_at) >= min_idle)
            .map(|(&id, _)| id)
            .take(count)
            .collect();

        let mut claimed = Vec::new();
        for id in idle_ids {
            match messages.get(&id) {
                Some(payload) => {
                    cg.pending.insert(
                        id,
                        PendingEntry {
                            consumer: consumer.to_string(),
                            delivered_at: now,
                        },
                    );
                    claimed.push(StreamMessage {
                        id: id.to_string(),
                        payload: payload.clone(),
                    });
                }
                None => {
                    // Entry deleted from the stream: drop it from the PEL
                    cg.pending.remove(&id);
                }
            }
        }
        if !claimed.is_empty() {
            cg.consumers.insert(consumer.to_string());
        }
        Ok(claimed)
    }

    async fn stream_stats(&self, stream: &str, group: &str) -> Result<StreamStats, TopicError> {
        let streams = self.state.streams.read();
        let Some(state) = streams.get(stream) else {
            return Ok(StreamStats::default());
        };

        let length = state.messages.len() as u64;
        let Some(cg) = state.groups.get(group) else {
            return Ok(StreamStats {
                length,
                ..Default::default()
            });
        };

        let now = Instant::now();
        let oldest_pending_ms = cg
            .pending
            .values()
            .map(|entry| now.duration_since(entry.delivered_at).as_millis() as u64)
            .max();

        Ok(StreamStats {
            length,
            pending: cg.pending.len() as u64,
            consumers: cg.consumers.len() as u64,
            oldest_pending_ms,
        })
    }

    async fn health_check(&self) -> Result<(), TopicError> {
        // In-memory backend is always healthy
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
