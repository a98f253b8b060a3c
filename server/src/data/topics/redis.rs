//! Redis stream backend
//!
//! Uses Redis Streams for at-least-once delivery:
//! - `XADD` for publishing (with MAXLEN trimming)
//! - `XGROUP CREATE ... MKSTREAM` for consumer groups
//! - `XREADGROUP` for consuming (`>` for new entries, `0` for own pending)
//! - `XACK` + `XDEL` once a batch is processed
//! - `XPENDING` + `XCLAIM` for recovery of stuck messages
//!
//! ## Key Prefixes
//!
//! - Streams: `{tracehub}:stream:{name}` (hash tag for cluster compatibility)

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::{RedisResult, Value as RedisValue};
use deadpool_redis::{Config, Pool, Runtime};

use super::backend::{ReadCursor, ReadOptions, StreamBackend, StreamMessage, StreamStats};
use super::error::TopicError;
use crate::core::constants::{DEFAULT_STREAM_MAXLEN, STREAM_KEY_PREFIX, STREAM_PAYLOAD_FIELD};

/// Redis stream backend
pub struct RedisStreamBackend {
    pool: Pool,
    /// Stream max length (approximate)
    stream_maxlen: u64,
}

impl RedisStreamBackend {
    /// Create a new Redis stream backend and validate the connection
    pub async fn new(redis_url: &str) -> Result<Self, TopicError> {
        let sanitized_url = sanitize_redis_url(redis_url);

        let mut config = Config::from_url(redis_url);
        config.pool = Some(deadpool_redis::PoolConfig {
            max_size: 8,
            timeouts: deadpool_redis::Timeouts {
                wait: Some(Duration::from_secs(5)),
                create: Some(Duration::from_secs(5)),
                recycle: Some(Duration::from_secs(5)),
            },
            ..Default::default()
        });

        let pool = config.create_pool(Some(Runtime::Tokio1)).map_err(|e| {
            TopicError::Connection(format!(
                "Failed to create Redis pool for {sanitized_url}: {e}"
            ))
        })?;

        let mut conn = pool.get().await.map_err(|e| {
            TopicError::Connection(format!(
                "Failed to get Redis connection from pool for {sanitized_url}: {e}"
            ))
        })?;

        deadpool_redis::redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| {
                TopicError::Connection(format!("Redis PING failed for {sanitized_url}: {e}"))
            })?;

        tracing::debug!(url = %sanitized_url, "Redis stream backend connected");

        Ok(Self {
            pool,
            stream_maxlen: DEFAULT_STREAM_MAXLEN,
        })
    }
}

/// Get stream key with prefix
fn stream_key(stream: &str) -> String {
    format!("{}{}", STREAM_KEY_PREFIX, stream)
}

/// Redis cursor argument for a group read
fn cursor_arg(cursor: ReadCursor) -> &'static str {
    match cursor {
        ReadCursor::Pending => "0",
        ReadCursor::New => ">",
    }
}

#[async_trait]
impl StreamBackend for RedisStreamBackend {
    async fn stream_publish(&self, stream: &str, payload: &[u8]) -> Result<String, TopicError> {
        let key = stream_key(stream);
        let mut conn = self.pool.get().await?;

        let id: String = deadpool_redis::redis::cmd("XADD")
            .arg(&key)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.stream_maxlen)
            .arg("*")
            .arg(STREAM_PAYLOAD_FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await?;

        Ok(id)
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<(), TopicError> {
        let key = stream_key(stream);
        let mut conn = self.pool.get().await?;

        let result: RedisResult<String> = deadpool_redis::redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&key)
            .arg(group)
            .arg("0") // Start from beginning to pick up messages published before consumer
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                Err(TopicError::GroupExists(group.to_string()))
            }
            Err(e) => Err(TopicError::ConsumerGroup(format!(
                "Failed to create consumer group {group}: {e}"
            ))),
        }
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
        let key = stream_key(stream);
        let mut conn = self.pool.get().await?;

        let mut cmd = deadpool_redis::redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer);
        if let Some(block) = opts.block {
            // BLOCK 0 means forever
            cmd.arg("BLOCK").arg((block.as_millis() as u64).max(1));
        }
        cmd.arg("COUNT")
            .arg(opts.count)
            .arg("STREAMS")
            .arg(&key)
            .arg(cursor_arg(opts.cursor));

        let result: RedisResult<RedisValue> = cmd.query_async(&mut conn).await;
        match result {
            Ok(RedisValue::Nil) => Ok(Vec::new()),
            Ok(value) => Ok(parse_xreadgroup_response(value)),
            Err(e) if e.to_string().contains("NOGROUP") => Err(TopicError::ConsumerGroup(
                format!("consumer group {group} missing on {key}: {e}"),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<u64, TopicError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let key = stream_key(stream);
        let mut conn = self.pool.get().await?;

        let mut cmd = deadpool_redis::redis::cmd("XACK");
        cmd.arg(&key).arg(group);
        for id in ids {
            cmd.arg(id.as_str());
        }
        let acked: u64 = cmd.query_async(&mut conn).await?;
        Ok(acked)
    }

    async fn delete(&self, stream: &str, ids: &[String]) -> Result<u64, TopicError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let key = stream_key(stream);
        let mut conn = self.pool.get().await?;

        let mut cmd = deadpool_redis::redis::cmd("XDEL");
        cmd.arg(&key);
        for id in ids {
            cmd.arg(id.as_str());
        }
        let deleted: u64 = cmd.query_async(&mut conn).await?;
        Ok(deleted)
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamMessage>, TopicError> {
        let key = stream_key(stream);
        let min_idle_ms = min_idle.as_millis() as u64;
        let mut conn = self.pool.get().await?;

        let pending: RedisValue = deadpool_redis::redis::cmd("XPENDING")
            .arg(&key)
            .arg(group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let ids_to_claim = parse_idle_pending_ids(pending, min_idle_ms);
        if ids_to_claim.is_empty() {
            return Ok(vec![]);
        }

        let mut cmd = deadpool_redis::redis::cmd("XCLAIM");
        cmd.arg(&key).arg(group).arg(consumer).arg(min_idle_ms);
        for id in &ids_to_claim {
            cmd.arg(id);
        }

        let claimed: RedisValue = cmd.query_async(&mut conn).await?;
        Ok(parse_entries(&claimed))
    }

    async fn stream_stats(&self, stream: &str, group: &str) -> Result<StreamStats, TopicError> {
        let key = stream_key(stream);
        let mut conn = self.pool.get().await?;

        let length: u64 = deadpool_redis::redis::cmd("XLEN")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .unwrap_or(0);

        let pending_info: RedisValue = deadpool_redis::redis::cmd("XPENDING")
            .arg(&key)
            .arg(group)
            .query_async(&mut conn)
            .await
            .unwrap_or(RedisValue::Nil);

        let mut pending = 0u64;
        let mut consumers = 0u64;
        let mut oldest_pending_ms = None;

        if let RedisValue::Array(parts) = pending_info
            && parts.len() >= 4
        {
            // [pending_count, smallest_id, largest_id, [[consumer, count], ...]]
            if let RedisValue::Int(p) = &parts[0] {
                pending = *p as u64;
            }
            if let RedisValue::Array(consumer_list) = &parts[3] {
                consumers = consumer_list.len() as u64;
            }
        }

        if pending > 0 {
            let pending_detail: RedisValue = deadpool_redis::redis::cmd("XPENDING")
                .arg(&key)
                .arg(group)
                .arg("-")
                .arg("+")
                .arg(1)
                .query_async(&mut conn)
                .await
                .unwrap_or(RedisValue::Nil);

            if let RedisValue::Array(entries) = pending_detail
                && let Some(RedisValue::Array(parts)) = entries.first()
                && parts.len() >= 3
                && let RedisValue::Int(idle) = &parts[2]
            {
                oldest_pending_ms = Some(*idle as u64);
            }
        }

        Ok(StreamStats {
            length,
            pending,
            consumers,
            oldest_pending_ms,
        })
    }

    async fn health_check(&self) -> Result<(), TopicError> {
        let mut conn = self.pool.get().await?;

        deadpool_redis::redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| TopicError::Connection(e.to_string()))?;

        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

/// Parse XREADGROUP response to extract messages
///
/// Response format: `[[stream_name, [[id, [field, value, ...]], ...]]]`.
/// Entries without a payload (deleted after delivery, or written by another
/// producer) come back with an empty payload so the consumer can ack them.
fn parse_xreadgroup_response(value: RedisValue) -> Vec<StreamMessage> {
    let RedisValue::Array(streams) = value else {
        return Vec::new();
    };

    let mut messages = Vec::new();
    for stream_data in streams {
        let RedisValue::Array(parts) = stream_data else {
            continue;
        };
        if parts.len() < 2 {
            continue;
        }
        messages.extend(parse_entries(&parts[1]));
    }
    messages
}

/// Parse a list of `[id, [field, value, ...]]` stream entries
fn parse_entries(value: &RedisValue) -> Vec<StreamMessage> {
    let RedisValue::Array(entries) = value else {
        return Vec::new();
    };

    let mut messages = Vec::new();
    for entry in entries {
        let RedisValue::Array(parts) = entry else {
            continue;
        };
        let Some(RedisValue::BulkString(id_bytes)) = parts.first() else {
            continue;
        };
        let Ok(id) = String::from_utf8(id_bytes.clone()) else {
            tracing::warn!("Skipping stream entry with non-UTF-8 id");
            continue;
        };

        let payload = match parts.get(1) {
            Some(RedisValue::Array(fields)) => extract_payload_from_fields(fields),
            _ => None,
        };
        let payload = payload.unwrap_or_else(|| {
            tracing::warn!(msg_id = %id, "Stream entry has no payload field");
            Vec::new()
        });
        messages.push(StreamMessage { id, payload });
    }
    messages
}

/// Parse XPENDING extended form, keeping IDs idle at least `min_idle_ms`
fn parse_idle_pending_ids(pending: RedisValue, min_idle_ms: u64) -> Vec<String> {
    let mut ids = Vec::new();
    if let RedisValue::Array(entries) = pending {
        for entry in entries {
            // [id, consumer, idle_time, delivery_count]
            if let RedisValue::Array(parts) = entry
                && parts.len() >= 3
                && let (RedisValue::BulkString(id_bytes), RedisValue::Int(idle)) =
                    (&parts[0], &parts[2])
                && *idle as u64 >= min_idle_ms
                && let Ok(id) = String::from_utf8(id_bytes.clone())
            {
                ids.push(id);
            }
        }
    }
    ids
}

/// Extract payload field from Redis stream entry fields
fn extract_payload_from_fields(fields: &[RedisValue]) -> Option<Vec<u8>> {
    // Fields are [field1, value1, field2, value2, ...]
    let mut iter = fields.iter();
    while let Some(field) = iter.next() {
        if let RedisValue::BulkString(field_name) = field {
            if field_name.as_slice() == STREAM_PAYLOAD_FIELD.as_bytes() {
                if let Some(RedisValue::BulkString(payload)) = iter.next() {
                    return Some(payload.clone());
                }
            } else {
                iter.next();
            }
        }
    }
    None
}

/// Sanitize Redis URL for logging (removes password)
pub(crate) fn sanitize_redis_url(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
        if let Some(colon_pos) = url[scheme_end..at_pos].find(':') {
            let abs_colon = scheme_end + colon_pos;
            let prefix = &url[..abs_colon + 1];
            let suffix = &url[at_pos..];
            return format!("{prefix}***{suffix}");
        }
    }
    url.to_string()
}
