//! Stream error types

use thiserror::Error;

/// Error type for stream operations
#[derive(Error, Debug)]
pub enum TopicError {
    /// Consumer group already exists (callers creating groups usually ignore this)
    #[error("consumer group already exists: {0}")]
    GroupExists(String),

    /// Consumer group missing on the stream
    #[error("consumer group error: {0}")]
    ConsumerGroup(String),

    /// Connection error (Redis)
    #[error("connection error: {0}")]
    Connection(String),

    /// Stream operation error
    #[error("stream error: {0}")]
    Stream(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl TopicError {
    pub fn is_group_exists(&self) -> bool {
        matches!(self, TopicError::GroupExists(_))
    }
}

impl From<deadpool_redis::PoolError> for TopicError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        TopicError::Connection(err.to_string())
    }
}

impl From<deadpool_redis::redis::RedisError> for TopicError {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        TopicError::Stream(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_exists_display() {
        let err = TopicError::GroupExists("span_ingest".to_string());
        assert_eq!(err.to_string(), "consumer group already exists: span_ingest");
        assert!(err.is_group_exists());
    }

    #[test]
    fn test_other_errors_are_not_group_exists() {
        assert!(!TopicError::Stream("boom".into()).is_group_exists());
        assert!(!TopicError::Connection("refused".into()).is_group_exists());
    }
}
