// =============================================================================
// Application Identity
// =============================================================================

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "tracehub";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".tracehub";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "tracehub.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "TRACEHUB_CONFIG";

/// Environment variable for debug mode
pub const ENV_DEBUG: &str = "TRACEHUB_DEBUG";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "TRACEHUB_LOG";

// =============================================================================
// Environment Variables - Worker
// =============================================================================

pub const ENV_STREAM_NAME: &str = "TRACEHUB_STREAM_NAME";
pub const ENV_CONSUMER_GROUP: &str = "TRACEHUB_CONSUMER_GROUP";
pub const ENV_CONSUMER_NAME: &str = "TRACEHUB_CONSUMER_NAME";
pub const ENV_MAX_BATCH_SIZE: &str = "TRACEHUB_MAX_BATCH_SIZE";
pub const ENV_MAX_BLOCK_MS: &str = "TRACEHUB_MAX_BLOCK_MS";
pub const ENV_MAX_DELAY_MS: &str = "TRACEHUB_MAX_DELAY_MS";
pub const ENV_MAX_BATCH_MB: &str = "TRACEHUB_MAX_BATCH_MB";

// =============================================================================
// Environment Variables - Backends
// =============================================================================

/// Stream backend (memory or redis)
pub const ENV_STREAM_BACKEND: &str = "TRACEHUB_STREAM_BACKEND";

/// Redis URL for the stream backend
pub const ENV_REDIS_URL: &str = "TRACEHUB_REDIS_URL";

pub const ENV_ENTITLEMENTS_ENABLED: &str = "TRACEHUB_ENTITLEMENTS_ENABLED";
pub const ENV_ENTITLEMENTS_BACKEND: &str = "TRACEHUB_ENTITLEMENTS_BACKEND";
pub const ENV_ENTITLEMENTS_URL: &str = "TRACEHUB_ENTITLEMENTS_URL";

pub const ENV_STORE_BACKEND: &str = "TRACEHUB_STORE_BACKEND";
pub const ENV_STORE_URL: &str = "TRACEHUB_STORE_URL";

// =============================================================================
// Worker Defaults
// =============================================================================

pub const DEFAULT_STREAM_NAME: &str = "spans";
pub const DEFAULT_CONSUMER_GROUP: &str = "span_ingest";

/// Prefix for the default consumer name (`worker-<pid>`)
pub const DEFAULT_CONSUMER_PREFIX: &str = "worker";

pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;
pub const DEFAULT_MAX_BLOCK_MS: u64 = 5_000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 250;
pub const DEFAULT_MAX_BATCH_MB: u64 = 50;

/// Lower bound for the follow-up reads of a batch window
pub const MIN_BATCH_BLOCK_MS: u64 = 10;

/// Interval for claiming stuck messages (seconds)
pub const DEFAULT_CLAIM_INTERVAL_SECS: u64 = 30;

/// Minimum idle time before claiming a message (milliseconds)
pub const DEFAULT_CLAIM_MIN_IDLE_MS: u64 = 60_000;

/// Maximum number of messages to claim at once
pub const CLAIM_MAX_COUNT: usize = 100;

/// Sleep after a failed store call
pub const DEFAULT_STORE_BACKOFF_MS: u64 = 100;

/// Sleep after an unexpected loop-level failure
pub const LOOP_ERROR_BACKOFF_SECS: u64 = 1;

// =============================================================================
// Streams
// =============================================================================

/// Stream key prefix (hash tag for Redis Cluster)
pub const STREAM_KEY_PREFIX: &str = "{tracehub}:stream:";

/// Default MAXLEN for streams (approximate trimming)
pub const DEFAULT_STREAM_MAXLEN: u64 = 100_000;

/// Field name of the single payload entry in each stream message
pub const STREAM_PAYLOAD_FIELD: &str = "payload";

// =============================================================================
// Entitlements
// =============================================================================

/// Counter adjusted by trace ingestion
pub const COUNTER_TRACES: &str = "traces";

/// Timeout for HTTP entitlement and store calls
pub const HTTP_CLIENT_TIMEOUT_SECS: u64 = 10;

/// Batches kept by the in-memory span store before the oldest are evicted
pub const MEMORY_STORE_MAX_BATCHES: usize = 1_000;

// =============================================================================
// Shutdown
// =============================================================================

/// Graceful shutdown timeout (seconds)
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;
