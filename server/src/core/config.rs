use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::utils::file::{expand_path, profile_path, read_json};

use super::cli::CliConfig;
use super::constants::{
    CONFIG_FILE_NAME, DEFAULT_CLAIM_INTERVAL_SECS, DEFAULT_CLAIM_MIN_IDLE_MS,
    DEFAULT_CONSUMER_GROUP, DEFAULT_CONSUMER_PREFIX, DEFAULT_MAX_BATCH_MB, DEFAULT_MAX_BATCH_SIZE,
    DEFAULT_MAX_BLOCK_MS, DEFAULT_MAX_DELAY_MS, DEFAULT_STORE_BACKOFF_MS, DEFAULT_STREAM_NAME,
};

// =============================================================================
// Backend Enums
// =============================================================================

/// Stream backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamBackendType {
    #[default]
    Memory,
    Redis,
}

impl fmt::Display for StreamBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamBackendType::Memory => write!(f, "memory"),
            StreamBackendType::Redis => write!(f, "redis"),
        }
    }
}

/// Entitlements (quota meter) backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntitlementsBackendType {
    #[default]
    Memory,
    Http,
}

impl fmt::Display for EntitlementsBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntitlementsBackendType::Memory => write!(f, "memory"),
            EntitlementsBackendType::Http => write!(f, "http"),
        }
    }
}

/// Span store backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendType {
    #[default]
    Memory,
    Http,
}

impl fmt::Display for StoreBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackendType::Memory => write!(f, "memory"),
            StoreBackendType::Http => write!(f, "http"),
        }
    }
}

// =============================================================================
// File Config (JSON)
// =============================================================================

/// Worker configuration section (from JSON config file)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct WorkerFileConfig {
    pub stream_name: Option<String>,
    pub consumer_group: Option<String>,
    pub consumer_name: Option<String>,
    pub max_batch_size: Option<usize>,
    pub max_block_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    /// Byte budget of one batch in MiB
    pub max_batch_mb: Option<u64>,
    pub claim_interval_secs: Option<u64>,
    pub claim_min_idle_ms: Option<u64>,
    pub store_backoff_ms: Option<u64>,
}

/// Stream configuration section (from JSON config file)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct StreamFileConfig {
    pub backend: Option<StreamBackendType>,
    /// Connection URL for Redis-compatible backends
    pub redis_url: Option<String>,
}

/// Entitlements configuration section (from JSON config file)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct EntitlementsFileConfig {
    pub enabled: Option<bool>,
    pub backend: Option<EntitlementsBackendType>,
    pub url: Option<String>,
    /// Counter name to limit, for the memory backend
    pub limits: Option<HashMap<String, i64>>,
}

/// Span store configuration section (from JSON config file)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct StoreFileConfig {
    pub backend: Option<StoreBackendType>,
    pub url: Option<String>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub worker: Option<WorkerFileConfig>,
    pub stream: Option<StreamFileConfig>,
    pub entitlements: Option<EntitlementsFileConfig>,
    pub store: Option<StoreFileConfig>,
    pub debug: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// Copy every `Some` field of `$other` onto `$current`
macro_rules! merge_fields {
    ($current:expr, $other:expr, $section:literal, [$($field:ident),+ $(,)?]) => {
        $(
            if $other.$field.is_some() {
                tracing::trace!(
                    section = $section,
                    field = stringify!($field),
                    value = ?$other.$field,
                    "Merging config value"
                );
                $current.$field = $other.$field;
            }
        )+
    };
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let config: Self = read_json(path, "config file")?;
        tracing::trace!(config = ?config, "Parsed config file");
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }

    /// Merge another FileConfig into this one (other takes precedence)
    fn merge(&mut self, other: FileConfig) {
        if let Some(worker) = other.worker {
            let current = self.worker.get_or_insert_with(WorkerFileConfig::default);
            merge_fields!(
                current,
                worker,
                "worker",
                [
                    stream_name,
                    consumer_group,
                    consumer_name,
                    max_batch_size,
                    max_block_ms,
                    max_delay_ms,
                    max_batch_mb,
                    claim_interval_secs,
                    claim_min_idle_ms,
                    store_backoff_ms,
                ]
            );
        }

        if let Some(stream) = other.stream {
            let current = self.stream.get_or_insert_with(StreamFileConfig::default);
            merge_fields!(current, stream, "stream", [backend, redis_url]);
        }

        if let Some(entitlements) = other.entitlements {
            let current = self
                .entitlements
                .get_or_insert_with(EntitlementsFileConfig::default);
            merge_fields!(
                current,
                entitlements,
                "entitlements",
                [enabled, backend, url]
            );
            // Limits merge per counter
            if let Some(limits) = entitlements.limits {
                let current_limits = current.limits.get_or_insert_with(HashMap::new);
                for (key, limit) in limits {
                    tracing::trace!(key = %key, limit, "Merging entitlements.limits");
                    current_limits.insert(key, limit);
                }
            }
        }

        if let Some(store) = other.store {
            let current = self.store.get_or_insert_with(StoreFileConfig::default);
            merge_fields!(current, store, "store", [backend, url]);
        }

        if other.debug.is_some() {
            tracing::trace!(debug = ?other.debug, "Merging debug");
            self.debug = other.debug;
        }
    }
}

// =============================================================================
// Runtime Config
// =============================================================================

/// Ingestion worker settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub stream_name: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub max_batch_size: usize,
    pub max_block_ms: u64,
    pub max_delay_ms: u64,
    pub max_batch_mb: u64,
    pub claim_interval_secs: u64,
    pub claim_min_idle_ms: u64,
    pub store_backoff_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            stream_name: DEFAULT_STREAM_NAME.to_string(),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            consumer_name: default_consumer_name(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_block_ms: DEFAULT_MAX_BLOCK_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_batch_mb: DEFAULT_MAX_BATCH_MB,
            claim_interval_secs: DEFAULT_CLAIM_INTERVAL_SECS,
            claim_min_idle_ms: DEFAULT_CLAIM_MIN_IDLE_MS,
            store_backoff_ms: DEFAULT_STORE_BACKOFF_MS,
        }
    }
}

impl WorkerConfig {
    pub fn max_block(&self) -> Duration {
        Duration::from_millis(self.max_block_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Byte budget of one batch
    pub fn max_batch_bytes(&self) -> usize {
        (self.max_batch_mb as usize).saturating_mul(1024 * 1024)
    }

    pub fn claim_interval(&self) -> Duration {
        Duration::from_secs(self.claim_interval_secs)
    }

    pub fn claim_min_idle(&self) -> Duration {
        Duration::from_millis(self.claim_min_idle_ms)
    }

    pub fn store_backoff(&self) -> Duration {
        Duration::from_millis(self.store_backoff_ms)
    }
}

/// `worker-<pid>`
fn default_consumer_name() -> String {
    format!("{}-{}", DEFAULT_CONSUMER_PREFIX, std::process::id())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamConfig {
    pub backend: StreamBackendType,
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitlementsConfig {
    pub enabled: bool,
    pub backend: EntitlementsBackendType,
    pub url: Option<String>,
    pub limits: HashMap<String, i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: StoreBackendType,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub worker: WorkerConfig,
    pub stream: StreamConfig,
    pub entitlements: EntitlementsConfig,
    pub store: StoreConfig,
    pub debug: bool,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Profile directory config (~/.tracehub/tracehub.json)
    /// 3. Local directory config OR CLI-specified config path
    /// 4. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");
        tracing::trace!(cli = ?cli, "CLI config");

        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        // 1. Load from profile dir (~/.tracehub/tracehub.json) - skip if not exists
        if let Some(profile_path) = profile_path(CONFIG_FILE_NAME)
            && profile_path.exists()
        {
            let profile_config = FileConfig::load_from_file(&profile_path)?;
            profile_config.warn_unknown_fields();
            file_config.merge(profile_config);
            found_configs.push(profile_path.display().to_string());
        }

        // 2. Load from CLI-specified path OR local directory
        let overlay_path = if let Some(ref path) = cli.config {
            let expanded = expand_path(&path.to_string_lossy());
            if !expanded.exists() {
                anyhow::bail!("Config file not found: {}", expanded.display());
            }
            Some(expanded)
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        if let Some(path) = overlay_path {
            let overlay_config = FileConfig::load_from_file(&path)?;
            overlay_config.warn_unknown_fields();
            file_config.merge(overlay_config);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "Config files loaded");

        Self::from_layers(file_config, cli)
    }

    /// Layer defaults, merged file config and CLI/env overrides
    fn from_layers(file_config: FileConfig, cli: &CliConfig) -> Result<Self> {
        let file_worker = file_config.worker.unwrap_or_default();
        let file_stream = file_config.stream.unwrap_or_default();
        let file_entitlements = file_config.entitlements.unwrap_or_default();
        let file_store = file_config.store.unwrap_or_default();
        let defaults = WorkerConfig::default();

        let worker = WorkerConfig {
            stream_name: cli
                .stream_name
                .clone()
                .or(file_worker.stream_name)
                .unwrap_or(defaults.stream_name),
            consumer_group: cli
                .consumer_group
                .clone()
                .or(file_worker.consumer_group)
                .unwrap_or(defaults.consumer_group),
            consumer_name: cli
                .consumer_name
                .clone()
                .or(file_worker.consumer_name)
                .unwrap_or(defaults.consumer_name),
            max_batch_size: cli
                .max_batch_size
                .or(file_worker.max_batch_size)
                .unwrap_or(defaults.max_batch_size),
            max_block_ms: cli
                .max_block_ms
                .or(file_worker.max_block_ms)
                .unwrap_or(defaults.max_block_ms),
            max_delay_ms: cli
                .max_delay_ms
                .or(file_worker.max_delay_ms)
                .unwrap_or(defaults.max_delay_ms),
            max_batch_mb: cli
                .max_batch_mb
                .or(file_worker.max_batch_mb)
                .unwrap_or(defaults.max_batch_mb),
            claim_interval_secs: file_worker
                .claim_interval_secs
                .unwrap_or(defaults.claim_interval_secs),
            claim_min_idle_ms: file_worker
                .claim_min_idle_ms
                .unwrap_or(defaults.claim_min_idle_ms),
            store_backoff_ms: file_worker
                .store_backoff_ms
                .unwrap_or(defaults.store_backoff_ms),
        };

        let stream = StreamConfig {
            backend: cli
                .stream_backend
                .or(file_stream.backend)
                .unwrap_or_default(),
            redis_url: cli.redis_url.clone().or(file_stream.redis_url),
        };

        let entitlements = EntitlementsConfig {
            enabled: cli
                .entitlements_enabled
                .or(file_entitlements.enabled)
                .unwrap_or(false),
            backend: cli
                .entitlements_backend
                .or(file_entitlements.backend)
                .unwrap_or_default(),
            url: cli.entitlements_url.clone().or(file_entitlements.url),
            limits: file_entitlements.limits.unwrap_or_default(),
        };

        let store = StoreConfig {
            backend: cli.store_backend.or(file_store.backend).unwrap_or_default(),
            url: cli.store_url.clone().or(file_store.url),
        };

        // debug: CLI flag enables, file config provides default
        let debug = cli.debug || file_config.debug.unwrap_or(false);

        let config = Self {
            worker,
            stream,
            entitlements,
            store,
            debug,
        };

        config.validate()?;

        tracing::debug!(
            stream_name = %config.worker.stream_name,
            consumer_group = %config.worker.consumer_group,
            consumer_name = %config.worker.consumer_name,
            max_batch_size = config.worker.max_batch_size,
            max_block_ms = config.worker.max_block_ms,
            max_delay_ms = config.worker.max_delay_ms,
            max_batch_mb = config.worker.max_batch_mb,
            stream_backend = %config.stream.backend,
            entitlements_enabled = config.entitlements.enabled,
            entitlements_backend = %config.entitlements.backend,
            store_backend = %config.store.backend,
            debug = config.debug,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Validate the configuration for consistency and correctness
    fn validate(&self) -> Result<()> {
        if self.worker.stream_name.trim().is_empty() {
            anyhow::bail!("Configuration error: worker.stream_name must not be empty");
        }
        if self.worker.consumer_group.trim().is_empty() {
            anyhow::bail!("Configuration error: worker.consumer_group must not be empty");
        }
        if self.worker.consumer_name.trim().is_empty() {
            anyhow::bail!("Configuration error: worker.consumer_name must not be empty");
        }
        if self.worker.max_batch_size == 0 {
            anyhow::bail!("Configuration error: worker.max_batch_size must be greater than 0");
        }
        if self.worker.max_batch_mb == 0 {
            anyhow::bail!("Configuration error: worker.max_batch_mb must be greater than 0");
        }
        if self.worker.claim_interval_secs == 0 {
            anyhow::bail!(
                "Configuration error: worker.claim_interval_secs must be greater than 0"
            );
        }

        if self.stream.backend == StreamBackendType::Redis && is_blank(&self.stream.redis_url) {
            anyhow::bail!(
                "Configuration error: stream.redis_url is required when stream.backend is redis"
            );
        }

        if self.entitlements.enabled
            && self.entitlements.backend == EntitlementsBackendType::Http
            && is_blank(&self.entitlements.url)
        {
            anyhow::bail!(
                "Configuration error: entitlements.url is required when entitlements.backend is http"
            );
        }

        if self.store.backend == StoreBackendType::Http && is_blank(&self.store.url) {
            anyhow::bail!(
                "Configuration error: store.url is required when store.backend is http"
            );
        }

        Ok(())
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}
