use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::config::{EntitlementsBackendType, StoreBackendType, StreamBackendType};
use super::constants::{
    ENV_CONFIG, ENV_CONSUMER_GROUP, ENV_CONSUMER_NAME, ENV_DEBUG, ENV_ENTITLEMENTS_BACKEND,
    ENV_ENTITLEMENTS_ENABLED, ENV_ENTITLEMENTS_URL, ENV_MAX_BATCH_MB, ENV_MAX_BATCH_SIZE,
    ENV_MAX_BLOCK_MS, ENV_MAX_DELAY_MS, ENV_REDIS_URL, ENV_STORE_BACKEND, ENV_STORE_URL,
    ENV_STREAM_BACKEND, ENV_STREAM_NAME,
};

#[derive(Parser)]
#[command(name = "tracehub")]
#[command(version, about = "Telemetry span ingestion worker", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable debug mode
    #[arg(long, global = true, env = ENV_DEBUG)]
    pub debug: bool,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    // Worker options
    /// Stream to consume from and publish to
    #[arg(long, global = true, env = ENV_STREAM_NAME)]
    pub stream_name: Option<String>,

    /// Consumer group name
    #[arg(long, global = true, env = ENV_CONSUMER_GROUP)]
    pub consumer_group: Option<String>,

    /// Consumer name within the group (default: worker-<pid>)
    #[arg(long, global = true, env = ENV_CONSUMER_NAME)]
    pub consumer_name: Option<String>,

    /// Maximum messages per batch
    #[arg(long, global = true, env = ENV_MAX_BATCH_SIZE)]
    pub max_batch_size: Option<usize>,

    /// Maximum time the first read of a batch blocks (milliseconds)
    #[arg(long, global = true, env = ENV_MAX_BLOCK_MS)]
    pub max_block_ms: Option<u64>,

    /// Time window for filling a started batch (milliseconds)
    #[arg(long, global = true, env = ENV_MAX_DELAY_MS)]
    pub max_delay_ms: Option<u64>,

    /// Byte budget of one batch (MiB)
    #[arg(long, global = true, env = ENV_MAX_BATCH_MB)]
    pub max_batch_mb: Option<u64>,

    // Backend options
    /// Stream backend (memory or redis)
    #[arg(long, global = true, env = ENV_STREAM_BACKEND, value_parser = parse_stream_backend)]
    pub stream_backend: Option<StreamBackendType>,

    /// Redis-compatible stream URL. Supports Redis, Valkey, Dragonfly.
    #[arg(long, global = true, env = ENV_REDIS_URL)]
    pub redis_url: Option<String>,

    /// Enable or disable entitlement checks
    #[arg(long, global = true, env = ENV_ENTITLEMENTS_ENABLED)]
    pub entitlements_enabled: Option<bool>,

    /// Entitlements backend (memory or http)
    #[arg(long, global = true, env = ENV_ENTITLEMENTS_BACKEND, value_parser = parse_entitlements_backend)]
    pub entitlements_backend: Option<EntitlementsBackendType>,

    /// Entitlements service base URL (http backend)
    #[arg(long, global = true, env = ENV_ENTITLEMENTS_URL)]
    pub entitlements_url: Option<String>,

    /// Span store backend (memory or http)
    #[arg(long, global = true, env = ENV_STORE_BACKEND, value_parser = parse_store_backend)]
    pub store_backend: Option<StoreBackendType>,

    /// Span store base URL (http backend)
    #[arg(long, global = true, env = ENV_STORE_URL)]
    pub store_url: Option<String>,
}

/// Parse stream backend from CLI/env string
fn parse_stream_backend(s: &str) -> Result<StreamBackendType, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(StreamBackendType::Memory),
        "redis" => Ok(StreamBackendType::Redis),
        _ => Err(format!(
            "Invalid stream backend '{}'. Valid options: memory, redis",
            s
        )),
    }
}

/// Parse entitlements backend from CLI/env string
fn parse_entitlements_backend(s: &str) -> Result<EntitlementsBackendType, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(EntitlementsBackendType::Memory),
        "http" => Ok(EntitlementsBackendType::Http),
        _ => Err(format!(
            "Invalid entitlements backend '{}'. Valid options: memory, http",
            s
        )),
    }
}

/// Parse span store backend from CLI/env string
fn parse_store_backend(s: &str) -> Result<StoreBackendType, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(StoreBackendType::Memory),
        "http" => Ok(StoreBackendType::Http),
        _ => Err(format!(
            "Invalid store backend '{}'. Valid options: memory, http",
            s
        )),
    }
}

/// Encoding of a span input file
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpanFormat {
    /// JSON array of wire-format spans
    #[default]
    Json,
    /// Protobuf-encoded OTLP `ExportTraceServiceRequest`
    Otlp,
}

/// Parse span file format from CLI string
fn parse_span_format(s: &str) -> Result<SpanFormat, String> {
    match s.to_lowercase().as_str() {
        "json" => Ok(SpanFormat::Json),
        "otlp" | "protobuf" => Ok(SpanFormat::Otlp),
        _ => Err(format!(
            "Invalid span format '{}'. Valid options: json, otlp",
            s
        )),
    }
}

#[derive(Subcommand, Clone, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the ingestion worker (default command)
    Worker,
    /// Run the feature pipeline over a span file and publish the spans
    Publish {
        /// Span file: JSON array of spans, or an OTLP export request
        #[arg(long, short = 'f')]
        file: PathBuf,
        /// Span file format (json, otlp)
        #[arg(long, default_value = "json", value_parser = parse_span_format)]
        format: SpanFormat,
        /// Organization id
        #[arg(long)]
        org: String,
        /// Project id
        #[arg(long)]
        project: String,
        /// User id
        #[arg(long)]
        user: String,
    },
    /// Build span trees from a span file and print them
    Tree {
        /// Span file: JSON array of spans, or an OTLP export request
        #[arg(long, short = 'f')]
        file: PathBuf,
        /// Span file format (json, otlp)
        #[arg(long, default_value = "json", value_parser = parse_span_format)]
        format: SpanFormat,
    },
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub debug: bool,
    pub config: Option<PathBuf>,
    pub stream_name: Option<String>,
    pub consumer_group: Option<String>,
    pub consumer_name: Option<String>,
    pub max_batch_size: Option<usize>,
    pub max_block_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub max_batch_mb: Option<u64>,
    pub stream_backend: Option<StreamBackendType>,
    pub redis_url: Option<String>,
    pub entitlements_enabled: Option<bool>,
    pub entitlements_backend: Option<EntitlementsBackendType>,
    pub entitlements_url: Option<String>,
    pub store_backend: Option<StoreBackendType>,
    pub store_url: Option<String>,
}

impl From<Cli> for CliConfig {
    fn from(cli: Cli) -> Self {
        Self {
            debug: cli.debug,
            config: cli.config,
            stream_name: cli.stream_name,
            consumer_group: cli.consumer_group,
            consumer_name: cli.consumer_name,
            max_batch_size: cli.max_batch_size,
            max_block_ms: cli.max_block_ms,
            max_delay_ms: cli.max_delay_ms,
            max_batch_mb: cli.max_batch_mb,
            stream_backend: cli.stream_backend,
            redis_url: cli.redis_url,
            entitlements_enabled: cli.entitlements_enabled,
            entitlements_backend: cli.entitlements_backend,
            entitlements_url: cli.entitlements_url,
            store_backend: cli.store_backend,
            store_url: cli.store_url,
        }
    }
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    split(Cli::parse())
}

fn split(mut cli: Cli) -> (CliConfig, Option<Commands>) {
    let command = cli.command.take();
    (CliConfig::from(cli), command)
}
