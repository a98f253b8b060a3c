//! Core application

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Value as JsonValue, json};

use crate::core::cli::{self, CliConfig, Commands, SpanFormat};
use crate::core::config::{AppConfig, StoreBackendType, StreamBackendType};
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::data::entitlements::build_meter;
use crate::data::store::build_store;
use crate::data::topics;
use crate::domain::ingest::{EntitlementGate, IngestionWorker, SpanPublisher};
use crate::domain::traces::ids::uuid_to_span_hex;
use crate::domain::traces::otlp::raw_spans_from_protobuf;
use crate::domain::traces::{FLAT_BUILDER, RawSpan, SpanFeaturePipeline, SpanTree, build_trees};
use crate::utils::file::{expand_path, read_json};

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub pipeline: Arc<SpanFeaturePipeline>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        let app = Self::init(&cli_config)?;
        match command {
            Some(Commands::Worker) | None => app.start_worker().await,
            Some(Commands::Publish {
                file,
                format,
                org,
                project,
                user,
            }) => app.publish_file(&file, format, &org, &project, &user).await,
            Some(Commands::Tree { file, format }) => app.print_trees(&file, format),
        }
    }

    fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        if config.debug {
            tracing::debug!(config = ?config, "Resolved configuration");
        }

        Ok(Self {
            shutdown: ShutdownService::new(),
            config,
            pipeline: Arc::new(SpanFeaturePipeline::new()),
        })
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start_worker(self) -> Result<()> {
        // Install signal handlers FIRST (before any blocking calls)
        self.shutdown.install_signal_handlers();

        let backend = topics::connect(&self.config.stream)
            .await
            .context("Failed to initialize stream backend")?;
        backend
            .health_check()
            .await
            .context("Stream backend health check failed")?;
        let meter =
            build_meter(&self.config.entitlements).context("Failed to initialize entitlements")?;
        let store = build_store(&self.config.store).context("Failed to initialize span store")?;
        if self.config.store.backend == StoreBackendType::Memory {
            tracing::warn!(
                "Using the in-memory span store, ingested spans are not persisted (set --store-backend http)"
            );
        }

        let worker = IngestionWorker::new(
            backend,
            EntitlementGate::new(meter),
            store,
            &self.config.worker,
        );
        worker
            .prepare()
            .await
            .context("Failed to create consumer group")?;

        tracing::info!(
            stream = %self.config.worker.stream_name,
            group = %self.config.worker.consumer_group,
            consumer = %self.config.worker.consumer_name,
            backend = %self.config.stream.backend,
            "Ingestion worker running"
        );

        self.shutdown
            .register(worker.start(self.shutdown.subscribe()))
            .await;
        self.shutdown.wait().await;
        self.shutdown.shutdown().await;

        Ok(())
    }

    async fn publish_file(
        self,
        file: &Path,
        format: SpanFormat,
        org: &str,
        project: &str,
        user: &str,
    ) -> Result<()> {
        if self.config.stream.backend == StreamBackendType::Memory {
            tracing::warn!("Publishing to the in-memory stream, no worker process will see these spans");
        }

        let spans = read_spans(file, format)?;
        let backend = topics::connect(&self.config.stream)
            .await
            .context("Failed to initialize stream backend")?;
        let publisher = SpanPublisher::new(
            backend,
            self.config.worker.stream_name.clone(),
            self.pipeline.clone(),
        );

        let report = publisher
            .publish(org, project, user, &spans)
            .await
            .context("Failed to publish spans")?;
        println!(
            "Published {} spans to '{}' ({} skipped)",
            report.published, self.config.worker.stream_name, report.skipped
        );
        Ok(())
    }

    fn print_trees(&self, file: &Path, format: SpanFormat) -> Result<()> {
        let spans = read_spans(file, format)?;
        let report = trees_report(&self.pipeline, &spans);
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }
}

fn read_spans(file: &Path, format: SpanFormat) -> Result<Vec<RawSpan>> {
    let path = expand_path(&file.to_string_lossy());
    match format {
        SpanFormat::Json => read_json(&path, "span file"),
        SpanFormat::Otlp => {
            let body = std::fs::read(&path)
                .with_context(|| format!("Failed to read span file: {}", path.display()))?;
            raw_spans_from_protobuf(&body)
                .with_context(|| format!("Failed to decode OTLP request: {}", path.display()))
        }
    }
}

/// Build, roll up and group one tree per trace
fn trees_report(pipeline: &SpanFeaturePipeline, spans: &[RawSpan]) -> JsonValue {
    let domain: Vec<_> = pipeline
        .run_batch(spans)
        .into_iter()
        .filter_map(|mut built| built.remove(FLAT_BUILDER)?.into_domain())
        .collect();
    let skipped = spans.len() - domain.len();

    let traces: Vec<JsonValue> = build_trees(domain)
        .into_iter()
        .map(|(trace_id, mut tree)| {
            tree.rollup();
            trace_json(trace_id, &tree)
        })
        .collect();

    json!({ "traces": traces, "skipped": skipped })
}

fn trace_json(trace_id: uuid::Uuid, tree: &SpanTree) -> JsonValue {
    let orphans: Vec<String> = tree
        .orphans()
        .iter()
        .map(|span| uuid_to_span_hex(&span.span_id))
        .collect();
    json!({
        "trace_id": trace_id.simple().to_string(),
        "spans": tree.grouped(),
        "orphans": orphans,
    })
}
