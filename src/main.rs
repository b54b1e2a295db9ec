//! Hestia - Home Automation Telemetry & Intelligence Platform
//!
//! Ingests the smart-home hub's event stream, enriches and persists it,
//! mines behavioral patterns, and proposes safety-validated automations.
//!
//! # Usage
//!
//! ```bash
//! # Run the full pipeline
//! HESTIA_HUB_TOKEN=... hestia --config-dir /etc/hestia
//!
//! # Validate configuration and stores without connecting
//! hestia --dry-run
//!
//! # Run every scheduler job once and exit
//! hestia --once
//!
//! # Round-trip test a suggestion on the live hub
//! hestia test <suggestion-id>
//!
//! # Approve and deploy a suggestion
//! hestia deploy <suggestion-id>
//! ```
//!
//! # Exit codes
//!
//! - `0` success
//! - `1` validation failure (config, safety)
//! - `2` connectivity failure
//! - `3` partial success

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use hestia::api::{create_app, ApiState};
use hestia::capabilities::CapabilityStore;
use hestia::config::{self, AppConfig};
use hestia::context::calendar::ActiveEventsSet;
use hestia::context::clock::{SharedClock, SystemClock};
use hestia::context::weather::{WeatherConfigView, WeatherProvider};
use hestia::enrichment::{EnrichmentPipeline, EventInbox};
use hestia::harness::{janitor, CleanupQueue, HarnessError, TestHarness};
use hestia::hub::{HubRestClient, HubSession};
use hestia::llm::{self, LlmClient};
use hestia::safety::apply_structural_fixes;
use hestia::scheduler::Scheduler;
use hestia::storage;
use hestia::suggestions::{prompts, SuggestionGenerator};
use hestia::timeseries::{SpillQueue, TimeseriesClient, TimeseriesWriter};
use hestia::types::{EnrichedEvent, SafetyLevel, SuggestionStatus};
use hestia::SafetyValidator;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "hestia")]
#[command(about = "Hestia Home Automation Telemetry & Intelligence Platform")]
#[command(version)]
struct CliArgs {
    /// Directory containing hestia.toml
    #[arg(long, default_value = ".")]
    config_dir: std::path::PathBuf,

    /// Validate configuration and local stores, then exit
    #[arg(long)]
    dry_run: bool,

    /// Run each scheduler job once and exit
    #[arg(long)]
    once: bool,

    /// Log level override (trace|debug|info|warn|error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Round-trip test a suggestion against the live hub
    Test {
        /// Suggestion id to test
        suggestion_id: String,
        /// Also restore the stripped components and print the deployable YAML
        #[arg(long)]
        restore: bool,
    },
    /// Approve a suggestion and deploy its automation to the hub
    Deploy {
        /// Suggestion id to deploy
        suggestion_id: String,
    },
}

/// Task identification for supervisor logging
#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    HubSession,
    Pipeline,
    Writer,
    Scheduler,
    Janitor,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::HubSession => write!(f, "HubSession"),
            TaskName::Pipeline => write!(f, "Pipeline"),
            TaskName::Writer => write!(f, "Writer"),
            TaskName::Scheduler => write!(f, "Scheduler"),
            TaskName::Janitor => write!(f, "Janitor"),
        }
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// Everything the run modes share, constructed once at startup.
struct Services {
    clock: SharedClock,
    capabilities: Arc<CapabilityStore>,
    calendar: Arc<ActiveEventsSet>,
    weather: Arc<WeatherProvider>,
    ts_client: TimeseriesClient,
    rest: HubRestClient,
    oracle: Arc<LlmClient>,
    pattern_store: storage::PatternStore,
    suggestion_store: storage::SuggestionStore,
    cleanup: Arc<CleanupQueue>,
}

impl Services {
    fn build(config: &AppConfig) -> Result<Self, storage::StoreError> {
        let clock: SharedClock = Arc::new(SystemClock);
        let (pattern_store, suggestion_store) = storage::open(&config.storage.data_dir)?;

        let weather = Arc::new(WeatherProvider::new(
            WeatherConfigView {
                base_url: config.weather.base_url.clone(),
                api_key: config.weather.api_key.clone(),
                latitude: config.weather.latitude,
                longitude: config.weather.longitude,
                units: config.weather.units.clone(),
                cache_ttl: std::time::Duration::from_secs(config.weather.cache_ttl_secs),
                location: config.weather.location.clone(),
            },
            clock.clone(),
        ));

        Ok(Self {
            clock: clock.clone(),
            capabilities: Arc::new(CapabilityStore::new()),
            calendar: Arc::new(ActiveEventsSet::new()),
            weather,
            ts_client: TimeseriesClient::new(&config.influxdb),
            rest: HubRestClient::new(&config.hub.effective_rest_url(), &config.hub.token),
            oracle: Arc::new(LlmClient::new(&config.llm)),
            pattern_store,
            suggestion_store,
            cleanup: Arc::new(CleanupQueue::new()),
        })
    }

    fn generator(&self) -> Arc<SuggestionGenerator> {
        Arc::new(SuggestionGenerator::new(
            self.oracle.clone(),
            self.capabilities.clone(),
            self.pattern_store.clone(),
            self.suggestion_store.clone(),
            self.clock.clone(),
        ))
    }

    fn scheduler(&self, config: &AppConfig) -> Scheduler {
        Scheduler::new(
            config.scheduler.clone(),
            config.detectors.clone(),
            self.ts_client.clone(),
            self.pattern_store.clone(),
            self.generator(),
            self.capabilities.clone(),
            self.weather.clone(),
            self.calendar.clone(),
            self.rest.clone(),
            self.clock.clone(),
        )
    }

    fn harness(&self, config: &AppConfig) -> TestHarness {
        TestHarness::new(
            self.oracle.clone(),
            self.rest.clone(),
            SafetyValidator::new(
                SafetyLevel::parse_lenient(&config.safety.level),
                config.safety.bulk_entity_width,
            ),
            self.cleanup.clone(),
            config.harness.clone(),
        )
    }
}

// ============================================================================
// Run Modes
// ============================================================================

/// The long-running pipeline under the JoinSet supervisor.
async fn run_pipeline(config: &AppConfig, services: Services) -> Result<()> {
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received");
        shutdown.cancel();
    });

    let inbox = EventInbox::new(config.pipeline.channel_capacity);
    let (writer_tx, writer_rx) =
        mpsc::channel::<EnrichedEvent>(config.influxdb.batch_size * 2);

    let session = HubSession::new(
        config.hub.clone(),
        Arc::clone(&inbox),
        services.capabilities.clone(),
        services.clock.clone(),
    );
    let session_metrics = session.metrics();
    let session_state = session.state_handle();

    let pipeline = EnrichmentPipeline::new(
        Arc::clone(&inbox),
        writer_tx,
        services.weather.clone(),
        services.calendar.clone(),
        services.clock.clone(),
        config.pipeline.last_state_capacity,
    );
    let quality_reader = pipeline.quality_reader();

    let spill = SpillQueue::open(&config.influxdb.spill_path)
        .map_err(|e| anyhow::anyhow!("failed to open spill file: {e}"))?;
    let writer = TimeseriesWriter::new(
        services.ts_client.clone(),
        spill,
        config.influxdb.batch_size,
        std::time::Duration::from_millis(config.influxdb.flush_interval_ms),
    );
    let writer_metrics = writer.metrics();

    let scheduler = services.scheduler(config);
    let scheduler_metrics = scheduler.metrics();

    let api_state = ApiState {
        quality: quality_reader,
        writer: writer_metrics,
        session: session_metrics,
        session_state,
        scheduler: scheduler_metrics,
        cleanup: services.cleanup.clone(),
        started_at: chrono::Utc::now(),
    };
    let app = create_app(api_state);
    let listener = tokio::net::TcpListener::bind(&config.server.addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {e}", config.server.addr))?;
    info!(addr = %config.server.addr, "observability surface listening");

    // JoinSet Supervisor Pattern
    info!("supervisor: spawning tasks");
    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    let http_cancel = cancel.clone();
    task_set.spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { http_cancel.cancelled().await })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {e}"))?;
        Ok(TaskName::HttpServer)
    });

    let session_cancel = cancel.clone();
    task_set.spawn(async move {
        session.run(session_cancel).await;
        Ok(TaskName::HubSession)
    });

    let pipeline_cancel = cancel.clone();
    task_set.spawn(async move {
        let stats = pipeline.run(pipeline_cancel).await;
        info!(
            enriched = stats.events_enriched,
            rejected = stats.events_rejected,
            dropped = stats.events_dropped,
            "pipeline final stats"
        );
        Ok(TaskName::Pipeline)
    });

    let writer_cancel = cancel.clone();
    task_set.spawn(async move {
        writer.run(writer_rx, writer_cancel).await;
        Ok(TaskName::Writer)
    });

    let scheduler_cancel = cancel.clone();
    task_set.spawn(async move {
        scheduler.run(scheduler_cancel).await;
        Ok(TaskName::Scheduler)
    });

    let janitor_cancel = cancel.clone();
    let janitor_queue = services.cleanup.clone();
    let janitor_rest = services.rest.clone();
    let janitor_interval = std::time::Duration::from_secs(config.harness.janitor_interval_secs);
    task_set.spawn(async move {
        janitor::run_janitor(janitor_queue, janitor_rest, janitor_interval, janitor_cancel).await;
        Ok(TaskName::Janitor)
    });

    // Supervisor loop: first failure cancels everything.
    let mut failure: Option<anyhow::Error> = None;
    while let Some(result) = task_set.join_next().await {
        match result {
            Ok(Ok(task_name)) => info!(task = %task_name, "supervisor: task completed"),
            Ok(Err(e)) => {
                error!(error = %e, "supervisor: task failed");
                failure.get_or_insert(e);
                cancel.cancel();
            }
            Err(e) => {
                error!(error = %e, "supervisor: task panicked");
                failure.get_or_insert(anyhow::anyhow!("task panicked: {e}"));
                cancel.cancel();
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// `test <suggestion-id>`: the user-initiated round-trip test.
async fn run_test_command(
    config: &AppConfig,
    services: Services,
    suggestion_id: &str,
    restore: bool,
) -> ExitCode {
    let suggestion = match services.suggestion_store.get(suggestion_id) {
        Ok(Some(s)) => s,
        Ok(None) => {
            error!(suggestion_id, "suggestion not found");
            return ExitCode::from(1);
        }
        Err(e) => {
            error!(error = %e, "failed to read suggestion store");
            return ExitCode::from(1);
        }
    };

    let harness = services.harness(config);
    let cancel = CancellationToken::new();

    match harness.run_test(&suggestion, &cancel).await {
        Ok(report) => {
            info!(
                automation_id = %report.automation_id,
                mode = ?report.mode,
                triggered = report.triggered,
                deleted = report.deleted,
                "test run complete"
            );
            if restore {
                match harness.restore(&report).await {
                    Ok((yaml, safety)) => {
                        info!(score = safety.safety_score, "restored YAML validated");
                        println!("{yaml}");
                    }
                    Err(e) => {
                        error!("automation validation failed: {e}");
                        return ExitCode::from(1);
                    }
                }
            }
            if report.deleted {
                ExitCode::SUCCESS
            } else {
                warn!("test executed but cleanup failed; janitor will retry");
                ExitCode::from(3)
            }
        }
        Err(HarnessError::SafetyRejected { summary, .. }) => {
            error!("automation validation failed: {summary}");
            ExitCode::from(1)
        }
        Err(HarnessError::Hub(e)) => {
            error!("could not reach hub: {e}");
            ExitCode::from(2)
        }
        Err(e) => {
            error!(error = %e, "test run failed");
            ExitCode::from(2)
        }
    }
}

/// `deploy <suggestion-id>`: synthesize YAML if needed, validate, approve,
/// create the automation on the hub, and record the deployment.
async fn run_deploy_command(
    config: &AppConfig,
    services: Services,
    suggestion_id: &str,
) -> ExitCode {
    let suggestion = match services.suggestion_store.get(suggestion_id) {
        Ok(Some(s)) => s,
        Ok(None) => {
            error!(suggestion_id, "suggestion not found");
            return ExitCode::from(1);
        }
        Err(e) => {
            error!(error = %e, "failed to read suggestion store");
            return ExitCode::from(1);
        }
    };

    // Approved suggestions already carry their immutable YAML; drafts get it
    // synthesized now.
    let yaml = match &suggestion.automation_yaml {
        Some(yaml) => yaml.clone(),
        None => {
            match llm::complete_yaml(
                services.oracle.as_ref(),
                prompts::YAML_SYSTEM,
                &prompts::yaml_prompt(
                    &suggestion.description_only,
                    &suggestion.device_capabilities,
                ),
                &llm::CompletionParams::default(),
            )
            .await
            {
                Ok(yaml) => yaml,
                Err(e) => {
                    error!("could not synthesize automation YAML: {e}");
                    return ExitCode::from(2);
                }
            }
        }
    };

    let fixed = apply_structural_fixes(&yaml);
    let validator = SafetyValidator::new(
        SafetyLevel::parse_lenient(&config.safety.level),
        config.safety.bulk_entity_width,
    );
    let report = validator.validate(&fixed.yaml);
    if !report.passed {
        error!("automation validation failed: {}", report.summary);
        return ExitCode::from(1);
    }

    let now = services.clock.now();
    let approved = if suggestion.status == SuggestionStatus::Draft {
        match services.suggestion_store.approve(suggestion_id, &fixed.yaml, now) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "approval failed");
                return ExitCode::from(1);
            }
        }
    } else {
        suggestion
    };

    let config_json: serde_json::Value = match serde_yaml::from_str(&fixed.yaml) {
        Ok(value) => value,
        Err(e) => {
            error!("automation validation failed: YAML does not parse: {e}");
            return ExitCode::from(1);
        }
    };
    if !config_json.is_object() {
        error!("automation validation failed: YAML is not a mapping");
        return ExitCode::from(1);
    }
    let automation_id = format!(
        "hestia_{}",
        approved.suggestion_id.replace('-', "").chars().take(12).collect::<String>()
    );
    if let Err(e) = services.rest.create_automation(&automation_id, &config_json).await {
        error!("could not reach hub: {e}");
        return ExitCode::from(2);
    }

    match services
        .suggestion_store
        .mark_deployed(&approved.suggestion_id, &automation_id, services.clock.now())
    {
        Ok(_) => {
            info!(automation_id = %automation_id, "suggestion deployed");
            println!("{automation_id}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            // The hub has the automation but the record lags: partial success.
            warn!(error = %e, "deployed but status update failed");
            ExitCode::from(3)
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn init_tracing(log_level: Option<&str>) {
    let default = log_level.unwrap_or("info").to_string();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    init_tracing(args.log_level.as_deref());

    // Load and validate configuration before any I/O.
    let loaded = match AppConfig::load(&args.config_dir) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(1);
        }
    };
    config::init(loaded);
    let app_config = config::get();

    info!("Hestia - Home Automation Telemetry & Intelligence");

    let services = match Services::build(app_config) {
        Ok(services) => services,
        Err(e) => {
            error!("failed to open local stores: {e}");
            return ExitCode::from(1);
        }
    };

    if args.dry_run {
        info!("dry run: configuration and local stores are valid");
        return ExitCode::SUCCESS;
    }

    match &args.command {
        Some(Command::Test { suggestion_id, restore }) => {
            return run_test_command(app_config, services, suggestion_id, *restore).await;
        }
        Some(Command::Deploy { suggestion_id }) => {
            return run_deploy_command(app_config, services, suggestion_id).await;
        }
        None => {}
    }

    if args.once {
        let scheduler = services.scheduler(app_config);
        scheduler.run_once().await;
        let snapshot = scheduler.metrics().snapshot();
        info!(
            detections = snapshot.detection_runs,
            rollups = snapshot.rollup_runs,
            "single pass complete"
        );
        return ExitCode::SUCCESS;
    }

    match run_pipeline(app_config, services).await {
        Ok(()) => {
            info!("hestia shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("pipeline terminated: {e}");
            ExitCode::from(2)
        }
    }
}
