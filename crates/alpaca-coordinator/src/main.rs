#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use serde::Deserialize;
use tracing::{info, info_span, warn, Instrument};

use alpaca_observe::metrics::{Counter, Gauge};
use alpaca_scheduler::{Scheduler, SchedulerError, Sources};
use alpaca_store::FsSnapshotStore;

#[derive(Debug, Parser)]
#[command(name = "alpaca-coordinator")]
struct Args {
    /// Address to bind the HTTP server.
    #[arg(long, env = "ALPACA_BIND_ADDR", default_value = "0.0.0.0:10080")]
    addr: SocketAddr,

    /// Pipeline definition: `{"pipeline": [{"name": ..., "upstream": [...]}]}`.
    ///
    /// Re-read on every `/update_tasks`.
    #[arg(long, env = "ALPACA_TASKS_JSON")]
    tasks_json: PathBuf,

    /// Sample list (TSV). First line is a header; a single-column header means
    /// no metadata.
    ///
    /// Re-read on every `/update_samples`.
    #[arg(long, env = "ALPACA_SAMPLES_LIST")]
    samples_list: PathBuf,

    /// Where `/snapshot` writes the status table. Snapshots are unavailable
    /// when unset.
    #[arg(long, env = "ALPACA_SNAPSHOT_PATH")]
    snapshot_path: Option<PathBuf>,

    /// Optional: write a snapshot periodically (requires --snapshot-path).
    #[arg(long, env = "ALPACA_SNAPSHOT_INTERVAL_MS", default_value_t = 0)]
    snapshot_interval_ms: u64,

    /// Optional: periodically emit a metrics snapshot to logs.
    #[arg(long, env = "ALPACA_METRICS_SNAPSHOT_INTERVAL_MS", default_value_t = 0)]
    metrics_snapshot_interval_ms: u64,
}

#[derive(Debug, Default)]
struct CoordinatorMetrics {
    claim_total: Counter,
    claims_granted_total: Counter,
    report_total: Counter,
    reload_total: Counter,
    reload_failed_total: Counter,
    snapshot_total: Counter,
    known_samples: Gauge,
    known_steps: Gauge,
}

#[derive(Clone)]
struct AppState {
    scheduler: Arc<Scheduler>,
    metrics: Arc<CoordinatorMetrics>,
}

impl AppState {
    fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            scheduler,
            metrics: Arc::new(CoordinatorMetrics::default()),
        }
    }

    async fn update_gauges(&self) {
        self.metrics
            .known_samples
            .set(self.scheduler.sample_count().await as u64);
        self.metrics
            .known_steps
            .set(self.scheduler.step_count().await as u64);
    }

    async fn emit_metrics_snapshot(&self) {
        self.update_gauges().await;
        tracing::info!(
            target: "alpaca_metrics",
            claim_total = self.metrics.claim_total.get(),
            claims_granted_total = self.metrics.claims_granted_total.get(),
            report_total = self.metrics.report_total.get(),
            reload_total = self.metrics.reload_total.get(),
            reload_failed_total = self.metrics.reload_failed_total.get(),
            snapshot_total = self.metrics.snapshot_total.get(),
            known_samples = self.metrics.known_samples.get(),
            known_steps = self.metrics.known_steps.get(),
            "metrics"
        );
    }
}

/// Error half of every handler; the only place errors become HTTP codes.
#[derive(Debug)]
enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unavailable(String),
    Internal(String),
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::NotFound(msg) => ApiError::NotFound(msg),
            SchedulerError::InvalidStatus(_) | SchedulerError::InvalidFields(_) => {
                ApiError::BadRequest(err.to_string())
            }
            SchedulerError::Unavailable => ApiError::Unavailable(err.to_string()),
            SchedulerError::Config(_)
            | SchedulerError::Store(_)
            | SchedulerError::Encode(_)
            | SchedulerError::Join(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (code, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

const NO_READY_SAMPLE: &str = "No ready samples found";

async fn get_sample(State(app): State<AppState>, Path(step): Path<String>) -> ApiResult<String> {
    app.metrics.claim_total.inc();
    let Some(sample) = app.scheduler.claim(&step).await else {
        return Err(ApiError::NotFound(NO_READY_SAMPLE.to_string()));
    };
    app.metrics.claims_granted_total.inc();
    info!(
        target: "alpaca_proof",
        event = "claim",
        step = %step,
        sample = %sample,
        "sample distributed"
    );
    Ok(sample)
}

#[derive(Debug, Default, Deserialize)]
struct FieldsQuery {
    fields: Option<String>,
}

impl FieldsQuery {
    fn names(&self) -> Vec<String> {
        self.fields
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect()
    }
}

async fn get_sample_info(
    State(app): State<AppState>,
    Path(step): Path<String>,
    Query(query): Query<FieldsQuery>,
) -> ApiResult<String> {
    app.metrics.claim_total.inc();
    let fields = query.names();
    let (sample, values) = app
        .scheduler
        .claim_with_metadata(&step, &fields)
        .await
        .map_err(|err| match err {
            SchedulerError::NotFound(_) => ApiError::NotFound(NO_READY_SAMPLE.to_string()),
            other => other.into(),
        })?;
    app.metrics.claims_granted_total.inc();
    info!(
        target: "alpaca_proof",
        event = "claim",
        step = %step,
        sample = %sample,
        fields = fields.len() as u64,
        "sample distributed"
    );

    let mut cells = Vec::with_capacity(values.len() + 1);
    cells.push(sample);
    cells.extend(values);
    Ok(cells.join("\t"))
}

async fn report_status(
    State(app): State<AppState>,
    Path((status, step, sample)): Path<(String, String, String)>,
) -> ApiResult<String> {
    app.metrics.report_total.inc();
    let parsed = app
        .scheduler
        .report_named(&step, &sample, &status)
        .await
        .map_err(|err| match err {
            SchedulerError::NotFound(_) => {
                ApiError::NotFound("Sample or task not found".to_string())
            }
            other => other.into(),
        })?;
    info!(
        target: "alpaca_proof",
        event = "report",
        step = %step,
        sample = %sample,
        status = %parsed,
        "status updated"
    );
    Ok(format!("Updated {sample} for {step} to {status}"))
}

async fn update_tasks(State(app): State<AppState>) -> ApiResult<String> {
    app.metrics.reload_total.inc();
    match app.scheduler.reload_pipeline().await {
        Ok(outcome) => {
            app.update_gauges().await;
            info!(added = outcome.added.len() as u64, "tasks reloaded");
            Ok("Tasks updated successfully".to_string())
        }
        Err(err) => {
            app.metrics.reload_failed_total.inc();
            warn!(error = %err, "task reload failed; keeping current pipeline");
            Err(err.into())
        }
    }
}

async fn update_samples(State(app): State<AppState>) -> ApiResult<String> {
    app.metrics.reload_total.inc();
    match app.scheduler.reload_samples().await {
        Ok(outcome) => {
            app.update_gauges().await;
            info!(added = outcome.added.len() as u64, "samples reloaded");
            Ok("Samples updated successfully".to_string())
        }
        Err(err) => {
            app.metrics.reload_failed_total.inc();
            warn!(error = %err, "sample reload failed; keeping current samples");
            Err(err.into())
        }
    }
}

fn csv_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/csv")], body).into_response()
}

async fn get_task_status_all(State(app): State<AppState>) -> Response {
    csv_response(app.scheduler.export(None).await)
}

async fn get_task_status(State(app): State<AppState>, Path(step): Path<String>) -> Response {
    csv_response(app.scheduler.export(Some(&step)).await)
}

async fn snapshot(State(app): State<AppState>) -> ApiResult<String> {
    let location = app.scheduler.snapshot().await?;
    app.metrics.snapshot_total.inc();
    Ok(format!("Snapshot written to {location}"))
}

async fn healthz() -> &'static str {
    "ok"
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/get_sample/{step}", get(get_sample))
        .route("/get_sample_info/{step}", get(get_sample_info))
        .route("/report/{status}/{step}/{sample}", get(report_status))
        .route("/update_tasks", get(update_tasks))
        .route("/update_samples", get(update_samples))
        .route("/get_task_status", get(get_task_status_all))
        .route("/get_task_status/", get(get_task_status_all))
        .route("/get_task_status/{step}", get(get_task_status))
        .route("/snapshot", get(snapshot))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    alpaca_observe::logging::init_tracing();

    let args = Args::parse();

    let span = info_span!(
        "alpaca-coordinator",
        addr = %args.addr,
        tasks_json = %args.tasks_json.display(),
        samples_list = %args.samples_list.display()
    );
    async move {
        info!("starting coordinator");
        if args.snapshot_interval_ms > 0 && args.snapshot_path.is_none() {
            anyhow::bail!("ALPACA_SNAPSHOT_INTERVAL_MS requires ALPACA_SNAPSHOT_PATH");
        }

        let mut scheduler = Scheduler::from_sources(Sources {
            pipeline_path: args.tasks_json.clone(),
            samples_path: args.samples_list.clone(),
        })
        .context("failed to load pipeline/sample sources")?;
        if let Some(path) = &args.snapshot_path {
            scheduler = scheduler.with_snapshot_store(Arc::new(FsSnapshotStore::new(path.clone())));
        }

        let state = AppState::new(Arc::new(scheduler));
        state.update_gauges().await;
        info!(
            samples = state.metrics.known_samples.get(),
            steps = state.metrics.known_steps.get(),
            snapshots = args.snapshot_path.is_some(),
            "sources loaded"
        );

        if args.metrics_snapshot_interval_ms > 0 {
            let state = state.clone();
            let interval_ms = args.metrics_snapshot_interval_ms;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
                loop {
                    ticker.tick().await;
                    state.emit_metrics_snapshot().await;
                }
            });
        }

        if args.snapshot_interval_ms > 0 {
            let state = state.clone();
            let interval_ms = args.snapshot_interval_ms;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
                // The first tick fires immediately; don't clobber the previous
                // run's snapshot with a fresh table.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    match state.scheduler.snapshot().await {
                        Ok(_) => state.metrics.snapshot_total.inc(),
                        Err(err) => warn!(error = %err, "periodic snapshot failed"),
                    }
                }
            });
        }

        let listener = tokio::net::TcpListener::bind(args.addr).await?;
        info!(addr = %args.addr, "listening");
        axum::serve(listener, router(state.clone()))
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        if args.snapshot_path.is_some() {
            match state.scheduler.snapshot().await {
                Ok(location) => info!(location = %location, "final snapshot written"),
                Err(err) => warn!(error = %err, "final snapshot failed"),
            }
        }
        Ok(())
    }
    .instrument(span)
    .await
}
