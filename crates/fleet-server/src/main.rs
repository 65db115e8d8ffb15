//! HTTP surface for the fleet optimizer.
//!
//! Thin adapter over the optimization core: each endpoint accepts the JSON
//! configuration object, executes a run against the configured backend and
//! answers with `{run_id, status, runtime_seconds, counters}`. The core
//! never depends on this crate.

use anyhow::Result;
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    serve, Json, Router,
};
use clap::Parser;
use serde::Serialize;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, sync::Mutex, time::Instant};
use tokio::net::TcpListener;

use fleet_algo::events::LogSink;
use fleet_algo::{
    apply_placement, compute_placement, validate_inputs, AssignmentDriver, DistanceOracle,
};
use fleet_core::{FleetError, OptimizerConfig};
use fleet_io::{CsvStore, DataSource, SqliteStore};

#[derive(Parser)]
#[command(author, version, about = "Serve the fleet optimizer over HTTP", long_about = None)]
struct Opt {
    /// CSV data directory (file-backend mode)
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
    /// Output directory for file-backend results
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,
    /// SQLite database path; switches to the relational backend
    #[arg(long)]
    db: Option<PathBuf>,
    /// Bounded connection pool size for the relational backend
    #[arg(long, default_value_t = 2)]
    db_pool_min: usize,
    #[arg(long, default_value_t = 10)]
    db_pool_max: usize,
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,
}

enum Backend {
    Csv(CsvStore),
    Sqlite(SqliteStore),
}

impl Backend {
    fn source(&mut self) -> &mut dyn DataSource {
        match self {
            Backend::Csv(store) => store,
            Backend::Sqlite(store) => store,
        }
    }
}

struct AppState {
    backend: Mutex<Backend>,
}

#[derive(Serialize)]
struct RunResponse {
    run_id: i64,
    status: String,
    runtime_seconds: f64,
    counters: serde_json::Value,
}

#[derive(Serialize)]
struct ApiError {
    message: String,
    #[serde(rename = "type")]
    kind: String,
}

fn error_response(err: FleetError) -> Response {
    let (status, kind) = match &err {
        FleetError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
        FleetError::Parse(_) => (StatusCode::BAD_REQUEST, "parse"),
        FleetError::Config(_) => (StatusCode::BAD_REQUEST, "config"),
        FleetError::Pool(_) => (StatusCode::SERVICE_UNAVAILABLE, "resource_exhaustion"),
        FleetError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database"),
        FleetError::Cancelled => (StatusCode::INTERNAL_SERVER_ERROR, "cancelled"),
        FleetError::Invariant(_) => (StatusCode::INTERNAL_SERVER_ERROR, "invariant"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    (
        status,
        Json(ApiError {
            message: err.to_string(),
            kind: kind.to_string(),
        }),
    )
        .into_response()
}

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    Placement,
    Assignment,
    Full,
}

/// Load, validate, optimize, persist. Runs on a blocking thread with the
/// backend lock held; every run owns its own oracle and state map.
fn execute(backend: &mut Backend, raw_config: &serde_json::Value, mode: Mode) -> Result<RunResponse, FleetError> {
    let config: OptimizerConfig = serde_json::from_value(raw_config.clone())?;
    let started = Instant::now();
    let source = backend.source();

    let mut data = source.load_all()?;
    validate_inputs(&data.vehicles, &data.locations, &data.relations, &data.routes)?;

    let run_id = source.start_run(raw_config)?;
    let result = run_pipeline(source, &mut data, &config, mode, run_id);

    match result {
        Ok(counters) => {
            let stats = counters_stats(&counters);
            source.complete_run(run_id, &stats, None)?;
            Ok(RunResponse {
                run_id,
                status: if stats.complete { "completed" } else { "partial" }.to_string(),
                runtime_seconds: started.elapsed().as_secs_f64(),
                counters,
            })
        }
        Err(err) => {
            // Best effort: record the failure before surfacing it
            let _ = source.complete_run(run_id, &Default::default(), Some(&err.to_string()));
            Err(err)
        }
    }
}

fn counters_stats(counters: &serde_json::Value) -> fleet_core::RunStats {
    counters
        .get("assignment")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or(fleet_core::RunStats {
            complete: true,
            ..Default::default()
        })
}

fn run_pipeline(
    source: &mut dyn DataSource,
    data: &mut fleet_io::DataSet,
    config: &OptimizerConfig,
    mode: Mode,
    run_id: i64,
) -> Result<serde_json::Value, FleetError> {
    let oracle = DistanceOracle::new(
        &data.relations,
        config.performance.use_pathfinding,
        config.performance.use_relation_cache,
    );
    let mut counters = serde_json::Map::new();

    if mode == Mode::Placement || mode == Mode::Full {
        let placement = compute_placement(&data.vehicles, &data.routes, &oracle, config);
        source.update_vehicle_locations(&placement.placements)?;
        apply_placement(&mut data.vehicles, &placement);
        counters.insert("placement".into(), serde_json::to_value(&placement.quality)?);
    }

    if mode == Mode::Assignment || mode == Mode::Full {
        let mut sink = LogSink;
        let driver = AssignmentDriver::new(config, &data.routes, &oracle);
        let outcome = driver.run(&data.vehicles, &mut sink)?;
        source.save_assignments(run_id, &outcome.assignments, &outcome.states)?;
        counters.insert("assignment".into(), serde_json::to_value(&outcome.stats)?);
    }

    Ok(serde_json::Value::Object(counters))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let opts = Opt::parse();

    let backend = match &opts.db {
        Some(path) => Backend::Sqlite(SqliteStore::open(path, opts.db_pool_min, opts.db_pool_max)?),
        None => Backend::Csv(CsvStore::new(&opts.data_dir, &opts.output_dir)),
    };
    let state = Arc::new(AppState {
        backend: Mutex::new(backend),
    });

    let app = Router::new()
        .route("/algorithm/placement", post(run_placement))
        .route("/algorithm/assignment", post(run_assignment))
        .route("/algorithm/run", post(run_full))
        .route("/health", get(health))
        .route("/db/info", get(db_info))
        .layer(Extension(state));

    println!("Serving fleet optimizer at {}", opts.addr);
    let listener = TcpListener::bind(opts.addr).await?;
    serve(listener, app).await?;

    Ok(())
}

async fn run_mode(state: Arc<AppState>, config: serde_json::Value, mode: Mode) -> Response {
    let result = tokio::task::spawn_blocking(move || {
        let mut backend = state
            .backend
            .lock()
            .map_err(|_| FleetError::Pool("backend lock poisoned".into()))?;
        execute(&mut backend, &config, mode)
    })
    .await;

    match result {
        Ok(Ok(response)) => Json(response).into_response(),
        Ok(Err(err)) => error_response(err),
        Err(join_err) => error_response(FleetError::Other(join_err.to_string())),
    }
}

async fn run_placement(
    Extension(state): Extension<Arc<AppState>>,
    Json(config): Json<serde_json::Value>,
) -> Response {
    run_mode(state, config, Mode::Placement).await
}

async fn run_assignment(
    Extension(state): Extension<Arc<AppState>>,
    Json(config): Json<serde_json::Value>,
) -> Response {
    run_mode(state, config, Mode::Assignment).await
}

async fn run_full(
    Extension(state): Extension<Arc<AppState>>,
    Json(config): Json<serde_json::Value>,
) -> Response {
    run_mode(state, config, Mode::Full).await
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn db_info(Extension(state): Extension<Arc<AppState>>) -> Response {
    let result = tokio::task::spawn_blocking(move || {
        let mut backend = state
            .backend
            .lock()
            .map_err(|_| FleetError::Pool("backend lock poisoned".into()))?;
        match &mut *backend {
            Backend::Sqlite(store) => {
                let info = store.info()?;
                Ok::<_, FleetError>(serde_json::to_value(info)?)
            }
            Backend::Csv(store) => {
                let data = store.load_all()?;
                Ok(serde_json::json!({
                    "backend": "csv",
                    "locations": data.locations.len(),
                    "location_relations": data.relations.len(),
                    "vehicles": data.vehicles.len(),
                    "routes": data.routes.len(),
                }))
            }
        }
    })
    .await;

    match result {
        Ok(Ok(info)) => Json(info).into_response(),
        Ok(Err(err)) => error_response(err),
        Err(join_err) => error_response(FleetError::Other(join_err.to_string())),
    }
}
