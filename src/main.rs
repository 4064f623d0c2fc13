mod config;
mod export;
mod http;
mod marketplace;
mod metrics;
mod migration;
mod models;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::Utc;
use config::MigratorConfig;
use export::ExportError;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use migration::{
    BatchProgress, CatalogOverview, EngineError, EngineErrorKind, MigrationEngine, open_store,
    schedule::{ScheduleDecision, ScheduledBatch},
};
use models::{ApiError, AuditLogEntry, FailedItem, ResultRecord};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "migrator.api", "server crashed: {err:?}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = MigratorConfig::load()?;
    let store = open_store(
        config.store,
        &config.data_dir,
        config.redis_url.as_deref(),
        &config.redis_prefix,
    )?;
    let gateway = marketplace::gateway_from_env(config.enable_network);
    info!(
        target = "migrator.api",
        store = ?config.store,
        network = config.enable_network,
        concurrency = config.concurrency,
        "engine_configured"
    );
    let engine = MigrationEngine::init(gateway, store, config.scheduler_config()).await;

    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    let state = AppState {
        engine,
        openapi: Arc::new(load_openapi()),
        prometheus_handle,
    };
    let app = router(state, config.request_max_bytes);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(target = "migrator.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    engine: Arc<MigrationEngine>,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
}

fn router(state: AppState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .route("/catalog", get(catalog))
        .route("/batches", post(start_batch))
        .route("/batches/retry-failed", post(retry_failed))
        .route("/batches/pause", post(set_paused))
        .route("/batches/concurrency", put(set_concurrency))
        .route("/batches/progress", get(batch_progress))
        .route(
            "/batches/schedule",
            post(schedule_batch).get(pending_schedule).delete(cancel_schedule),
        )
        .route("/results", get(results))
        .route("/results.csv", get(results_csv))
        .route("/audit", get(audit))
        .route("/audit.csv", get(audit_csv))
        .route("/failed-items", get(failed_items))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
}

fn load_openapi() -> serde_json::Value {
    serde_yaml::from_str(include_str!("../docs/openapi.yaml")).unwrap_or_else(|err| {
        warn!(target = "migrator.api", error = %err, "openapi_document_invalid");
        json!({ "openapi": "3.0.3" })
    })
}

/// Liveness check. `GET /health`, no body.
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
    }))
}

async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
}

async fn openapi_json(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json((*state.openapi).clone())
}

async fn swagger_ui() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Catalog Migrator API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#,
    )
}

#[derive(Debug, Default, Deserialize)]
struct CatalogQuery {
    #[serde(default)]
    refresh: bool,
}

/// Compares both catalogs.
///
/// - Method: `GET`
/// - Path: `/catalog`
/// - Query: `refresh=true` bypasses the cached comparison
/// - Response: `CatalogOverview`
async fn catalog(
    State(state): State<AppState>,
    Query(query): Query<CatalogQuery>,
) -> Result<Json<CatalogOverview>, AppError> {
    crate::metrics::inc_requests("/catalog");
    Ok(Json(state.engine.catalog_overview(query.refresh).await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchAccepted {
    session_id: String,
}

/// Starts a batch over every source item missing at the destination.
///
/// - Method: `POST`
/// - Path: `/batches`
/// - Response: `202 { sessionId }`; 400 when the catalog is too small, 409 when a batch is
///   running or nothing is missing
async fn start_batch(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<BatchAccepted>), AppError> {
    crate::metrics::inc_requests("/batches");
    let session_id = state.engine.start_missing_batch().await?;
    info!(target = "migrator.api", session_id = %session_id, "batch_accepted");
    Ok((StatusCode::ACCEPTED, Json(BatchAccepted { session_id })))
}

/// Re-runs only the items in the failed-item queue.
async fn retry_failed(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<BatchAccepted>), AppError> {
    crate::metrics::inc_requests("/batches/retry-failed");
    let session_id = state.engine.start_resume_batch().await?;
    info!(target = "migrator.api", session_id = %session_id, "resume_batch_accepted");
    Ok((StatusCode::ACCEPTED, Json(BatchAccepted { session_id })))
}

#[derive(Debug, Deserialize, Serialize)]
struct PauseRequest {
    paused: bool,
}

async fn set_paused(
    State(state): State<AppState>,
    Json(req): Json<PauseRequest>,
) -> Json<PauseRequest> {
    crate::metrics::inc_requests("/batches/pause");
    let pause = state.engine.scheduler().pause();
    pause.set_paused(req.paused);
    Json(PauseRequest {
        paused: pause.is_paused(),
    })
}

#[derive(Debug, Deserialize, Serialize)]
struct ConcurrencyRequest {
    limit: usize,
}

/// Values outside 1..=5 are clamped; the applied limit is returned.
async fn set_concurrency(
    State(state): State<AppState>,
    Json(req): Json<ConcurrencyRequest>,
) -> Json<ConcurrencyRequest> {
    crate::metrics::inc_requests("/batches/concurrency");
    let limit = state.engine.scheduler().set_concurrency_limit(req.limit);
    Json(ConcurrencyRequest { limit })
}

async fn batch_progress(State(state): State<AppState>) -> Json<BatchProgress> {
    Json(state.engine.scheduler().progress())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleRequest {
    run_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    schedule: Option<ScheduledBatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

/// Defers a batch of missing items to `runAt` (RFC 3339). Past timestamps start now.
///
/// - Method: `POST`
/// - Path: `/batches/schedule`
/// - Body: `{ runAt }`
/// - Response: `202 { status: "scheduled", schedule }` or `202 { status: "started", sessionId }`
async fn schedule_batch(
    State(state): State<AppState>,
    Json(req): Json<ScheduleRequest>,
) -> Result<(StatusCode, Json<ScheduleResponse>), AppError> {
    crate::metrics::inc_requests("/batches/schedule");
    let response = match state.engine.schedule_missing_batch(&req.run_at).await? {
        ScheduleDecision::Deferred(batch) => ScheduleResponse {
            status: "scheduled",
            schedule: Some(batch),
            session_id: None,
        },
        ScheduleDecision::Immediate { session_id } => ScheduleResponse {
            status: "started",
            schedule: None,
            session_id: Some(session_id),
        },
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn pending_schedule(State(state): State<AppState>) -> Json<serde_json::Value> {
    let pending = state.engine.schedule_gate().pending().await;
    Json(json!({ "pending": pending }))
}

async fn cancel_schedule(State(state): State<AppState>) -> Json<serde_json::Value> {
    crate::metrics::inc_requests("/batches/schedule");
    let cancelled = state.engine.schedule_gate().cancel().await;
    Json(json!({ "cancelled": cancelled }))
}

async fn results(State(state): State<AppState>) -> Json<Vec<ResultRecord>> {
    Json(state.engine.results().await)
}

async fn results_csv(State(state): State<AppState>) -> Result<Response, AppError> {
    crate::metrics::inc_requests("/results.csv");
    let body = export::results_to_csv(&state.engine.results().await)?;
    Ok(csv_response("migration-results", body))
}

async fn audit(State(state): State<AppState>) -> Json<Vec<AuditLogEntry>> {
    Json(state.engine.audit_entries().await)
}

async fn audit_csv(State(state): State<AppState>) -> Result<Response, AppError> {
    crate::metrics::inc_requests("/audit.csv");
    let body = export::audit_to_csv(&state.engine.audit_entries().await)?;
    Ok(csv_response("migration-audit", body))
}

async fn failed_items(State(state): State<AppState>) -> Json<Vec<FailedItem>> {
    Json(state.engine.failed_items().await)
}

fn csv_response(prefix: &str, body: String) -> Response {
    let filename = export::export_filename(prefix, Utc::now());
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response()
}

#[derive(Debug)]
enum AppError {
    Engine(EngineError),
    Export(ExportError),
}

impl From<EngineError> for AppError {
    fn from(value: EngineError) -> Self {
        Self::Engine(value)
    }
}

impl From<ExportError> for AppError {
    fn from(value: ExportError) -> Self {
        Self::Export(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::Engine(err) => {
                let status = match err.kind() {
                    EngineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    EngineErrorKind::Conflict => StatusCode::CONFLICT,
                    EngineErrorKind::Upstream => StatusCode::BAD_GATEWAY,
                };
                if status == StatusCode::BAD_GATEWAY {
                    warn!(target = "migrator.api", error = %err, "collaborator_failed");
                }
                (
                    status,
                    ApiError {
                        error: err.code().to_string(),
                        detail: Some(err.to_string()),
                    },
                )
            }
            AppError::Export(err) => {
                error!(target = "migrator.api", error = %err, "export_failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: "export_failed".into(),
                        detail: Some(err.to_string()),
                    },
                )
            }
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
