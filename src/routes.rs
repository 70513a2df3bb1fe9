use crate::cycle::{CycleError, CycleErrorKind, CycleReport, Fulfillment};
use crate::models::{ApiError, OrderRecord};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub fulfillment: Fulfillment,
    pub prometheus_handle: Option<PrometheusHandle>,
}

pub fn build_router(state: AppState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/reports/latest", get(latest_report))
        .route("/batches", post(submit_batch))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}

/// Liveness plus the size of the processed-order ledger.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "pickwell",
        "ledger_size": state.fulfillment.ledger_len().await,
    }))
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    let body = state
        .prometheus_handle
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

/// Most recent cycle, from the poller or a submitted batch.
///
/// - Method: `GET`
/// - Path: `/reports/latest`
/// - Response: `CycleReport`, or 404 `no_report` before the first cycle
async fn latest_report(State(state): State<AppState>) -> Result<Json<CycleReport>, AppError> {
    crate::metrics::inc_requests("/reports/latest");
    state
        .fulfillment
        .latest()
        .await
        .map(Json)
        .ok_or(AppError::NotFound("no_report"))
}

#[derive(Debug, Deserialize)]
struct BatchRequest {
    orders: Vec<OrderRecord>,
}

/// Run one cycle over a caller-supplied batch against the shared ledger.
///
/// - Method: `POST`
/// - Path: `/batches`
/// - Body: `{ "orders": [...] }` in the ShipStation order shape
/// - Response: `CycleReport`
async fn submit_batch(
    State(state): State<AppState>,
    Json(payload): Json<BatchRequest>,
) -> Result<Json<CycleReport>, AppError> {
    crate::metrics::inc_requests("/batches");
    if payload.orders.is_empty() {
        return Err(CycleError::invalid_input("batch", "orders must not be empty").into());
    }
    info!(
        target = "pickwell.api",
        orders = payload.orders.len(),
        "batch submitted"
    );
    let report = state.fulfillment.process(payload.orders, "api").await?;
    Ok(Json(report))
}

#[derive(Debug)]
enum AppError {
    Cycle(CycleError),
    NotFound(&'static str),
}

impl From<CycleError> for AppError {
    fn from(value: CycleError) -> Self {
        Self::Cycle(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Cycle(err) => {
                let status = match err.kind() {
                    CycleErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    CycleErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
            AppError::NotFound(what) => {
                let payload = ApiError {
                    error: what.to_string(),
                    detail: None,
                };
                (StatusCode::NOT_FOUND, Json(payload)).into_response()
            }
        }
    }
}
