// Telemetry HTTP API
// Stats, reset, health and metrics endpoints, with every route wrapped by
// the request-recording middleware
//
// Numan Thabit 2025 Nov

use crate::config::AppConfig;
use crate::keys::Keyspace;
use crate::metrics;
use crate::query::{QueryOptions, StatsService, StatsSnapshot};
use crate::recorder::{telemetry_middleware, RequestRecorder};
use crate::reset::{ResetOutcome, ResetService};
use crate::ring::RecentEventsRing;
use crate::role::{resolve_or_anonymous, RoleResolver};
use crate::store::CounterStore;
use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router as AxumRouter,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Roles allowed to read or reset telemetry.
pub const ADMIN_ROLES: [&str; 2] = ["admin", "owner"];

#[derive(Clone)]
pub struct ApiState {
    pub recorder: Arc<RequestRecorder>,
    pub stats: Arc<StatsService>,
    pub reset: Arc<ResetService>,
    pub resolver: Arc<dyn RoleResolver>,
}

impl ApiState {
    /// Wire the recorder, query and reset services around one shared store.
    pub fn new(
        store: Arc<dyn CounterStore>,
        resolver: Arc<dyn RoleResolver>,
        keys: Keyspace,
        recent_capacity: usize,
        query: QueryOptions,
        delete_batch: usize,
    ) -> Self {
        let ring = RecentEventsRing::new(store.clone(), &keys, recent_capacity);
        let reset = ResetService::new(store.clone(), keys.clone(), query.scan_count, delete_batch);
        let recorder = RequestRecorder::new(
            store.clone(),
            resolver.clone(),
            keys.clone(),
            ring.clone(),
        );
        Self {
            recorder: Arc::new(recorder),
            stats: Arc::new(StatsService::new(store, ring, keys, query)),
            reset: Arc::new(reset),
            resolver,
        }
    }

    pub fn from_config(
        store: Arc<dyn CounterStore>,
        resolver: Arc<dyn RoleResolver>,
        config: &AppConfig,
    ) -> Self {
        Self::new(
            store,
            resolver,
            Keyspace::new(config.key_prefix.clone()),
            config.recent_capacity,
            config.query_options(),
            config.delete_batch,
        )
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

/// Create the HTTP router with API endpoints
pub fn create_api_router(state: ApiState) -> AxumRouter {
    let recorder = state.recorder.clone();
    AxumRouter::new()
        .route("/health", get(health_check))
        .route("/metrics", get(prometheus_metrics))
        .route("/api/v1/stats", get(get_stats))
        .route("/api/v1/stats/reset", post(reset_stats))
        .with_state(state)
        .layer(middleware::from_fn_with_state(recorder, telemetry_middleware))
        .layer(TraceLayer::new_for_http())
}

fn require_admin(state: &ApiState, headers: &HeaderMap) -> Result<String, ApiError> {
    let role = resolve_or_anonymous(state.resolver.as_ref(), headers);
    if ADMIN_ROLES.contains(&role.as_str()) {
        Ok(role)
    } else {
        Err(api_error(
            StatusCode::FORBIDDEN,
            format!("role {role} may not access telemetry"),
        ))
    }
}

/// Health check endpoint; reports the counter store connection state
async fn health_check(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "store": state.stats.connection_state().to_string(),
    }))
}

/// Aggregated request statistics; degrades instead of failing
async fn get_stats(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<StatsSnapshot>, ApiError> {
    require_admin(&state, &headers)?;
    Ok(Json(state.stats.query().await))
}

/// Zero every telemetry counter; store errors are reported in full
async fn reset_stats(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<ResetOutcome>, ApiError> {
    let role = require_admin(&state, &headers)?;
    state.reset.reset().await.map(Json).map_err(|e| {
        warn!(error = %e, role = %role, "telemetry reset failed");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

/// Prometheus text exposition of the aggregator's own metrics
async fn prometheus_metrics() -> Response {
    match metrics::render() {
        Ok(body) => ([(CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
