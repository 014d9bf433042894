//! REST handlers for the control API

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::metrics;
use crate::models::Nation;
use crate::recruitment::StatusSummary;

use super::server::AppState;

/// Upper bound for one manual request
pub const MAX_RECRUITABLE: usize = 100;

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failure that still carries what was done before it
    pub fn partial(data: T, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Some(data),
            error: Some(message.into()),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub engine_running: bool,
}

/// Manual recruitable request
#[derive(Debug, Deserialize)]
pub struct RecruitableRequest {
    pub count: usize,
}

/// Nations reserved for manual telegrams
#[derive(Debug, Default, Serialize)]
pub struct RecruitableResponse {
    pub nations: Vec<String>,
}

/// One-off evaluation result
#[derive(Debug, Serialize)]
pub struct EvaluationResponse {
    pub nation: String,
    pub recruitable: bool,
    pub verdict: String,
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/status", get(get_status))
        .route("/api/recruitment/start", post(start_recruitment))
        .route("/api/recruitment/stop", post(stop_recruitment))
        .route("/api/recruitable", post(reserve_recruitable))
        .route("/api/nations/{name}", get(evaluate_nation))
        .route("/metrics", get(export_metrics))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        engine_running: state.engine.is_running().await,
    }))
}

async fn get_status(State(state): State<AppState>) -> axum::response::Response {
    match state.engine.status_summary().await {
        Ok(summary) => Json(ApiResponse::<StatusSummary>::success(summary)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build status summary");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(e.to_string())),
            )
                .into_response()
        }
    }
}

async fn start_recruitment(State(state): State<AppState>) -> axum::response::Response {
    match state.engine.start().await {
        Ok(()) => Json(ApiResponse::success("recruitment started")).into_response(),
        Err(e) => (StatusCode::CONFLICT, Json(ApiResponse::error(e.to_string()))).into_response(),
    }
}

async fn stop_recruitment(State(state): State<AppState>) -> axum::response::Response {
    match state.engine.stop().await {
        Ok(()) => Json(ApiResponse::success("recruitment stopped")).into_response(),
        Err(e) => (StatusCode::CONFLICT, Json(ApiResponse::error(e.to_string()))).into_response(),
    }
}

/// Reserve up to `count` candidates as `reserved_manual`
///
/// A transport error ends the request early; the nations reserved before
/// it are still returned.
async fn reserve_recruitable(
    State(state): State<AppState>,
    Json(request): Json<RecruitableRequest>,
) -> axum::response::Response {
    if request.count == 0 || request.count > MAX_RECRUITABLE {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!(
                "count must be between 1 and {MAX_RECRUITABLE}"
            ))),
        )
            .into_response();
    }

    let mut stream = state.engine.recruitable_nations(request.count, false);
    let mut response = RecruitableResponse::default();

    while let Some(item) = stream.next().await {
        match item {
            Ok(Nation { name, .. }) => response.nations.push(name),
            Err(e) => {
                tracing::warn!(error = %e, reserved = response.nations.len(), "Manual request ended early");
                return (
                    StatusCode::BAD_GATEWAY,
                    Json(ApiResponse::partial(response, e.to_string())),
                )
                    .into_response();
            }
        }
    }

    Json(ApiResponse::success(response)).into_response()
}

async fn evaluate_nation(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> axum::response::Response {
    match state.engine.evaluate_nation(&name).await {
        Ok(verdict) => Json(ApiResponse::success(EvaluationResponse {
            nation: name,
            recruitable: verdict.is_recruitable(),
            verdict: verdict.to_string(),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        )
            .into_response(),
    }
}

async fn export_metrics() -> axum::response::Response {
    match metrics::encode_metrics() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// Tests
// ============================================================================
