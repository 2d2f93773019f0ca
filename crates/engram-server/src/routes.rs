//! HTTP routes
//!
//! One route per engine operation. The principal comes from the
//! `x-principal-id` header - authentication itself happens upstream of
//! this service; an empty or missing header is rejected outright.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use engram_core::{
    CreateMemoryInput, Error, FeedbackInput, MemoryEngine, MemoryPatch, PredictionRequest,
    SearchOptions,
};

pub type AppState = Arc<MemoryEngine>;

/// Build the full router over an engine
pub fn router(engine: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/memories", post(create_memory))
        .route("/v1/memories/auto", post(smart_create))
        .route(
            "/v1/memories/{id}",
            get(get_memory).patch(update_memory).delete(delete_memory),
        )
        .route("/v1/memories/{id}/feedback", post(apply_feedback))
        .route("/v1/search", post(search))
        .route("/v1/predict", post(predict))
        .route("/v1/analyze", post(analyze))
        .route("/v1/maintenance", get(maintenance_report))
        .route("/v1/metrics", get(learning_metrics))
        .route("/v1/validate", post(validate_response))
        .route("/v1/stats", get(stats))
        .with_state(engine)
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::ServiceDegraded(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "internal error");
        }
        let body = serde_json::json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

fn principal(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-principal-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ApiError(Error::Unauthorized))
}

// ============================================================================
// REQUEST BODIES
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
struct SearchBody {
    query: String,
    options: SearchOptions,
}

impl Default for SearchBody {
    fn default() -> Self {
        Self {
            query: String::new(),
            options: SearchOptions::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
struct AnalyzeBody {
    auto_apply: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ValidateBody {
    agent_identity: String,
    response_text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ContextParams {
    context: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MetricsParams {
    days: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FeedbackResponse {
    new_score: f64,
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": engram_core::VERSION,
    }))
}

async fn create_memory(
    State(engine): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<CreateMemoryInput>,
) -> ApiResult<engram_core::MemoryRecord> {
    let principal = principal(&headers)?;
    Ok(Json(engine.create_memory(&principal, input).await?))
}

async fn smart_create(
    State(engine): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ContextParams>,
    Json(input): Json<CreateMemoryInput>,
) -> ApiResult<engram_core::SmartCreateResult> {
    let principal = principal(&headers)?;
    Ok(Json(
        engine
            .smart_create(&principal, input, params.context.as_deref())
            .await?,
    ))
}

async fn get_memory(
    State(engine): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<ContextParams>,
) -> ApiResult<engram_core::MemoryWithAnalytics> {
    let principal = principal(&headers)?;
    Ok(Json(
        engine
            .get_memory(&principal, &id, params.context.as_deref())
            .await?,
    ))
}

async fn update_memory(
    State(engine): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<MemoryPatch>,
) -> ApiResult<engram_core::MemoryRecord> {
    let principal = principal(&headers)?;
    Ok(Json(engine.update_memory(&principal, &id, patch).await?))
}

async fn delete_memory(
    State(engine): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    let principal = principal(&headers)?;
    engine.delete_memory(&principal, &id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

async fn apply_feedback(
    State(engine): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(feedback): Json<FeedbackInput>,
) -> ApiResult<FeedbackResponse> {
    let principal = principal(&headers)?;
    let new_score = engine.apply_feedback(&principal, &id, feedback).await?;
    Ok(Json(FeedbackResponse { new_score }))
}

async fn search(
    State(engine): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SearchBody>,
) -> ApiResult<engram_core::SearchResponse> {
    let principal = principal(&headers)?;
    Ok(Json(engine.search(&principal, &body.query, body.options).await?))
}

async fn predict(
    State(engine): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PredictionRequest>,
) -> ApiResult<engram_core::PredictionSet> {
    let principal = principal(&headers)?;
    Ok(Json(engine.predict(&principal, request).await?))
}

async fn analyze(
    State(engine): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AnalyzeBody>,
) -> ApiResult<engram_core::AnalyzeReport> {
    let principal = principal(&headers)?;
    Ok(Json(engine.analyze(&principal, body.auto_apply).await?))
}

async fn maintenance_report(
    State(engine): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<engram_core::MaintenanceReport> {
    let principal = principal(&headers)?;
    Ok(Json(engine.maintenance_report(&principal).await?))
}

async fn learning_metrics(
    State(engine): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<MetricsParams>,
) -> ApiResult<engram_core::MetricsReport> {
    let principal = principal(&headers)?;
    let days = params.days.unwrap_or(7);
    Ok(Json(engine.learning_metrics(&principal, days).await?))
}

async fn validate_response(
    State(engine): State<AppState>,
    Json(body): Json<ValidateBody>,
) -> ApiResult<engram_core::ValidationReport> {
    Ok(Json(
        engine
            .validate_response(&body.agent_identity, &body.response_text)
            .await?,
    ))
}

async fn stats(
    State(engine): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<engram_core::EngineStats> {
    let principal = principal(&headers)?;
    Ok(Json(engine.stats(&principal).await?))
}
