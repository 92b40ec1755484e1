//! HTTP surface: batch submission and status, plus one-off generation and
//! WAV lookup passed through to the upstream.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info};

use crate::client::ClientError;
use crate::engine::{BatchController, BatchRequest, BatchStatus, DirectGenerator, DirectRequest};
use crate::error::Error;
use crate::model::{JobHandle, Variant};

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<BatchController>,
    pub direct: Arc<DirectGenerator>,
}

/// Request body for both batch routes.
#[derive(Debug, Deserialize)]
pub struct BatchSubmitBody {
    pub csv_string: String,
    pub run_name: String,
}

/// Request body for `POST /api/worker_generate`.
#[derive(Debug, Deserialize)]
pub struct WorkerGenerateBody {
    #[serde(default)]
    pub prompt: Option<String>,
    /// Any JSON value; read as true unless false, null, zero or empty.
    #[serde(default)]
    pub make_instrumental: Value,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GetWavQuery {
    pub clip_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Payment required: {0}")]
    PaymentRequired(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidInput(_) | Error::Csv(_) => ApiError::BadRequest(err.to_string()),
            Error::BatchInProgress { .. } => ApiError::Conflict(err.to_string()),
            Error::Client(ClientError::Api { status: 402, body }) => {
                ApiError::PaymentRequired(upstream_detail(body))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// The `detail` field of an upstream JSON error body, or the body itself.
fn upstream_detail(body: String) -> String {
    serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(body)
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::PaymentRequired(msg) => {
                (StatusCode::PAYMENT_REQUIRED, "PAYMENT_REQUIRED", msg)
            }
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Internal(msg) => {
                error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/batch", get(batch_status))
        .route("/api/batch_generate", post(batch_generate))
        .route("/api/batch_generate_custom", post(batch_generate_custom))
        .route("/api/worker_generate", post(worker_generate))
        .route("/api/get_wav", get(get_wav))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(addr: &str, state: AppState) -> crate::error::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn batch_status(State(state): State<AppState>) -> ApiResult<Json<BatchStatus>> {
    state
        .controller
        .status()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no batch has been submitted".to_string()))
}

async fn batch_generate(
    State(state): State<AppState>,
    body: Result<Json<BatchSubmitBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    submit(&state, body?.0, Variant::Prompt).await
}

async fn batch_generate_custom(
    State(state): State<AppState>,
    body: Result<Json<BatchSubmitBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    submit(&state, body?.0, Variant::Custom).await
}

async fn submit(
    state: &AppState,
    body: BatchSubmitBody,
    variant: Variant,
) -> ApiResult<Json<Value>> {
    let ticket = state
        .controller
        .submit(BatchRequest {
            csv_text: body.csv_string,
            run_name: body.run_name,
            variant,
        })
        .await?;
    info!(batch_id = %ticket.id, run = %ticket.run_name, total = ticket.total, "batch started");
    Ok(Json(json!({})))
}

/// Generate one song synchronously. Answers `[]` when every slot is busy.
async fn worker_generate(
    State(state): State<AppState>,
    body: Result<Json<WorkerGenerateBody>, JsonRejection>,
) -> ApiResult<Json<Vec<JobHandle>>> {
    let body = body?.0;
    let prompt = body
        .prompt
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Prompt is required".to_string()))?;

    let handles = state
        .direct
        .generate(DirectRequest {
            prompt,
            make_instrumental: truthy(&body.make_instrumental),
            model: body.model,
        })
        .await?;
    Ok(Json(handles.unwrap_or_default()))
}

async fn get_wav(
    State(state): State<AppState>,
    Query(query): Query<GetWavQuery>,
) -> ApiResult<Json<Value>> {
    let clip_id = query
        .clip_id
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("clip_id is required".to_string()))?;
    Ok(Json(state.direct.get_wav(&clip_id).await?))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
