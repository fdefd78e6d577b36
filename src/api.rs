//! HTTP control surface.
//!
//! Thin handlers over [`GuardianContext`]: each one decodes the request, calls
//! one pipeline operation, and maps the typed error onto a status code. Used
//! by the `api` binary and the integration tests.

use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigUpdate, RedactedConfig, TimingConfig};
use crate::monitor::TimeoutMonitor;
use crate::pipeline::{ExecuteOptions, ExecuteResponse, GuardianContext, StatusSnapshot};
use crate::sdk::GuardianError;

// ─── App State ───────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub ctx: GuardianContext,
}

// ─── Request / Response DTOs ─────────────────────────────────

#[derive(Deserialize)]
struct HeartbeatReq {
    #[serde(default)]
    key: String,
    #[serde(default)]
    action: Option<String>,
}

#[derive(Deserialize)]
struct ExecuteReq {
    #[serde(default)]
    key: String,
    #[serde(flatten)]
    options: ExecuteOptions,
}

#[derive(Deserialize)]
struct UpdateReq {
    #[serde(default)]
    key: String,
    #[serde(flatten)]
    update: ConfigUpdate,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    time: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatResponse {
    success: bool,
    message: &'static str,
    timestamp: String,
}

#[derive(Serialize)]
#[serde(untagged)]
enum HeartbeatReply {
    Recorded(HeartbeatResponse),
    Status(Box<StatusSnapshot>),
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    required: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tx_id: Option<String>,
}

// ─── Error helpers ───────────────────────────────────────────

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<(StatusCode, Json<T>), ApiError>;

fn error_code(e: &GuardianError) -> (StatusCode, &'static str) {
    use GuardianError::*;
    match e {
        Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
        NotExpired { .. } => (StatusCode::CONFLICT, "notExpired"),
        NotYetEligible { .. } => (StatusCode::CONFLICT, "notYetEligible"),
        NoEligibleUtxo => (StatusCode::CONFLICT, "noEligibleUtxo"),
        NoHeartbeatYet => (StatusCode::CONFLICT, "noHeartbeatYet"),
        AlreadyExecuted { .. } => (StatusCode::CONFLICT, "alreadyExecuted"),
        AlreadySpent(_) => (StatusCode::CONFLICT, "alreadySpent"),
        InputsMissing(_) => (StatusCode::CONFLICT, "inputsMissing"),
        ChainUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "chainUnavailable"),
        ConfigMissing(_) => (StatusCode::SERVICE_UNAVAILABLE, "configMissing"),
        InvalidConfig(_) => (StatusCode::BAD_REQUEST, "invalidConfig"),
        InsufficientAmount { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "insufficientAmount"),
        SubmitRejected(_) => (StatusCode::BAD_GATEWAY, "submitRejected"),
        ScriptLayoutInvalid(_) => (StatusCode::INTERNAL_SERVER_ERROR, "scriptLayoutInvalid"),
        Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
        Signing(_) => (StatusCode::INTERNAL_SERVER_ERROR, "signing"),
    }
}

fn api_error(e: GuardianError) -> ApiError {
    let (status, code) = error_code(&e);
    let mut body = ErrorResponse {
        error: e.to_string(),
        code,
        ..Default::default()
    };
    match e {
        GuardianError::NotExpired {
            elapsed_secs,
            required_secs,
        } => {
            body.elapsed = Some(elapsed_secs);
            body.required = Some(required_secs);
            body.remaining = Some(required_secs.saturating_sub(elapsed_secs));
        }
        GuardianError::AlreadyExecuted { tx_id } => body.tx_id = tx_id,
        _ => {}
    }
    if status.is_server_error() {
        tracing::error!(code, error = %body.error, "request failed");
    }
    (status, Json(body))
}

// ─── GET /health ─────────────────────────────────────────────

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

// ─── GET /config ─────────────────────────────────────────────

async fn get_config(State(state): State<AppState>) -> ApiResult<RedactedConfig> {
    let config = state.ctx.store.require_config().map_err(api_error)?;
    Ok((StatusCode::OK, Json(config.redacted())))
}

// ─── POST /update ────────────────────────────────────────────

async fn update_config(
    State(state): State<AppState>,
    Json(req): Json<UpdateReq>,
) -> ApiResult<RedactedConfig> {
    let redacted = state
        .ctx
        .update_config(&req.key, req.update)
        .map_err(api_error)?;
    Ok((StatusCode::OK, Json(redacted)))
}

// ─── POST /heartbeat ─────────────────────────────────────────

async fn heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatReq>,
) -> ApiResult<HeartbeatReply> {
    if req.action.as_deref() == Some("status") {
        state.ctx.authorize(&req.key).map_err(api_error)?;
        let snapshot = state.ctx.status().await.map_err(api_error)?;
        return Ok((StatusCode::OK, Json(HeartbeatReply::Status(Box::new(snapshot)))));
    }

    let record = state.ctx.heartbeat(&req.key).map_err(api_error)?;
    Ok((
        StatusCode::OK,
        Json(HeartbeatReply::Recorded(HeartbeatResponse {
            success: true,
            message: "Heartbeat recorded",
            timestamp: record.iso_date,
        })),
    ))
}

// ─── POST /execute ───────────────────────────────────────────

async fn execute(
    State(state): State<AppState>,
    Json(req): Json<ExecuteReq>,
) -> ApiResult<ExecuteResponse> {
    let resp = state
        .ctx
        .execute(&req.key, req.options)
        .await
        .map_err(api_error)?;
    if !resp.dry_run {
        tracing::info!(tx_id = resp.tx_id.as_deref().unwrap_or_default(), "claim executed via API");
    }
    Ok((StatusCode::OK, Json(resp)))
}

// ─── Router builder ──────────────────────────────────────────

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/config", get(get_config))
        .route("/update", post(update_config))
        .route("/heartbeat", post(heartbeat))
        .route("/execute", post(execute))
        .with_state(state)
}

// ─── Server ──────────────────────────────────────────────────

/// Serve the control surface on `listen` with the monitor running alongside,
/// until Ctrl-C.
pub async fn serve(ctx: GuardianContext, listen: &str) -> Result<(), Box<dyn std::error::Error>> {
    let interval = ctx
        .store
        .load_config()?
        .map(|c| c.timing.check_interval_seconds)
        .unwrap_or(TimingConfig::default().check_interval_seconds);
    let monitor = TimeoutMonitor::new(ctx.clone()).start(Duration::from_secs(interval.max(1)));

    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(address = %listener.local_addr()?, "listening");
    tracing::info!("endpoints: GET /health, GET /config, POST /update, POST /heartbeat, POST /execute");

    axum::serve(listener, build_router(AppState { ctx }))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "ctrl-c handler failed");
            }
        })
        .await?;

    monitor.abort();
    tracing::info!("shutdown complete");
    Ok(())
}
