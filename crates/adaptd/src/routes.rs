//! API routes for adaptd.

use crate::server::AppState;
use adapt_common::{
    AdaptError, AdaptationEvent, AuditKind, AuditRecord, Classification, ExportRecord, Policy,
    TelemetrySample,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

type AppStateArc = Arc<AppState>;

fn reject(error: &AdaptError) -> (StatusCode, String) {
    let status = match error {
        AdaptError::MalformedTelemetry(_) | AdaptError::InvalidPolicy(_) => {
            StatusCode::BAD_REQUEST
        }
        AdaptError::UnknownPolicy(_) => StatusCode::NOT_FOUND,
        AdaptError::OutOfOrderSample { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error.to_string())
}

// ============================================================================
// Telemetry Routes
// ============================================================================

/// Response to an accepted telemetry sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryResponse {
    pub classification: Classification,
    pub suppressed_by_cooldown: bool,
    /// Id of the adaptation event issued this cycle, if any.
    pub event_id: Option<String>,
    pub event_delivered: Option<bool>,
}

pub fn telemetry_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/telemetry", post(ingest_telemetry))
}

async fn ingest_telemetry(
    State(state): State<AppStateArc>,
    Json(sample): Json<TelemetrySample>,
) -> Result<Json<TelemetryResponse>, (StatusCode, String)> {
    let outcome = state.cycle.ingest(sample).await.map_err(|e| {
        warn!("Telemetry rejected: {}", e);
        reject(&e)
    })?;

    Ok(Json(TelemetryResponse {
        classification: outcome.classification,
        suppressed_by_cooldown: outcome.suppressed_by_cooldown,
        event_id: outcome.event.as_ref().map(|e| e.event_id.clone()),
        event_delivered: outcome.event.as_ref().map(|e| e.delivered),
    }))
}

// ============================================================================
// Policy Routes
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyResponse {
    pub message: String,
}

pub fn policy_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/policy", post(register_policy))
}

async fn register_policy(
    State(state): State<AppStateArc>,
    Json(policy): Json<Policy>,
) -> Result<(StatusCode, Json<PolicyResponse>), (StatusCode, String)> {
    policy.validate().map_err(|e| {
        error!("Policy rejected: {}", e);
        reject(&e)
    })?;

    let policy_id = policy.policy_id.clone();
    state.cycle.store().put_policy(policy).await;

    let record = AuditRecord::new(AuditKind::PolicyRegistered, &policy_id);
    if let Err(e) = state.cycle.audit().log(&record).await {
        warn!("Failed to audit policy registration: {}", e);
    }

    info!("Policy '{}' registered", policy_id);
    Ok((
        StatusCode::CREATED,
        Json(PolicyResponse {
            message: format!("Policy '{}' registered", policy_id),
        }),
    ))
}

// ============================================================================
// Knowledge Routes
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct TailQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

pub fn knowledge_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/knowledge/:policy_id", get(knowledge_view))
        .route(
            "/v1/knowledge/:policy_id/:instance_id/export",
            get(knowledge_export),
        )
}

async fn knowledge_view(
    State(state): State<AppStateArc>,
    Path(policy_id): Path<String>,
) -> Result<Json<crate::knowledge::KnowledgeView>, (StatusCode, String)> {
    state
        .cycle
        .store()
        .knowledge_view(&policy_id)
        .await
        .map(Json)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("Policy '{}' not found", policy_id),
            )
        })
}

async fn knowledge_export(
    State(state): State<AppStateArc>,
    Path((policy_id, instance_id)): Path<(String, String)>,
    Query(query): Query<TailQuery>,
) -> Result<Json<Vec<ExportRecord>>, (StatusCode, String)> {
    state
        .cycle
        .export()
        .tail(&policy_id, &instance_id, query.limit.unwrap_or(0))
        .await
        .map(Json)
        .map_err(|e| {
            error!("Export read failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })
}

// ============================================================================
// Event Routes
// ============================================================================

pub fn event_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/events", get(recent_events))
}

async fn recent_events(
    State(state): State<AppStateArc>,
    Query(query): Query<TailQuery>,
) -> Json<Vec<AdaptationEvent>> {
    let limit = query.limit.unwrap_or(50);
    Json(state.cycle.store().events(limit).await)
}

// ============================================================================
// Health Routes
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub policies: usize,
}

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/health", get(health_check))
}

async fn health_check(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        policies: state.cycle.store().policy_count().await,
    })
}
