//! Cluster health, degraded-mode decision and disruption admission handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    core::cluster::degraded_guard::{admission, DisruptionKind},
    core::cluster::membership::ReconcilerStatus,
    domain::entities::{ClusterHealthSnapshot, DegradedModeDecision},
    error::{AppError, Result},
    AppState,
};

#[derive(Debug, Serialize)]
pub struct DisruptionResponse {
    pub permit_id: Uuid,
    pub kind: String,
    /// Counted against the degraded-mode budget until released
    pub counted: bool,
    pub granted_at: DateTime<Utc>,
    pub decision: DegradedModeDecision,
}

pub async fn health_checker_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "success",
        "message": "TNF recovery controller is running 🚀",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

pub async fn get_snapshot(State(state): State<AppState>) -> Json<ClusterHealthSnapshot> {
    Json(state.monitor.snapshot().as_ref().clone())
}

pub async fn get_decision(State(state): State<AppState>) -> Json<DegradedModeDecision> {
    let snapshot = state.monitor.snapshot();
    Json(state.guard.evaluate(&snapshot))
}

pub async fn get_reconciler_status(State(state): State<AppState>) -> Json<ReconcilerStatus> {
    Json(state.reconciler.status().await)
}

/// Admit a disruption against a freshly polled snapshot.
pub async fn request_disruption(
    State(state): State<AppState>,
    Json(kind): Json<DisruptionKind>,
) -> Result<(StatusCode, Json<DisruptionResponse>)> {
    info!(kind = kind.label(), "Received disruption request");

    let snapshot = state.monitor.refresh_once().await;
    let permit = admission::fail_closed(state.guard.try_acquire(&snapshot, kind))?;
    let decision = state.guard.evaluate(&snapshot);

    let kind = permit.kind().label().to_string();
    let counted = permit.is_counted();
    let permit_id = permit.detach();

    Ok((
        StatusCode::CREATED,
        Json(DisruptionResponse {
            permit_id,
            kind,
            counted,
            granted_at: Utc::now(),
            decision,
        }),
    ))
}

pub async fn release_disruption(
    State(state): State<AppState>,
    Path(permit_id): Path<String>,
) -> Result<StatusCode> {
    let id = Uuid::parse_str(&permit_id)
        .map_err(|_| AppError::ValidationError(format!("invalid permit id '{}'", permit_id)))?;
    state.guard.release(id)?;
    Ok(StatusCode::NO_CONTENT)
}
