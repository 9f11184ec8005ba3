//! HTTP request handlers.

use super::AppState;
use crate::db::{DbError, MonitoredTarget, ProbeKind, StatusPageConfigPatch, MIN_INTERVAL_SECONDS};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn db_error_response(context: &str, e: DbError) -> Response {
    match e {
        DbError::NotFound => error_response(StatusCode::NOT_FOUND, "Endpoint not found"),
        e => {
            tracing::error!("{}: {}", context, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, context)
        }
    }
}

// ============================================================================
// Status
// ============================================================================

pub async fn handle_get_status(State(state): State<AppState>) -> Response {
    match state.status.status() {
        Ok(view) => Json(view.as_ref()).into_response(),
        Err(e) => {
            tracing::error!("Error fetching status data: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch status data")
        }
    }
}

pub async fn handle_monitor_init(State(state): State<AppState>) -> Response {
    match state.scheduler.sync_all().await {
        Ok(count) => Json(json!({
            "message": "Monitoring initialized",
            "activeTargets": count,
            "activeTimers": state.scheduler.active_timers().await,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!("Error initializing monitoring: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to initialize monitoring")
        }
    }
}

// ============================================================================
// API: Targets
// ============================================================================

pub async fn handle_get_targets(State(state): State<AppState>) -> Response {
    match state.store.get_targets() {
        Ok(targets) => Json(targets).into_response(),
        Err(e) => db_error_response("Failed to fetch endpoints", e),
    }
}

pub async fn handle_get_target(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.get_target(id) {
        Ok(target) => Json(target).into_response(),
        Err(e) => db_error_response("Failed to fetch endpoint", e),
    }
}

/// Body of create and update requests. Every field is optional so the same
/// shape serves partial updates.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<ProbeKind>,
    pub port: Option<u16>,
    pub server_ip: Option<String>,
    pub whitelist_enabled: Option<bool>,
    pub modpack_url: Option<String>,
    pub interval_seconds: Option<u32>,
    pub expected_status_code: Option<u16>,
    pub is_active: Option<bool>,
    pub sort_order: Option<i64>,
}

impl TargetRequest {
    fn apply(self, target: &mut MonitoredTarget) {
        if let Some(v) = self.title {
            target.title = v;
        }
        if let Some(v) = self.description {
            target.description = Some(v);
        }
        if let Some(v) = self.url {
            target.address = v;
        }
        if let Some(v) = self.kind {
            target.kind = v;
        }
        if let Some(v) = self.port {
            target.port = Some(v);
        }
        if let Some(v) = self.server_ip {
            target.server_ip = Some(v);
        }
        if let Some(v) = self.whitelist_enabled {
            target.whitelist_enabled = v;
        }
        if let Some(v) = self.modpack_url {
            target.modpack_url = Some(v);
        }
        if let Some(v) = self.interval_seconds {
            target.interval_seconds = v;
        }
        if let Some(v) = self.expected_status_code {
            target.expected_status_code = v;
        }
        if let Some(v) = self.is_active {
            target.is_active = v;
        }
        if let Some(v) = self.sort_order {
            target.sort_order = v;
        }
    }
}

fn validate_target(target: &MonitoredTarget) -> Result<(), String> {
    if target.title.trim().is_empty() || target.address.trim().is_empty() {
        return Err("Title and URL are required".to_string());
    }
    if target.interval_seconds < MIN_INTERVAL_SECONDS {
        return Err(format!("Interval must be at least {} seconds", MIN_INTERVAL_SECONDS));
    }
    if !(100..=599).contains(&target.expected_status_code) {
        return Err("Expected status code must be between 100 and 599".to_string());
    }
    Ok(())
}

pub async fn handle_create_target(State(state): State<AppState>, Json(req): Json<TargetRequest>) -> Response {
    let mut target = MonitoredTarget {
        created_at: Utc::now(),
        ..Default::default()
    };
    req.apply(&mut target);

    if let Err(msg) = validate_target(&target) {
        return error_response(StatusCode::BAD_REQUEST, msg);
    }

    if let Err(e) = state.store.add_target(&mut target) {
        return db_error_response("Failed to create endpoint", e);
    }

    if target.is_active {
        state
            .scheduler
            .start_monitoring(target.id, target.interval_seconds)
            .await;
    }

    (StatusCode::CREATED, Json(target)).into_response()
}

pub async fn handle_update_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<TargetRequest>,
) -> Response {
    let mut target = match state.store.get_target(id) {
        Ok(t) => t,
        Err(e) => return db_error_response("Failed to update endpoint", e),
    };
    req.apply(&mut target);

    if let Err(msg) = validate_target(&target) {
        return error_response(StatusCode::BAD_REQUEST, msg);
    }

    if let Err(e) = state.store.update_target(&target) {
        return db_error_response("Failed to update endpoint", e);
    }

    if target.is_active {
        state.scheduler.start_monitoring(id, target.interval_seconds).await;
    } else {
        state.scheduler.stop_monitoring(id).await;
    }

    match state.store.get_target(id) {
        Ok(updated) => Json(updated).into_response(),
        Err(e) => db_error_response("Failed to update endpoint", e),
    }
}

pub async fn handle_delete_target(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    if let Err(e) = state.store.delete_target(id) {
        return db_error_response("Failed to delete endpoint", e);
    }

    state.scheduler.stop_monitoring(id).await;

    Json(json!({ "success": true })).into_response()
}

// ============================================================================
// API: Status page configuration
// ============================================================================

pub async fn handle_get_config(State(state): State<AppState>) -> Response {
    match state.store.get_status_config() {
        Ok(config) => Json(config).into_response(),
        Err(e) => db_error_response("Failed to fetch config", e),
    }
}

pub async fn handle_update_config(
    State(state): State<AppState>,
    Json(patch): Json<StatusPageConfigPatch>,
) -> Response {
    match state.store.update_status_config(patch) {
        Ok(config) => Json(config).into_response(),
        Err(e) => db_error_response("Failed to update config", e),
    }
}
