//! Liveness, readiness, and migration-state endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::{responses, AppState};

/// Process liveness.
#[utoipa::path(
    get,
    path = "/healthz",
    tag = "System",
    responses((status = 200, description = "Service is alive", body = serde_json::Value))
)]
pub async fn healthz() -> impl IntoResponse {
    Json(json!({"ok": true}))
}

/// Readiness rollup over db, evidence tree, and migration state. Degraded
/// readiness answers 503 so external supervisors can score it.
#[utoipa::path(
    get,
    path = "/v1/ready",
    tag = "System",
    responses(
        (status = 200, description = "Ready", body = serde_json::Value),
        (status = 503, description = "Degraded", body = serde_json::Value)
    )
)]
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let worker = state.clone();
    match tokio::task::spawn_blocking(move || worker.collector().collect_readiness()).await {
        Ok(readiness) => {
            let ready = readiness.get("status").and_then(|s| s.as_str()) == Some("ready");
            let status = if ready {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (status, Json(readiness)).into_response()
        }
        Err(err) => responses::internal_error(
            state.settings().expose_internal_error_details,
            &anyhow::anyhow!(err),
        ),
    }
}

/// Schema revision vs. required head.
#[utoipa::path(
    get,
    path = "/v1/migration/state",
    tag = "System",
    responses((status = 200, description = "Migration state", body = serde_json::Value))
)]
pub async fn migration_state(State(state): State<AppState>) -> impl IntoResponse {
    let worker = state.clone();
    match tokio::task::spawn_blocking(move || worker.collector().migration_state()).await {
        Ok(migration) => Json(serde_json::to_value(migration).unwrap_or(json!({}))).into_response(),
        Err(err) => responses::internal_error(
            state.settings().expose_internal_error_details,
            &anyhow::anyhow!(err),
        ),
    }
}
