//! Entropy engine endpoints.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::{responses, AppState};

/// Most recent entropy snapshot (computed on demand when none is cached).
#[utoipa::path(
    get,
    path = "/v1/entropy/status",
    tag = "Entropy",
    responses((status = 200, description = "Latest entropy snapshot", body = serde_json::Value))
)]
pub async fn entropy_status(State(state): State<AppState>) -> impl IntoResponse {
    let worker = state.clone();
    let result = tokio::task::spawn_blocking(move || worker.entropy().status()).await;
    match result {
        Ok(Ok(snapshot)) => Json(snapshot).into_response(),
        Ok(Err(err)) => {
            responses::internal_error(state.settings().expose_internal_error_details, &err)
        }
        Err(err) => responses::internal_error(
            state.settings().expose_internal_error_details,
            &anyhow::anyhow!(err),
        ),
    }
}

/// Evaluate one tick: sample signals, advance the state machine, persist
/// the snapshot to the entropy ledger.
#[utoipa::path(
    post,
    path = "/v1/entropy/tick",
    tag = "Entropy",
    responses((status = 200, description = "Evaluated entropy snapshot", body = serde_json::Value))
)]
pub async fn entropy_tick(State(state): State<AppState>) -> impl IntoResponse {
    let worker = state.clone();
    let result = tokio::task::spawn_blocking(move || worker.entropy().evaluate(true)).await;
    match result {
        Ok(Ok(snapshot)) => Json(snapshot).into_response(),
        Ok(Err(err)) => {
            responses::internal_error(state.settings().expose_internal_error_details, &err)
        }
        Err(err) => responses::internal_error(
            state.settings().expose_internal_error_details,
            &anyhow::anyhow!(err),
        ),
    }
}
