//! Telemetry and audit read endpoints.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::{responses, AppState};

/// Full telemetry view: flat snapshot, nested aggregate, windowed history.
#[utoipa::path(
    get,
    path = "/v1/telemetry",
    tag = "Telemetry",
    responses((status = 200, description = "Telemetry snapshot", body = serde_json::Value))
)]
pub async fn telemetry(State(state): State<AppState>) -> impl IntoResponse {
    let telemetry = state.telemetry();
    Json(json!({
        "snapshot": telemetry.snapshot(),
        "aggregate": telemetry.aggregated_snapshot(),
        "history": telemetry.history_snapshot(),
    }))
}

/// Prometheus text exposition.
#[utoipa::path(
    get,
    path = "/v1/metrics",
    tag = "Telemetry",
    responses(
        (status = 200, description = "Prometheus exposition", body = String),
        (status = 404, description = "Metrics disabled", body = serde_json::Value)
    )
)]
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    if !state.settings().enable_metrics {
        return responses::not_found("METRICS_DISABLED", "metrics exposition is disabled");
    }
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.telemetry().as_prometheus(),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

/// Newest audit records from the active ledger.
#[utoipa::path(
    get,
    path = "/v1/audit",
    tag = "Audit",
    responses((status = 200, description = "Recent audit records", body = serde_json::Value))
)]
pub async fn audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(50).min(1000);
    match state.audit().load_jsonl_records(Some(limit)) {
        Ok(mut records) => {
            records.reverse(); // newest first on the wire
            Json(json!({"items": records, "limit": limit})).into_response()
        }
        Err(err) => {
            responses::internal_error(state.settings().expose_internal_error_details, &err)
        }
    }
}

/// Decision/action rollup over the newest audit records.
#[utoipa::path(
    get,
    path = "/v1/audit/summary",
    tag = "Audit",
    responses((status = 200, description = "Audit summary", body = serde_json::Value))
)]
pub async fn audit_summary(State(state): State<AppState>) -> impl IntoResponse {
    let worker = state.clone();
    match tokio::task::spawn_blocking(move || worker.collector().audit_summary()).await {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => responses::internal_error(
            state.settings().expose_internal_error_details,
            &anyhow::anyhow!(err),
        ),
    }
}

/// Active ledger plus archive inventory, for offline export.
#[utoipa::path(
    get,
    path = "/v1/audit/export",
    tag = "Audit",
    responses((status = 200, description = "Audit export", body = serde_json::Value))
)]
pub async fn audit_export(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.audit();
    let records = match store.load_jsonl_records(None) {
        Ok(records) => records,
        Err(err) => {
            return responses::internal_error(state.settings().expose_internal_error_details, &err)
        }
    };
    match store.archive_snapshot() {
        Ok(archive) => Json(json!({"records": records, "archive": archive})).into_response(),
        Err(err) => {
            responses::internal_error(state.settings().expose_internal_error_details, &err)
        }
    }
}
