//! Self-evolution pipeline endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use archillx_evolution::{dashboard, EvolutionError, EvolutionService, GuardMode};

use crate::{responses, AppState};

const LIST_KINDS: [&str; 7] = [
    "inspections",
    "plans",
    "proposals",
    "guards",
    "baselines",
    "actions",
    "schedules",
];

fn evolution_disabled(state: &AppState) -> Option<Response> {
    if state.settings().enable_evolution {
        None
    } else {
        Some(responses::service_unavailable(
            "EVOLUTION_DISABLED",
            "the evolution module is disabled",
        ))
    }
}

/// Run a blocking pipeline operation off the async executor and translate
/// errors onto the wire contract.
async fn run_blocking<T, F>(state: &AppState, op: F) -> Response
where
    T: serde::Serialize + Send + 'static,
    F: FnOnce(Arc<EvolutionService>) -> Result<T, EvolutionError> + Send + 'static,
{
    let expose = state.settings().expose_internal_error_details;
    let service = state.evolution();
    match tokio::task::spawn_blocking(move || op(service)).await {
        Ok(Ok(value)) => Json(value).into_response(),
        Ok(Err(err)) => responses::evolution_error(expose, err),
        Err(err) => responses::internal_error(expose, &anyhow::anyhow!(err)),
    }
}

/// Run a self-inspection and persist the report.
#[utoipa::path(
    post,
    path = "/v1/evolution/report/run",
    tag = "Evolution",
    responses((status = 200, description = "Inspection report", body = serde_json::Value))
)]
pub async fn report_run(State(state): State<AppState>) -> Response {
    if let Some(response) = evolution_disabled(&state) {
        return response;
    }
    run_blocking(&state, |service| {
        service.run_inspection().map_err(EvolutionError::Other)
    })
    .await
}

/// Build a plan from the latest (or a fresh) inspection.
#[utoipa::path(
    post,
    path = "/v1/evolution/plan/run",
    tag = "Evolution",
    responses((status = 200, description = "Evolution plan", body = serde_json::Value))
)]
pub async fn plan_run(State(state): State<AppState>) -> Response {
    if let Some(response) = evolution_disabled(&state) {
        return response;
    }
    run_blocking(&state, |service| {
        service.build_plan(None).map_err(EvolutionError::Other)
    })
    .await
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateBody {
    pub item_index: Option<usize>,
}

/// Generate a proposal (with rendered patch artifacts) from a plan item.
#[utoipa::path(
    post,
    path = "/v1/evolution/proposals/generate",
    tag = "Evolution",
    responses((status = 200, description = "Generated proposal", body = serde_json::Value))
)]
pub async fn proposals_generate(
    State(state): State<AppState>,
    body: Option<Json<GenerateBody>>,
) -> Response {
    if let Some(response) = evolution_disabled(&state) {
        return response;
    }
    let item_index = body.and_then(|b| b.item_index).unwrap_or(0);
    run_blocking(&state, move |service| {
        service
            .generate_proposal(None, item_index)
            .map_err(EvolutionError::Other)
    })
    .await
}

#[derive(Debug, Default, Deserialize)]
pub struct GuardBody {
    pub mode: Option<String>,
}

/// Run the upgrade guard against one proposal.
#[utoipa::path(
    post,
    path = "/v1/evolution/proposals/{id}/guard/run",
    tag = "Evolution",
    params(("id" = String, Path, description = "Proposal id")),
    responses(
        (status = 200, description = "Guard run", body = serde_json::Value),
        (status = 404, description = "Unknown proposal", body = serde_json::Value)
    )
)]
pub async fn guard_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<GuardBody>>,
) -> Response {
    if let Some(response) = evolution_disabled(&state) {
        return response;
    }
    let mode = match body.and_then(|b| b.mode.clone()).as_deref() {
        Some("full") => GuardMode::Full,
        _ => GuardMode::Quick,
    };
    run_blocking(&state, move |service| service.run_guard(Some(&id), mode)).await
}

/// Compare signals before/after relative to the proposal's inspection.
#[utoipa::path(
    post,
    path = "/v1/evolution/proposals/{id}/baseline/run",
    tag = "Evolution",
    params(("id" = String, Path, description = "Proposal id")),
    responses(
        (status = 200, description = "Baseline compare", body = serde_json::Value),
        (status = 404, description = "Unknown proposal", body = serde_json::Value)
    )
)]
pub async fn baseline_run(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if let Some(response) = evolution_disabled(&state) {
        return response;
    }
    run_blocking(&state, move |service| service.run_baseline(Some(&id))).await
}

#[derive(Debug, Default, Deserialize)]
pub struct ActionBody {
    pub actor: Option<String>,
    pub reason: Option<String>,
}

async fn transition(
    state: AppState,
    id: String,
    verb: &'static str,
    body: Option<Json<ActionBody>>,
) -> Response {
    if let Some(response) = evolution_disabled(&state) {
        return response;
    }
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let actor = body.actor.unwrap_or_else(|| "operator".to_string());
    let reason = body.reason;
    run_blocking(&state, move |service| {
        let result = match verb {
            "approve" => service.approve(&id, &actor, reason.as_deref()),
            "reject" => service.reject(&id, &actor, reason.as_deref()),
            "apply" => service.apply(&id, &actor, reason.as_deref()),
            _ => service.rollback(&id, &actor, reason.as_deref()),
        };
        result.map(|(proposal, action)| json!({"proposal": proposal, "action": action}))
    })
    .await
}

/// Approve a proposal.
#[utoipa::path(
    post,
    path = "/v1/evolution/proposals/{id}/approve",
    tag = "Evolution",
    params(("id" = String, Path, description = "Proposal id")),
    responses(
        (status = 200, description = "Approved", body = serde_json::Value),
        (status = 400, description = "Invalid transition", body = serde_json::Value)
    )
)]
pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ActionBody>>,
) -> Response {
    transition(state, id, "approve", body).await
}

/// Reject a proposal.
#[utoipa::path(
    post,
    path = "/v1/evolution/proposals/{id}/reject",
    tag = "Evolution",
    params(("id" = String, Path, description = "Proposal id")),
    responses(
        (status = 200, description = "Rejected", body = serde_json::Value),
        (status = 400, description = "Invalid transition", body = serde_json::Value)
    )
)]
pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ActionBody>>,
) -> Response {
    transition(state, id, "reject", body).await
}

/// Apply a proposal.
#[utoipa::path(
    post,
    path = "/v1/evolution/proposals/{id}/apply",
    tag = "Evolution",
    params(("id" = String, Path, description = "Proposal id")),
    responses(
        (status = 200, description = "Applied", body = serde_json::Value),
        (status = 400, description = "Invalid transition", body = serde_json::Value)
    )
)]
pub async fn apply(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ActionBody>>,
) -> Response {
    transition(state, id, "apply", body).await
}

/// Roll an applied proposal back.
#[utoipa::path(
    post,
    path = "/v1/evolution/proposals/{id}/rollback",
    tag = "Evolution",
    params(("id" = String, Path, description = "Proposal id")),
    responses(
        (status = 200, description = "Rolled back", body = serde_json::Value),
        (status = 400, description = "Invalid transition", body = serde_json::Value)
    )
)]
pub async fn rollback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ActionBody>>,
) -> Response {
    transition(state, id, "rollback", body).await
}

#[derive(Debug, Default, Deserialize)]
pub struct ScheduleBody {
    pub limit: Option<usize>,
}

/// Run one auto-scheduler cycle immediately.
#[utoipa::path(
    post,
    path = "/v1/evolution/schedule/run",
    tag = "Evolution",
    responses((status = 200, description = "Schedule cycle", body = serde_json::Value))
)]
pub async fn schedule_run(
    State(state): State<AppState>,
    body: Option<Json<ScheduleBody>>,
) -> Response {
    if let Some(response) = evolution_disabled(&state) {
        return response;
    }
    let expose = state.settings().expose_internal_error_details;
    let scheduler = state.scheduler();
    let limit = body.and_then(|b| b.limit);
    match tokio::task::spawn_blocking(move || scheduler.run_cycle(limit)).await {
        Ok(Ok(cycle)) => Json(cycle).into_response(),
        Ok(Err(err)) => responses::internal_error(expose, &err),
        Err(err) => responses::internal_error(expose, &anyhow::anyhow!(err)),
    }
}

/// Scheduler flags, next fire time, and the last cycle summary.
#[utoipa::path(
    get,
    path = "/v1/evolution/schedule/status",
    tag = "Evolution",
    responses((status = 200, description = "Scheduler status", body = serde_json::Value))
)]
pub async fn schedule_status(State(state): State<AppState>) -> Response {
    Json(state.scheduler().status()).into_response()
}

/// Latest proposal/action plus evidence counts.
#[utoipa::path(
    get,
    path = "/v1/evolution/status",
    tag = "Evolution",
    responses((status = 200, description = "Pipeline status", body = serde_json::Value))
)]
pub async fn status(State(state): State<AppState>) -> Response {
    run_blocking(&state, |service| {
        service.status_summary().map_err(EvolutionError::Other)
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

/// Newest-first evidence listing for one kind.
#[utoipa::path(
    get,
    path = "/v1/evolution/{kind}",
    tag = "Evolution",
    params(
        ("kind" = String, Path, description = "Evidence kind"),
        ("limit" = Option<usize>, Query, description = "Max records")
    ),
    responses(
        (status = 200, description = "Evidence records", body = serde_json::Value),
        (status = 404, description = "Unknown kind", body = serde_json::Value)
    )
)]
pub async fn list(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<ListQuery>,
) -> Response {
    if !LIST_KINDS.contains(&kind.as_str()) {
        return responses::not_found("UNKNOWN_EVIDENCE_KIND", "no such evidence kind");
    }
    let limit = query.limit.unwrap_or(20).min(200);
    run_blocking(&state, move |service| {
        service.list(&kind, limit).map_err(EvolutionError::Other)
    })
    .await
}

/// Export a dashboard document summarizing the latest evidence.
#[utoipa::path(
    post,
    path = "/v1/evolution/dashboard/export",
    tag = "Evolution",
    responses((status = 200, description = "Dashboard", body = serde_json::Value))
)]
pub async fn dashboard_export(State(state): State<AppState>) -> Response {
    if let Some(response) = evolution_disabled(&state) {
        return response;
    }
    run_blocking(&state, |service| {
        dashboard::export_dashboard(service.evidence()).map_err(EvolutionError::Other)
    })
    .await
}
