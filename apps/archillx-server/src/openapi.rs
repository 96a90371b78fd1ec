//! Aggregated OpenAPI document for the control-plane surface.

use axum::response::IntoResponse;
use axum::Json;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "ArcHillx Control Plane",
        description = "Evidence-driven self-governance engine"
    ),
    paths(
        crate::api_system::healthz,
        crate::api_system::ready,
        crate::api_system::migration_state,
        crate::api_entropy::entropy_status,
        crate::api_entropy::entropy_tick,
        crate::api_telemetry::telemetry,
        crate::api_telemetry::metrics,
        crate::api_telemetry::audit,
        crate::api_telemetry::audit_summary,
        crate::api_telemetry::audit_export,
        crate::api_evolution::report_run,
        crate::api_evolution::plan_run,
        crate::api_evolution::proposals_generate,
        crate::api_evolution::guard_run,
        crate::api_evolution::baseline_run,
        crate::api_evolution::approve,
        crate::api_evolution::reject,
        crate::api_evolution::apply,
        crate::api_evolution::rollback,
        crate::api_evolution::schedule_run,
        crate::api_evolution::schedule_status,
        crate::api_evolution::status,
        crate::api_evolution::list,
        crate::api_evolution::dashboard_export,
    )
)]
pub struct ApiDoc;

pub async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
