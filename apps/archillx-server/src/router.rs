//! Route table for the control-plane surface.

use axum::routing::{get, post};
use axum::Router;

use crate::{api_entropy, api_evolution, api_system, api_telemetry, openapi, AppState};

pub(crate) fn build() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(api_system::healthz))
        .route("/v1/ready", get(api_system::ready))
        .route("/v1/migration/state", get(api_system::migration_state))
        .route("/v1/entropy/status", get(api_entropy::entropy_status))
        .route("/v1/entropy/tick", post(api_entropy::entropy_tick))
        .route("/v1/telemetry", get(api_telemetry::telemetry))
        .route("/v1/metrics", get(api_telemetry::metrics))
        .route("/v1/audit", get(api_telemetry::audit))
        .route("/v1/audit/summary", get(api_telemetry::audit_summary))
        .route("/v1/audit/export", get(api_telemetry::audit_export))
        .route("/v1/evolution/report/run", post(api_evolution::report_run))
        .route("/v1/evolution/plan/run", post(api_evolution::plan_run))
        .route(
            "/v1/evolution/proposals/generate",
            post(api_evolution::proposals_generate),
        )
        .route(
            "/v1/evolution/proposals/{id}/guard/run",
            post(api_evolution::guard_run),
        )
        .route(
            "/v1/evolution/proposals/{id}/baseline/run",
            post(api_evolution::baseline_run),
        )
        .route(
            "/v1/evolution/proposals/{id}/approve",
            post(api_evolution::approve),
        )
        .route(
            "/v1/evolution/proposals/{id}/reject",
            post(api_evolution::reject),
        )
        .route(
            "/v1/evolution/proposals/{id}/apply",
            post(api_evolution::apply),
        )
        .route(
            "/v1/evolution/proposals/{id}/rollback",
            post(api_evolution::rollback),
        )
        .route("/v1/evolution/schedule/run", post(api_evolution::schedule_run))
        .route(
            "/v1/evolution/schedule/status",
            get(api_evolution::schedule_status),
        )
        .route("/v1/evolution/status", get(api_evolution::status))
        .route(
            "/v1/evolution/dashboard/export",
            post(api_evolution::dashboard_export),
        )
        .route("/v1/evolution/{kind}", get(api_evolution::list))
        .route("/spec/openapi.json", get(openapi::openapi_json))
}
