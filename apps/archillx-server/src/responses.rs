//! Error envelope helpers for the HTTP boundary.
//!
//! Every error body is `{code, message, details}`. Internal error text only
//! leaks when EXPOSE_INTERNAL_ERROR_DETAILS is set.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use archillx_evolution::{EvolutionError, TransitionError};

pub fn api_error(status: StatusCode, code: &str, message: &str, details: Value) -> Response {
    (
        status,
        Json(json!({
            "code": code,
            "message": message,
            "details": details,
        })),
    )
        .into_response()
}

pub fn bad_request(code: &str, message: &str, details: Value) -> Response {
    api_error(StatusCode::BAD_REQUEST, code, message, details)
}

pub fn not_found(code: &str, message: &str) -> Response {
    api_error(StatusCode::NOT_FOUND, code, message, json!({}))
}

pub fn service_unavailable(code: &str, message: &str) -> Response {
    api_error(StatusCode::SERVICE_UNAVAILABLE, code, message, json!({}))
}

pub fn internal_error(expose_details: bool, err: &anyhow::Error) -> Response {
    tracing::error!(%err, "internal server error");
    let message = if expose_details {
        err.to_string()
    } else {
        "internal server error".to_string()
    };
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_SERVER_ERROR",
        &message,
        json!({}),
    )
}

/// Map pipeline errors onto the wire contract: invalid transitions are 400s
/// with code `EVOLUTION_INVALID_TRANSITION`, missing evidence is a 404.
pub fn evolution_error(expose_details: bool, err: EvolutionError) -> Response {
    match err {
        EvolutionError::Transition(TransitionError::InvalidTransition { action, from, to }) => {
            bad_request(
                "EVOLUTION_INVALID_TRANSITION",
                "proposal state does not allow this transition",
                json!({"action": action, "from_status": from, "to_status": to}),
            )
        }
        EvolutionError::EvidenceMissing(what) => {
            not_found("EVIDENCE_MISSING", &format!("no such evidence: {what}"))
        }
        EvolutionError::Other(err) => internal_error(expose_details, &err),
    }
}
