//! HTTP middleware: request-context propagation, telemetry counters, and
//! the boundary rate limiter.

use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use archillx_audit::{with_request_context, RequestContext};

use crate::rate_limit::{DEFAULT_BUCKET, HIGH_RISK_BUCKET};
use crate::{responses, AppState};

fn header_value(req: &Request<axum::body::Body>, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Install the task-local request context for the rest of the pipeline;
/// audit records written on this task pick it up automatically.
pub async fn propagate_request_context(req: Request<axum::body::Body>, next: Next) -> Response {
    let ctx = RequestContext {
        request_id: header_value(&req, "x-request-id")
            .or_else(|| Some(uuid::Uuid::new_v4().to_string())),
        session_id: header_value(&req, "x-session-id"),
        task_id: header_value(&req, "x-task-id"),
    };
    with_request_context(ctx, next.run(req)).await
}

/// Count requests and status buckets, and time every request.
pub async fn track_http(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if !state.settings().enable_telemetry {
        return next.run(req).await;
    }
    let telemetry = state.telemetry();
    let started = Instant::now();
    telemetry.incr("http_requests_total");
    let response = next.run(req).await;
    telemetry.incr(&format!("http_status_{}", response.status().as_u16()));
    telemetry.timing("http_request", started.elapsed().as_secs_f64());
    response
}

/// Boundary rate limiter: mutating evolution calls ride the high-risk
/// bucket, everything else the default one.
pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let settings = state.settings();
    if !settings.enable_rate_limit {
        return next.run(req).await;
    }
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let high_risk = req.method() == axum::http::Method::POST && path.starts_with("/v1/evolution");
    let (bucket, limit) = if high_risk {
        (HIGH_RISK_BUCKET, settings.high_risk_rate_limit_per_min)
    } else {
        (DEFAULT_BUCKET, settings.rate_limit_per_min)
    };
    let key = header_value(&req, "x-forwarded-for")
        .map(|chain| chain.split(',').next().unwrap_or("").trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| {
            req.extensions()
                .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
                .map(|c| c.0.ip().to_string())
        })
        .unwrap_or_else(|| "anonymous".to_string());

    let check = state
        .rate_limiter()
        .check(&key, bucket, limit, Duration::from_secs(60));
    if !check.allowed {
        state.telemetry().incr("rate_limited_total");
        return responses::api_error(
            axum::http::StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "rate limit exceeded",
            serde_json::json!({
                "bucket": bucket,
                "limit": check.limit,
                "reset_after_s": check.reset_after_s,
            }),
        );
    }
    next.run(req).await
}
