//! HTTP server: Alertmanager webhook, health and attempt inspection.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::alert;
use crate::orchestrator::Orchestrator;
use crate::registry::Admission;

/// Largest accepted webhook body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the HTTP router.
pub fn build_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/alerts", post(alerts_handler))
        .route("/api/alerts", post(alerts_handler))
        .route("/api/attempts", get(attempts_handler))
        .route("/api/attempts/{fingerprint}", get(attempt_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

/// Response for the webhook handler.
#[derive(Debug, Default, Serialize)]
struct AlertResponse {
    status: &'static str,
    alerts_received: usize,
    accepted: Vec<String>,
    duplicate: Vec<String>,
    suppressed: Vec<String>,
    resolved: Vec<String>,
}

/// Health check endpoint.
async fn health_handler(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "alert-bridge",
        "version": env!("CARGO_PKG_VERSION"),
        "active_attempts": orchestrator.registry().active_count(),
    }))
}

/// Alertmanager webhook handler.
///
/// Parses the whole payload before admitting anything: a malformed alert
/// rejects the request and no attempt is created.
async fn alerts_handler(State(orchestrator): State<Arc<Orchestrator>>, body: Bytes) -> Response {
    let alerts = match alert::parse_payload(&body, Utc::now()) {
        Ok(alerts) => alerts,
        Err(e) => {
            warn!(error = %e, "Rejecting alert payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": "error", "error": e.to_string()})),
            )
                .into_response();
        }
    };

    let mut response = AlertResponse {
        status: "ok",
        alerts_received: alerts.len(),
        ..AlertResponse::default()
    };
    info!(alerts = alerts.len(), "Received alert webhook");

    for alert in alerts {
        let submission = orchestrator.submit(alert);
        let bucket = match submission.admission {
            Admission::Admitted => &mut response.accepted,
            Admission::Duplicate(_) => &mut response.duplicate,
            Admission::CoolingDown(_) => &mut response.suppressed,
            Admission::Resolved(_) => &mut response.resolved,
        };
        bucket.push(submission.fingerprint);
    }

    (StatusCode::OK, Json(response)).into_response()
}

/// List every attempt in the registry.
async fn attempts_handler(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    let attempts = orchestrator.registry().snapshot();
    Json(json!({
        "count": attempts.len(),
        "attempts": attempts,
    }))
}

/// Show one attempt.
async fn attempt_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(fingerprint): Path<String>,
) -> Response {
    match orchestrator.registry().get(&fingerprint) {
        Some(attempt) => Json(attempt).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"status": "error", "error": format!("no attempt for fingerprint {fingerprint}")})),
        )
            .into_response(),
    }
}
