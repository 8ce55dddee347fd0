//! The HTTP boundary.
//!
//! One route does the work: `POST /v1/verify`. Everything else is a probe
//! (`GET /healthz`), a 405 or a 404. Responses are always JSON with
//! `Cache-Control: no-store`, verdicts are not cacheable. Each request gets
//! a generated request id that is echoed in the body and tagged on exactly
//! one completion log event.

use crate::error::Error;
use crate::verifier::{VerificationService, VerifyOutcome, VerifyPayload};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

/// State shared by the handlers.
#[derive(Clone)]
pub struct AppState {
    service: Arc<VerificationService>,
}

/// Build the application router.
pub fn router(service: Arc<VerificationService>) -> Router {
    Router::new()
        .route(
            "/v1/verify",
            post(verify_handler).fallback(method_not_allowed),
        )
        .route("/healthz", get(healthz_handler))
        .fallback(not_found)
        .with_state(AppState { service })
}

/// Serve the router on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve(
    listener: tokio::net::TcpListener,
    service: Arc<VerificationService>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> crate::Result<()> {
    let app = router(service);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn verify_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let started = Instant::now();

    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let result = verify_impl(&state, &request_id, &body, authorization).await;
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok((payload, outcome)) => {
            info!(
                request_id = %request_id,
                actor_id = %outcome.actor,
                submission_id = ?payload.submission_id,
                league_id = ?outcome.league_id,
                elapsed_ms,
                verified = outcome.evaluation.verified,
                tolerance_used = outcome.evaluation.tolerance,
                difference = ?outcome.evaluation.difference,
                source = "gemini",
                "verification.complete"
            );
            json_response(StatusCode::OK, success_body(&request_id, &outcome))
        }
        Err(e) => {
            let (status, code, message) = map_error(&e);
            error!(
                request_id = %request_id,
                status = status.as_u16(),
                error = code,
                elapsed_ms,
                "verification.failed: {message}"
            );
            json_response(status, error_body(&e, code, &message))
        }
    }
}

async fn verify_impl(
    state: &AppState,
    request_id: &str,
    body: &[u8],
    authorization: Option<&str>,
) -> Result<(VerifyPayload, VerifyOutcome), Error> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|_| Error::InvalidPayload("request body must be valid JSON".to_string()))?;
    let payload = VerifyPayload::parse(&value)?;
    let outcome = state
        .service
        .verify(request_id, &payload, authorization)
        .await?;
    Ok((payload, outcome))
}

async fn healthz_handler() -> Response {
    json_response(
        StatusCode::OK,
        json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
        }),
    )
}

async fn method_not_allowed() -> Response {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        json!({"error": "method_not_allowed"}),
    )
}

async fn not_found() -> Response {
    json_response(StatusCode::NOT_FOUND, json!({"error": "not_found"}))
}

fn success_body(request_id: &str, outcome: &VerifyOutcome) -> Value {
    json!({
        "request_id": request_id,
        "verified": outcome.evaluation.verified,
        "tolerance_used": outcome.evaluation.tolerance,
        "difference": outcome.evaluation.difference,
        "extracted_steps": outcome.extraction.steps,
        "extracted_km": outcome.extraction.km,
        "extracted_calories": outcome.extraction.calories,
        "extracted_date": outcome.extraction.date,
        "notes": outcome.evaluation.notes,
        "persisted": outcome.persisted,
    })
}

/// Map the closed error taxonomy onto response statuses and stable codes.
/// Matched exhaustively so a new variant cannot ship without a mapping.
fn map_error(error: &Error) -> (StatusCode, &'static str, String) {
    match error {
        Error::InvalidPayload(m) => (StatusCode::BAD_REQUEST, "invalid_payload", m.clone()),
        Error::Unauthenticated(m) => (StatusCode::UNAUTHORIZED, "unauthenticated", m.clone()),
        Error::RateLimited { retry_after_secs } => (
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            format!("retry after {retry_after_secs}s"),
        ),
        Error::ProofUnavailable(m) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "proof_unavailable", m.clone())
        }
        Error::ExtractionFailed(m) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "extraction_failed", m.clone())
        }
        Error::ExtractionTimeout { elapsed_ms } => (
            StatusCode::GATEWAY_TIMEOUT,
            "extraction_timeout",
            format!("verification timed out after {elapsed_ms}ms"),
        ),
        Error::SubmissionNotFound(m) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "submission_not_found",
            m.clone(),
        ),
        Error::PersistenceFailed(m) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "persistence_failed",
            m.clone(),
        ),
        Error::Storage(m) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", m.clone()),
        Error::Config(_) | Error::Io(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal error".to_string(),
        ),
    }
}

fn error_body(error: &Error, code: &str, message: &str) -> Value {
    match error {
        Error::RateLimited { retry_after_secs } => {
            json!({"error": code, "retry_after": retry_after_secs})
        }
        _ => json!({"error": code, "message": message}),
    }
}

fn json_response(status: StatusCode, body: Value) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
