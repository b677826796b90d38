//! Rate limit check service.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use super::middleware::{apply_rate_limit_headers, rate_limit_middleware};
use crate::ratelimit::LimiterRegistry;

/// Policy guarding the sample route, when configured.
pub const GUARDED_POLICY: &str = "api";

/// Shared state for the HTTP handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The process-wide limiters
    pub registry: Arc<LimiterRegistry>,
}

impl AppState {
    /// Create state around a registry built at startup.
    pub fn new(registry: Arc<LimiterRegistry>) -> Self {
        Self { registry }
    }
}

/// Body of `POST /v1/check`.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckRequest {
    /// Policy name
    pub limiter: String,
    /// Caller key; derived from request headers when absent
    #[serde(default)]
    pub key: Option<String>,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(health))
        .route("/v1/check", post(check));

    if let Some(limiter) = state.registry.get(GUARDED_POLICY) {
        let guarded = Router::new()
            .route("/v1/limited/ping", get(ping))
            .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
        router = router.merge(guarded);
    }

    router.with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "limiters": state.registry.names(),
    }))
}

async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "pong": true }))
}

/// Count one request against a policy and report the decision.
///
/// Responds 200 when admitted and 429 when not, with the decision as the
/// body and the rate limit headers attached.
#[instrument(skip_all, fields(limiter = %request.limiter))]
async fn check(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CheckRequest>,
) -> Response {
    if request.limiter.is_empty() {
        warn!("Received check request with empty limiter name");
        return error_response(StatusCode::BAD_REQUEST, "limiter is required".to_string());
    }

    let Some(named) = state.registry.get(&request.limiter) else {
        warn!(limiter = %request.limiter, "Received check request for unknown limiter");
        return error_response(
            StatusCode::NOT_FOUND,
            format!("unknown limiter: {}", request.limiter),
        );
    };

    let key = match request.key {
        Some(key) => key,
        None => named.key_for(&headers),
    };
    let result = named.limiter.check(&key);

    debug!(
        key = %key,
        allowed = result.allowed,
        remaining = result.remaining,
        "Rate limit decision made"
    );

    let status = if result.allowed {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };
    let rate_headers = result.headers.clone();
    let mut response = (status, Json(result)).into_response();
    apply_rate_limit_headers(response.headers_mut(), &rate_headers);
    response
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
