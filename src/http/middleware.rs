//! Axum middleware enforcing one named limiter policy.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::ratelimit::{NamedLimiter, RateLimitHeaders, RateLimitResult};

/// Reject callers over quota with 429, otherwise run the handler.
///
/// Both outcomes carry the rate limit headers. Install with
/// `axum::middleware::from_fn_with_state(limiter, rate_limit_middleware)`.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<NamedLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let key = limiter.key_for(request.headers());
    let result = limiter.limiter.check(&key);

    if !result.allowed {
        warn!(
            limiter = %limiter.name,
            key = %key,
            path = %request.uri().path(),
            "Rejecting request over rate limit"
        );
        return too_many_requests(&result);
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &result.headers);
    response
}

/// A 429 response with a JSON error body and the decision's headers.
pub fn too_many_requests(result: &RateLimitResult) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": "Too many requests, please try again later" })),
    )
        .into_response();
    apply_rate_limit_headers(response.headers_mut(), &result.headers);
    response
}

/// Copy rate limit headers onto an outgoing header map.
pub fn apply_rate_limit_headers(target: &mut HeaderMap, headers: &RateLimitHeaders) {
    for (name, value) in headers.iter() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            target.insert(name, value);
        }
    }
}
