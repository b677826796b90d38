//! Admission results and their client-facing headers.

use serde::Serialize;

/// Quota configured for the window.
pub const LIMIT_HEADER: &str = "X-RateLimit-Limit";
/// Requests left in the window.
pub const REMAINING_HEADER: &str = "X-RateLimit-Remaining";
/// Window close, in epoch seconds.
pub const RESET_HEADER: &str = "X-RateLimit-Reset";
/// Seconds until the window closes; only sent on rejection.
pub const RETRY_AFTER_HEADER: &str = "Retry-After";

/// Stringified rate limit headers for one admission decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitHeaders {
    #[serde(rename = "X-RateLimit-Limit")]
    pub limit: String,
    #[serde(rename = "X-RateLimit-Remaining")]
    pub remaining: String,
    #[serde(rename = "X-RateLimit-Reset")]
    pub reset: String,
    #[serde(rename = "Retry-After", skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<String>,
}

impl RateLimitHeaders {
    /// Build the header set for a decision made at `now`.
    pub fn new(limit: u64, remaining: u64, reset_at: u64, now: u64, allowed: bool) -> Self {
        let retry_after = if allowed {
            None
        } else {
            Some(reset_at.saturating_sub(now).div_ceil(1000).to_string())
        };

        Self {
            limit: limit.to_string(),
            remaining: remaining.to_string(),
            reset: reset_at.div_ceil(1000).to_string(),
            retry_after,
        }
    }

    /// Look up a header value by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// Iterate `(name, value)` pairs in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            (LIMIT_HEADER, Some(self.limit.as_str())),
            (REMAINING_HEADER, Some(self.remaining.as_str())),
            (RESET_HEADER, Some(self.reset.as_str())),
            (RETRY_AFTER_HEADER, self.retry_after.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
    }
}

/// Outcome of a single `check` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    /// Whether the request fits in the quota
    pub allowed: bool,
    /// Requests left in the window, clamped at zero
    pub remaining: u64,
    /// Window close in epoch milliseconds
    pub reset_at: u64,
    /// Presentation headers for the response
    pub headers: RateLimitHeaders,
}
