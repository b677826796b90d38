//! Quota policy and per-key window state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, TurnstileError};

/// Quota policy for one limiter instance.
///
/// Only constructible through validation, so every limiter has a positive
/// quota and window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawLimiterConfig")]
pub struct LimiterConfig {
    /// Requests admitted per window
    max_requests: u64,
    /// Window length in milliseconds
    window_ms: u64,
}

/// Unchecked wire form of `LimiterConfig`.
#[derive(Deserialize)]
struct RawLimiterConfig {
    max_requests: u64,
    window_ms: u64,
}

impl TryFrom<RawLimiterConfig> for LimiterConfig {
    type Error = TurnstileError;

    fn try_from(raw: RawLimiterConfig) -> Result<Self> {
        LimiterConfig::new(raw.max_requests, raw.window_ms)
    }
}

impl LimiterConfig {
    /// Create a validated policy.
    pub fn new(max_requests: u64, window_ms: u64) -> Result<Self> {
        let config = Self {
            max_requests,
            window_ms,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject policies that would always deny or reset on every call.
    fn validate(&self) -> Result<()> {
        if self.max_requests == 0 {
            return Err(TurnstileError::InvalidConfig(
                "max_requests must be greater than zero".to_string(),
            ));
        }
        if self.window_ms == 0 {
            return Err(TurnstileError::InvalidConfig(
                "window_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Requests admitted per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// The window length as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Usage of one key within its active fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowEntry {
    /// Requests observed in this window, rejected ones included. Not clamped.
    pub count: u64,
    /// Epoch milliseconds at which the window closes.
    pub reset_at: u64,
}

impl WindowEntry {
    /// Open a fresh, empty window starting at `now`.
    pub fn open(now: u64, window_ms: u64) -> Self {
        Self {
            count: 0,
            reset_at: now.saturating_add(window_ms),
        }
    }

    /// Whether the window has closed.
    pub fn is_expired(&self, now: u64) -> bool {
        self.reset_at <= now
    }
}
