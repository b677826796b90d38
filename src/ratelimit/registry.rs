//! Named limiter instances shared across request handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use super::clock::{Clock, SystemClock};
use super::headers::RateLimitResult;
use super::key::{client_ip, user_key, HeaderSource};
use super::limiter::RateLimiter;
use crate::config::{KeyStrategy, LimiterPolicy, TurnstileConfig};
use crate::error::{Result, TurnstileError};

/// Header carrying the authenticated user id for `user` policies.
pub const USER_ID_HEADER: &str = "x-user-id";

/// A limiter registered under a policy name.
#[derive(Debug)]
pub struct NamedLimiter {
    /// Policy name
    pub name: String,
    /// How callers are keyed
    pub strategy: KeyStrategy,
    /// The limiter instance
    pub limiter: Arc<RateLimiter>,
}

impl NamedLimiter {
    /// Derive this policy's key for a request.
    pub fn key_for<H: HeaderSource + ?Sized>(&self, headers: &H) -> String {
        match self.strategy {
            KeyStrategy::Ip => client_ip(headers),
            KeyStrategy::User => match headers.header(USER_ID_HEADER).map(str::trim) {
                Some(id) if !id.is_empty() => user_key(id),
                _ => client_ip(headers),
            },
        }
    }

    /// Count a request from these headers against the policy.
    pub fn check_request<H: HeaderSource + ?Sized>(&self, headers: &H) -> RateLimitResult {
        self.limiter.check(&self.key_for(headers))
    }
}

/// The set of independent limiters a process owns.
///
/// Built once at startup and passed to handlers. Keys never collide across
/// policies: each name owns its own store. Policy names are case-insensitive.
#[derive(Debug, Default)]
pub struct LimiterRegistry {
    limiters: BTreeMap<String, Arc<NamedLimiter>>,
}

impl LimiterRegistry {
    /// Build every configured policy on the system clock.
    pub fn from_config(config: &TurnstileConfig) -> Result<Self> {
        Self::from_config_with_clock(config, Arc::new(SystemClock))
    }

    /// Build every configured policy on a shared clock.
    pub fn from_config_with_clock(config: &TurnstileConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut registry = Self::default();
        for (name, policy) in &config.limiters {
            registry.register(name, policy, config, Arc::clone(&clock))?;
        }
        Ok(registry)
    }

    fn register(
        &mut self,
        name: &str,
        policy: &LimiterPolicy,
        config: &TurnstileConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<()> {
        let limiter_config = policy.limiter_config().map_err(|e| {
            TurnstileError::InvalidConfig(format!("limiter '{}': {}", name, e))
        })?;
        let name = name.to_ascii_lowercase();
        if self.limiters.contains_key(&name) {
            return Err(TurnstileError::InvalidConfig(format!(
                "limiter '{}' is defined more than once",
                name
            )));
        }
        let limiter = RateLimiter::with_clock(limiter_config, clock)
            .with_sweep_interval(config.sweep_interval());

        info!(
            limiter = %name,
            max_requests = policy.max_requests,
            window_ms = policy.window_ms,
            key = ?policy.key,
            "Registered rate limiter"
        );

        self.limiters.insert(
            name.clone(),
            Arc::new(NamedLimiter {
                name,
                strategy: policy.key,
                limiter: Arc::new(limiter),
            }),
        );
        Ok(())
    }

    /// Look up a limiter by policy name.
    pub fn get(&self, name: &str) -> Option<Arc<NamedLimiter>> {
        self.limiters.get(&name.to_ascii_lowercase()).cloned()
    }

    /// Look up a limiter, failing if it is not registered.
    pub fn require(&self, name: &str) -> Result<Arc<NamedLimiter>> {
        self.get(name)
            .ok_or_else(|| TurnstileError::UnknownLimiter(name.to_string()))
    }

    /// Registered policy names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.limiters.keys().cloned().collect()
    }

    /// Check `key` against the named policy.
    pub fn check(&self, name: &str, key: &str) -> Option<RateLimitResult> {
        self.get(name).map(|named| named.limiter.check(key))
    }
}
