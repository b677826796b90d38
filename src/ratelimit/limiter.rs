//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::headers::{RateLimitHeaders, RateLimitResult};
use super::window::{LimiterConfig, WindowEntry};

/// How often expired windows are swept from the store, independent of any
/// limiter's window length.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A per-key fixed-window rate limiter.
///
/// Each key gets its own counter that admits up to `max_requests` calls per
/// window of `window_ms`. Windows are hard cutoffs: a burst at the end of one
/// window followed by a burst at the start of the next is admitted.
///
/// This struct is thread-safe and meant to be built once and shared. Calls
/// for the same key are serialized on the key's map shard, so no increment
/// is ever lost; calls for keys in other shards proceed in parallel.
///
/// Limits are per process. Horizontally scaled instances each keep their
/// own counters.
pub struct RateLimiter {
    /// Quota policy
    config: LimiterConfig,
    /// Window state indexed by caller key
    entries: DashMap<String, WindowEntry>,
    /// Time source
    clock: Arc<dyn Clock>,
    /// Minimum time between sweeps, in milliseconds
    sweep_interval_ms: u64,
    /// Time of the last sweep; held only by the caller doing the sweep
    last_sweep: Mutex<u64>,
}

impl RateLimiter {
    /// Create a rate limiter on the system clock.
    pub fn new(config: LimiterConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a rate limiter on a custom clock.
    pub fn with_clock(config: LimiterConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        Self {
            config,
            entries: DashMap::new(),
            clock,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL.as_millis() as u64,
            last_sweep: Mutex::new(now),
        }
    }

    /// Override how often expired windows are swept.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = interval.as_millis() as u64;
        self
    }

    /// The quota policy of this limiter.
    pub fn config(&self) -> LimiterConfig {
        self.config
    }

    /// Count one request for `key` and decide whether it is admitted.
    ///
    /// Rejected requests still consume a slot. This never fails.
    pub fn check(&self, key: &str) -> RateLimitResult {
        let now = self.clock.now_ms();
        self.maybe_sweep(now);

        let (count, reset_at) = match self.entries.get_mut(key) {
            Some(mut entry) => self.record(entry.value_mut(), now),
            None => {
                let mut entry = self
                    .entries
                    .entry(key.to_string())
                    .or_insert_with(|| WindowEntry::open(now, self.config.window_ms()));
                self.record(entry.value_mut(), now)
            }
        };

        let limit = self.config.max_requests();
        let allowed = count <= limit;
        let remaining = limit.saturating_sub(count);

        trace!(
            key = %key,
            count = count,
            limit = limit,
            reset_at = reset_at,
            "Checked rate limit"
        );

        if !allowed {
            debug!(
                key = %key,
                count = count,
                limit = limit,
                retry_after_ms = reset_at.saturating_sub(now),
                "Rate limit exceeded"
            );
        }

        RateLimitResult {
            allowed,
            remaining,
            reset_at,
            headers: RateLimitHeaders::new(limit, remaining, reset_at, now, allowed),
        }
    }

    /// Roll the window over if it closed, then count the request.
    fn record(&self, entry: &mut WindowEntry, now: u64) -> (u64, u64) {
        if entry.is_expired(now) {
            *entry = WindowEntry::open(now, self.config.window_ms());
        }
        entry.count = entry.count.saturating_add(1);
        (entry.count, entry.reset_at)
    }

    /// Sweep if the interval has elapsed and nobody else is sweeping.
    fn maybe_sweep(&self, now: u64) {
        let Some(mut last) = self.last_sweep.try_lock() else {
            return;
        };
        if now.saturating_sub(*last) < self.sweep_interval_ms {
            return;
        }
        *last = now;
        drop(last);

        let removed = self.remove_expired(now);
        if removed > 0 {
            debug!(removed = removed, remaining = self.entries.len(), "Swept expired windows");
        }
    }

    /// Remove every expired window now, regardless of the sweep interval.
    ///
    /// Returns the number of entries removed. Live windows are never touched.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        *self.last_sweep.lock() = now;
        self.remove_expired(now)
    }

    fn remove_expired(&self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Raw request count for `key` in its live window.
    ///
    /// Unlike `remaining`, this is not clamped and can exceed the quota.
    /// Returns `None` if the key has no live window.
    pub fn count_for(&self, key: &str) -> Option<u64> {
        let now = self.clock.now_ms();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.count)
    }

    /// Number of stored windows, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no windows are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all windows.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("entries", &self.entries.len())
            .field("sweep_interval_ms", &self.sweep_interval_ms)
            .finish()
    }
}
