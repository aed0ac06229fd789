//! Request rate limiting per origin
//!
//! Sliding-window log: each origin keeps the instants of its admitted
//! requests inside the trailing window, so the count never resets on a fixed
//! boundary and never exceeds the configured maximum for any window position.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use vigia_common::constants;

use super::clock::within;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests admitted in the window
    pub max_requests: u32,
    /// Time window duration
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        limits::page_requests()
    }
}

/// Pre-configured rate limits
pub mod limits {
    use super::*;

    /// Page requests: 100 per minute per origin
    pub fn page_requests() -> RateLimitConfig {
        RateLimitConfig::new(100, 60)
    }
}

/// Result of a rate limit check
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Admissions currently inside the window
    pub current: u32,
    /// Maximum allowed in the window
    pub limit: u32,
    /// Time until the next slot frees up (zero when allowed)
    pub retry_after: Duration,
    /// Remaining admissions in this window
    pub remaining: u32,
}

impl RateLimitResult {
    /// Whole seconds until a retry can succeed, rounded up
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs.saturating_add(1)
        } else {
            secs
        }
    }

    /// Create headers for rate limit response
    pub fn headers(&self) -> Vec<(String, String)> {
        vec![
            (constants::RATE_LIMIT_LIMIT_HEADER.to_string(), self.limit.to_string()),
            (constants::RATE_LIMIT_REMAINING_HEADER.to_string(), self.remaining.to_string()),
            (constants::RATE_LIMIT_RESET_HEADER.to_string(), self.retry_after_secs().to_string()),
        ]
    }
}

/// In-memory sliding-window rate limiter
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Check and record an admission for `key`
    pub fn check(&self, key: &str, now: Instant) -> RateLimitResult {
        let mut entry = self.windows.entry(key.to_string()).or_default();
        let log = entry.value_mut();
        self.prune(log, now);

        let limit = self.config.max_requests;
        let current = log.len() as u32;

        if current < limit {
            log.push_back(now);
            RateLimitResult {
                allowed: true,
                current: current + 1,
                limit,
                retry_after: Duration::ZERO,
                remaining: limit - current - 1,
            }
        } else {
            RateLimitResult {
                allowed: false,
                current,
                limit,
                retry_after: self.retry_after(log, now),
                remaining: 0,
            }
        }
    }

    /// Drop logs whose newest admission left the window, one key at a time
    pub fn cleanup(&self, now: Instant) -> usize {
        self.stale_keys(now)
            .iter()
            .filter(|key| self.purge(key, now))
            .count()
    }

    /// Origins with no admission inside the window
    pub fn stale_keys(&self, now: Instant) -> Vec<String> {
        self.windows
            .iter()
            .filter(|entry| self.is_stale(entry.value(), now))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Remove one origin's log if it is still stale
    pub fn purge(&self, key: &str, now: Instant) -> bool {
        self.windows
            .remove_if(key, |_, log| self.is_stale(log, now))
            .is_some()
    }

    /// Number of origins with a live log
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    fn prune(&self, log: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = log.front() {
            if within(now, *oldest, self.config.window) {
                break;
            }
            log.pop_front();
        }
    }

    fn retry_after(&self, log: &VecDeque<Instant>, now: Instant) -> Duration {
        log.front()
            .map(|oldest| match oldest.checked_add(self.config.window) {
                Some(reset) => reset.saturating_duration_since(now),
                None => Duration::MAX,
            })
            .unwrap_or(Duration::ZERO)
    }

    fn is_stale(&self, log: &VecDeque<Instant>, now: Instant) -> bool {
        log.back()
            .map(|newest| !within(now, *newest, self.config.window))
            .unwrap_or(true)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
