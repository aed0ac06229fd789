//! Request classification and per-origin admission
//!
//! Classification is derived from header and query signals and cached per
//! (origin, user-agent) for the configured ttl. Admission runs the sliding
//! window rate limiter and is independent of classification.

use dashmap::DashMap;
use http::HeaderMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vigia_common::{constants, Classification, DeviceClass};

use super::clock::{within, Clock, SharedClock};
use super::rate_limit::{RateLimitConfig, RateLimitResult, RateLimiter};
use super::signatures;

/// Classifier configuration
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Development mode: no proxy detection, no bot redirects
    pub developing: bool,
    pub cache_ttl: Duration,
    /// Entries beyond this are computed but not cached
    pub cache_capacity: usize,
    pub rate_limit: RateLimitConfig,
    /// Neutral external page bots are sent to
    pub bot_redirect_url: String,
    /// Also redirect desktop visitors that did not come from an ad
    pub block_desktop_organic: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            developing: false,
            cache_ttl: Duration::from_secs(15 * 60),
            cache_capacity: 50_000,
            rate_limit: RateLimitConfig::default(),
            bot_redirect_url: "https://g1.globo.com".to_string(),
            block_desktop_organic: false,
        }
    }
}

/// Request metadata the classifier looks at
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub origin: String,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    /// Decoded query parameters in original order
    pub query: Vec<(String, String)>,
    /// Non-empty proxy headers by lowercase name
    pub proxy_headers: Vec<(&'static str, String)>,
}

impl RequestMeta {
    /// Build from raw request parts; unreadable values are treated as absent
    pub fn from_parts(origin: &str, headers: &HeaderMap, raw_query: Option<&str>) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let query = raw_query
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();

        let proxy_headers = constants::PROXY_HEADERS
            .iter()
            .filter_map(|name| header(*name).map(|value| (*name, value)))
            .collect();

        Self {
            origin: origin.to_string(),
            user_agent: header("user-agent"),
            referrer: header("referer"),
            query,
            proxy_headers,
        }
    }

    /// Host part of the referrer, lowercased
    pub fn referrer_host(&self) -> Option<String> {
        self.referrer
            .as_deref()
            .and_then(|r| url::Url::parse(r).ok())
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
    }
}

/// What the middleware should do with a classified request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Redirect(String),
}

/// Cache key: (origin, user-agent)
pub type CacheKey = (String, String);

struct CachedClassification {
    classification: Arc<Classification>,
    computed_at: Instant,
}

/// Cached request classifier with per-origin rate limiting
pub struct RequestClassifier {
    config: ClassifierConfig,
    clock: SharedClock,
    cache: DashMap<CacheKey, CachedClassification>,
    limiter: RateLimiter,
}

impl RequestClassifier {
    pub fn new(config: ClassifierConfig, clock: SharedClock) -> Self {
        let limiter = RateLimiter::new(config.rate_limit.clone());
        Self {
            config,
            clock,
            cache: DashMap::new(),
            limiter,
        }
    }

    /// Record a request from `origin` against the rate window
    pub fn admit(&self, origin: &str) -> RateLimitResult {
        let result = self.limiter.check(origin, self.clock.now());
        if !result.allowed {
            tracing::warn!(
                "Rate limit exceeded for {}: {}/{} in window, retry in {}s",
                origin,
                result.current,
                result.limit,
                result.retry_after_secs()
            );
        }
        result
    }

    /// Classify a request, reusing the cached result while it is fresh
    pub fn classify(&self, meta: &RequestMeta) -> Arc<Classification> {
        let now = self.clock.now();
        let key = (
            meta.origin.clone(),
            meta.user_agent.clone().unwrap_or_default(),
        );

        if let Some(cached) = self.cache.get(&key) {
            if within(now, cached.computed_at, self.config.cache_ttl) {
                tracing::debug!("Classification cache hit for {}", meta.origin);
                return cached.classification.clone();
            }
        }

        let classification = Arc::new(self.compute(meta));

        if self.cache.len() < self.config.cache_capacity || self.cache.contains_key(&key) {
            self.cache.insert(
                key,
                CachedClassification {
                    classification: classification.clone(),
                    computed_at: now,
                },
            );
        }

        classification
    }

    /// Redirect decision for a classified request
    pub fn verdict(&self, classification: &Classification) -> Verdict {
        if self.config.developing {
            return Verdict::Pass;
        }

        let desktop_organic = self.config.block_desktop_organic
            && classification.device_class == DeviceClass::Desktop
            && !classification.is_from_ad();

        if classification.is_bot || desktop_organic {
            tracing::info!(
                "Redirecting {} (bot: {}, device: {}, source: {})",
                classification.origin,
                classification.is_bot,
                classification.device_class.as_str(),
                classification.ad_source.as_str()
            );
            Verdict::Redirect(self.config.bot_redirect_url.clone())
        } else {
            Verdict::Pass
        }
    }

    /// Drop stale cache entries and idle rate windows. Returns (cache, windows) removed.
    pub fn purge_expired(&self, now: Instant) -> (usize, usize) {
        let cache_removed = self
            .stale_entries(now)
            .iter()
            .filter(|key| self.purge_entry(key, now))
            .count();

        (cache_removed, self.limiter.cleanup(now))
    }

    /// Cache keys past their ttl
    pub fn stale_entries(&self, now: Instant) -> Vec<CacheKey> {
        self.cache
            .iter()
            .filter(|entry| !within(now, entry.computed_at, self.config.cache_ttl))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Remove one cache entry if it is still stale
    pub fn purge_entry(&self, key: &CacheKey, now: Instant) -> bool {
        self.cache
            .remove_if(key, |_, cached| !within(now, cached.computed_at, self.config.cache_ttl))
            .is_some()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn tracked_origins(&self) -> usize {
        self.limiter.tracked()
    }

    fn compute(&self, meta: &RequestMeta) -> Classification {
        let mut classification = Classification::unknown(
            meta.origin.clone(),
            self.clock.unix_now(),
            self.config.cache_ttl.as_secs(),
        );

        if let Some(user_agent) = meta.user_agent.as_deref() {
            classification.device_class = signatures::detect_device(user_agent);
            classification.is_bot = signatures::is_bot_agent(user_agent);
        }

        if !self.config.developing {
            let headers: Vec<(&str, &str)> = meta
                .proxy_headers
                .iter()
                .map(|(name, value)| (*name, value.as_str()))
                .collect();
            classification.is_proxy = signatures::uses_proxy(&headers);
        }

        classification.referrer_host = meta.referrer_host();
        classification.ad_source =
            signatures::detect_ad_source(classification.referrer_host.as_deref(), &meta.query);
        classification.utm_params = meta
            .query
            .iter()
            .filter(|(k, _)| constants::TRACKING_PARAMS.contains(&k.as_str()))
            .cloned()
            .collect();

        classification
    }
}
