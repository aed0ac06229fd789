//! Server configuration loaded from environment variables

use std::env;
use std::str::FromStr;
use std::time::Duration;
use vigia_common::constants;

use crate::abuse::{
    ClassifierConfig, LinkGuardConfig, ProtectedRoute, RateLimitConfig, ThrottleConfig,
};

/// Longest accepted window, lifetime or ban: ten years
const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,

    /// Public port for HTTP traffic
    pub port: u16,

    /// Development mode: no proxy detection, no bot redirects, open link guard
    pub developing: bool,

    /// Take the client origin from the first X-Forwarded-For hop
    pub trust_proxy_headers: bool,

    /// Where bots are redirected
    pub bot_redirect_url: String,

    /// Also redirect desktop visitors that did not come from an ad
    pub block_desktop_organic: bool,

    pub rate_limit_window_secs: u64,
    pub rate_limit_max_requests: u32,

    pub classifier_cache_ttl_secs: u64,
    pub classifier_cache_capacity: usize,

    /// Expected offer secret (empty denies protected routes in production)
    pub offer_secret: String,

    /// Query parameter carrying the offer secret
    pub offer_secret_param: String,

    /// Key for signing verification cookies (defaults to the offer secret)
    pub link_cookie_key: String,

    pub link_fallback_url: String,
    pub link_cookie_name: String,
    pub link_cookie_max_age_secs: u64,

    /// Raw `PROTECTED_ROUTES` value
    pub protected_routes: String,

    pub identity_window_secs: u64,
    pub identity_max_attempts: usize,
    pub origin_max_attempts: usize,
    pub attack_span_secs: u64,
    pub attack_origin_threshold: usize,
    pub ban_duration_secs: u64,

    pub sweep_interval_secs: u64,

    /// Bearer token for the admin monitor (empty disables it)
    pub admin_token: String,

    /// Number of instances the operator expects to run
    pub instance_count_hint: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());
        let offer_secret = var("OFFER_SECRET", "");

        let config = Self {
            host: var("HOST", "0.0.0.0"),
            port: var("PORT", "8080")
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
            developing: parse_flag(&lookup, "DEVELOPING")?,
            trust_proxy_headers: parse_flag(&lookup, "TRUST_PROXY_HEADERS")?,
            bot_redirect_url: var("BOT_REDIRECT_URL", "https://g1.globo.com"),
            block_desktop_organic: parse_flag(&lookup, "BLOCK_DESKTOP_ORGANIC")?,
            rate_limit_window_secs: parse(&lookup, "RATE_LIMIT_WINDOW_SECS", 60)?,
            rate_limit_max_requests: parse(&lookup, "RATE_LIMIT_MAX_REQUESTS", 100)?,
            classifier_cache_ttl_secs: parse(&lookup, "CLASSIFIER_CACHE_TTL_SECS", 15 * 60)?,
            classifier_cache_capacity: parse(&lookup, "CLASSIFIER_CACHE_CAPACITY", 50_000)?,
            link_cookie_key: lookup("LINK_COOKIE_KEY")
                .filter(|key| !key.is_empty())
                .unwrap_or_else(|| offer_secret.clone()),
            offer_secret,
            offer_secret_param: var("OFFER_SECRET_PARAM", constants::DEFAULT_SECRET_PARAM),
            link_fallback_url: var("LINK_FALLBACK_URL", "https://www.google.com"),
            link_cookie_name: var("LINK_COOKIE_NAME", constants::DEFAULT_COOKIE_NAME),
            link_cookie_max_age_secs: parse(
                &lookup,
                "LINK_COOKIE_MAX_AGE_SECS",
                constants::DEFAULT_COOKIE_MAX_AGE_SECS,
            )?,
            protected_routes: var("PROTECTED_ROUTES", ""),
            identity_window_secs: parse(&lookup, "IDENTITY_WINDOW_SECS", 24 * 60 * 60)?,
            identity_max_attempts: parse(&lookup, "IDENTITY_MAX_ATTEMPTS", 20)?,
            origin_max_attempts: parse(&lookup, "ORIGIN_MAX_ATTEMPTS", 5)?,
            attack_span_secs: parse(&lookup, "ATTACK_SPAN_SECS", 60 * 60)?,
            attack_origin_threshold: parse(&lookup, "ATTACK_ORIGIN_THRESHOLD", 3)?,
            ban_duration_secs: parse(&lookup, "BAN_DURATION_SECS", 60 * 60)?,
            sweep_interval_secs: parse(&lookup, "SWEEP_INTERVAL_SECS", 5 * 60)?,
            admin_token: var("ADMIN_TOKEN", ""),
            instance_count_hint: parse(&lookup, "INSTANCE_COUNT_HINT", 1)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the abuse stores cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("RATE_LIMIT_WINDOW_SECS", self.rate_limit_window_secs),
            ("RATE_LIMIT_MAX_REQUESTS", u64::from(self.rate_limit_max_requests)),
            ("CLASSIFIER_CACHE_TTL_SECS", self.classifier_cache_ttl_secs),
            ("LINK_COOKIE_MAX_AGE_SECS", self.link_cookie_max_age_secs),
            ("IDENTITY_WINDOW_SECS", self.identity_window_secs),
            ("IDENTITY_MAX_ATTEMPTS", self.identity_max_attempts as u64),
            ("ORIGIN_MAX_ATTEMPTS", self.origin_max_attempts as u64),
            ("ATTACK_SPAN_SECS", self.attack_span_secs),
            ("BAN_DURATION_SECS", self.ban_duration_secs),
            ("SWEEP_INTERVAL_SECS", self.sweep_interval_secs),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(*name, "must be greater than zero".to_string()));
        }

        let durations = [
            ("RATE_LIMIT_WINDOW_SECS", self.rate_limit_window_secs),
            ("CLASSIFIER_CACHE_TTL_SECS", self.classifier_cache_ttl_secs),
            ("LINK_COOKIE_MAX_AGE_SECS", self.link_cookie_max_age_secs),
            ("IDENTITY_WINDOW_SECS", self.identity_window_secs),
            ("ATTACK_SPAN_SECS", self.attack_span_secs),
            ("BAN_DURATION_SECS", self.ban_duration_secs),
            ("SWEEP_INTERVAL_SECS", self.sweep_interval_secs),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, secs)| *secs > MAX_DURATION_SECS) {
            return Err(too_long(*name));
        }

        if self.attack_origin_threshold < 2 {
            return Err(ConfigError::Invalid(
                "ATTACK_ORIGIN_THRESHOLD",
                "must be at least 2".to_string(),
            ));
        }

        if self.offer_secret_param.is_empty() {
            return Err(ConfigError::Invalid(
                "OFFER_SECRET_PARAM",
                "must not be empty".to_string(),
            ));
        }

        check_redirect_url("BOT_REDIRECT_URL", &self.bot_redirect_url)?;
        check_redirect_url("LINK_FALLBACK_URL", &self.link_fallback_url)?;
        for route in self.protected_routes()? {
            check_redirect_url("PROTECTED_ROUTES", &route.fallback_url)?;
            if route.cookie_max_age.as_secs() > MAX_DURATION_SECS {
                return Err(too_long("PROTECTED_ROUTES"));
            }
        }

        Ok(())
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig::new(self.rate_limit_max_requests, self.rate_limit_window_secs)
    }

    pub fn classifier(&self) -> ClassifierConfig {
        ClassifierConfig {
            developing: self.developing,
            cache_ttl: Duration::from_secs(self.classifier_cache_ttl_secs),
            cache_capacity: self.classifier_cache_capacity,
            rate_limit: self.rate_limit(),
            bot_redirect_url: self.bot_redirect_url.clone(),
            block_desktop_organic: self.block_desktop_organic,
        }
    }

    pub fn link_guard(&self) -> LinkGuardConfig {
        LinkGuardConfig {
            developing: self.developing,
            secret: self.offer_secret.clone(),
            secret_param: self.offer_secret_param.clone(),
            signing_key: self.link_cookie_key.as_bytes().to_vec(),
        }
    }

    pub fn throttle(&self) -> ThrottleConfig {
        ThrottleConfig {
            identity_window: Duration::from_secs(self.identity_window_secs),
            identity_max: self.identity_max_attempts,
            origin_max: self.origin_max_attempts,
            attack_span: Duration::from_secs(self.attack_span_secs),
            attack_threshold: self.attack_origin_threshold,
            ban_duration: Duration::from_secs(self.ban_duration_secs),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Parse `PROTECTED_ROUTES`: `path[|fallback_url[|cookie_name[|max_age_secs]]]`, comma separated
    pub fn protected_routes(&self) -> Result<Vec<ProtectedRoute>, ConfigError> {
        self.protected_routes
            .split(',')
            .map(str::trim)
            .filter(|spec| !spec.is_empty())
            .map(|spec| self.parse_route(spec))
            .collect()
    }

    fn parse_route(&self, spec: &str) -> Result<ProtectedRoute, ConfigError> {
        let invalid = |reason: &str| {
            ConfigError::Invalid("PROTECTED_ROUTES", format!("{}: {}", spec, reason))
        };
        let mut parts = spec.split('|').map(str::trim);

        let path = parts.next().unwrap_or_default();
        if !path.starts_with('/') {
            return Err(invalid("path must start with '/'"));
        }

        let field = |value: Option<&str>, default: &str| {
            value
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .to_string()
        };
        let fallback_url = field(parts.next(), &self.link_fallback_url);
        let cookie_name = field(parts.next(), &self.link_cookie_name);
        let max_age = match parts.next().filter(|v| !v.is_empty()) {
            Some(value) => value
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| invalid("max age must be a positive number of seconds"))?,
            None => self.link_cookie_max_age_secs,
        };
        if parts.next().is_some() {
            return Err(invalid("too many fields"));
        }

        Ok(ProtectedRoute {
            fallback_url,
            cookie_name,
            cookie_max_age: Duration::from_secs(max_age),
            ..ProtectedRoute::new(path)
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, format!("cannot parse {:?}", raw))),
        None => Ok(default),
    }
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<bool, ConfigError> {
    match lookup(name).map(|raw| raw.trim().to_lowercase()) {
        None => Ok(false),
        Some(value) => match value.as_str() {
            "" | "0" | "false" | "no" | "off" => Ok(false),
            "1" | "true" | "yes" | "on" => Ok(true),
            _ => Err(ConfigError::Invalid(name, format!("expected a boolean, got {:?}", value))),
        },
    }
}

fn too_long(name: &'static str) -> ConfigError {
    ConfigError::Invalid(name, format!("must be at most {} seconds", MAX_DURATION_SECS))
}

fn check_redirect_url(name: &'static str, value: &str) -> Result<(), ConfigError> {
    match url::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(ConfigError::Invalid(name, format!("{:?} is not an http(s) URL", value))),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
