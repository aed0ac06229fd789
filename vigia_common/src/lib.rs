//! Vigia Common - Shared vocabulary for the abuse-protection layer
//!
//! This crate contains the request classification types, throttle decisions,
//! identity normalization and monitor snapshot used by both the server and CLI.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Identity errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Identity has no name, national id or phone after normalization")]
    Empty,
}

/// Device class derived from the user agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Mobile,
    Desktop,
    Unknown,
}

impl DeviceClass {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Mobile => "mobile",
            DeviceClass::Desktop => "desktop",
            DeviceClass::Unknown => "unknown",
        }
    }
}

/// Where the visitor came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdSource {
    InstagramAds,
    FacebookAds,
    GoogleAds,
    TiktokAds,
    /// Ad traffic whose network could not be pinned down
    SocialAds,
    Organic,
}

impl AdSource {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            AdSource::InstagramAds => "instagram_ads",
            AdSource::FacebookAds => "facebook_ads",
            AdSource::GoogleAds => "google_ads",
            AdSource::TiktokAds => "tiktok_ads",
            AdSource::SocialAds => "social_ads",
            AdSource::Organic => "organic",
        }
    }

    pub fn is_ad(&self) -> bool {
        !matches!(self, AdSource::Organic)
    }
}

/// Signals derived from a request, attached to the request context for
/// downstream render logic.
///
/// Absent signals always read as the conservative default: organic,
/// non-mobile, non-bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Network origin the request is attributed to
    pub origin: String,

    pub device_class: DeviceClass,

    /// User agent matched a known scraper/crawler signature
    pub is_bot: bool,

    /// Forwarding-chain headers indicate an intermediary
    pub is_proxy: bool,

    pub ad_source: AdSource,

    /// Host part of the referrer, when it parsed
    pub referrer_host: Option<String>,

    /// Tracking parameters in original query order
    pub utm_params: Vec<(String, String)>,

    /// Unix time the classification was computed
    pub computed_at_unix: u64,

    /// How long the classification stays cached
    pub ttl_secs: u64,
}

impl Classification {
    /// Default classification used when nothing could be derived
    pub fn unknown(origin: impl Into<String>, computed_at_unix: u64, ttl_secs: u64) -> Self {
        Self {
            origin: origin.into(),
            device_class: DeviceClass::Unknown,
            is_bot: false,
            is_proxy: false,
            ad_source: AdSource::Organic,
            referrer_host: None,
            utm_params: Vec::new(),
            computed_at_unix,
            ttl_secs,
        }
    }

    pub fn is_mobile(&self) -> bool {
        self.device_class == DeviceClass::Mobile
    }

    pub fn is_from_ad(&self) -> bool {
        self.ad_source.is_ad()
    }

    /// Look up a tracking parameter by name
    pub fn utm(&self, key: &str) -> Option<&str> {
        self.utm_params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Outcome of a transaction throttle check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThrottleDecision {
    Allowed,
    IdentityLimitExceeded,
    OriginLimitExceeded,
    AttackDetected,
    Banned,
}

impl ThrottleDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ThrottleDecision::Allowed)
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ThrottleDecision::Allowed => "ALLOWED",
            ThrottleDecision::IdentityLimitExceeded => "IDENTITY_LIMIT_EXCEEDED",
            ThrottleDecision::OriginLimitExceeded => "ORIGIN_LIMIT_EXCEEDED",
            ThrottleDecision::AttackDetected => "ATTACK_DETECTED",
            ThrottleDecision::Banned => "BANNED",
        }
    }
}

/// Purchase attempt submitted by the checkout form
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionSubmission {
    #[serde(default)]
    pub name: String,

    /// National id (CPF); punctuation is ignored
    #[serde(default, alias = "cpf")]
    pub national_id: String,

    #[serde(default)]
    pub phone: String,
}

impl TransactionSubmission {
    pub fn identity_key(&self) -> Result<IdentityKey, IdentityError> {
        IdentityKey::from_parts(&self.name, &self.national_id, &self.phone)
    }
}

/// Deterministic key correlating attempts from the same real-world submitter
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Derive the key from raw form fields
    pub fn from_parts(name: &str, national_id: &str, phone: &str) -> Result<Self, IdentityError> {
        let name = normalize_name(name);
        let national_id = digits_only(national_id);
        let phone = normalize_phone(phone);

        if name.is_empty() && national_id.is_empty() && phone.is_empty() {
            return Err(IdentityError::Empty);
        }

        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update(b"|");
        hasher.update(national_id.as_bytes());
        hasher.update(b"|");
        hasher.update(phone.as_bytes());
        Ok(Self(hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix safe to show in logs and the monitor
    pub fn masked(&self) -> String {
        let prefix: String = self.0.chars().take(8).collect();
        format!("{}…", prefix)
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.masked())
    }
}

/// Lowercase, strip punctuation and collapse whitespace
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn digits_only(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Digits only, with the Brazilian country code removed
pub fn normalize_phone(phone: &str) -> String {
    let digits = digits_only(phone);
    match digits.strip_prefix(constants::PHONE_COUNTRY_CODE) {
        Some(rest) if rest.len() >= 10 && digits.len() > 11 => rest.to_string(),
        _ => digits,
    }
}

/// Active ban as reported by the monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanEntry {
    pub origin: String,
    pub expires_in_secs: u64,
}

/// Attempt activity for one identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityActivity {
    /// Masked identity key
    pub identity: String,
    pub attempts: usize,
    pub distinct_origins: usize,
}

/// Rejections per rule since startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RejectionTotals {
    pub identity_limit: u64,
    pub origin_limit: u64,
    pub attack: u64,
    pub banned: u64,
}

/// Point-in-time view of the abuse-protection state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub generated_at_unix: u64,
    pub bans: Vec<BanEntry>,
    pub tracked_identities: usize,
    pub tracked_pairs: usize,
    pub rate_limited_origins: usize,
    pub cached_classifications: usize,
    pub top_identities: Vec<IdentityActivity>,
    /// Identities at 75% or more of the identity limit
    pub near_limit_identities: usize,
    /// Identities one origin short of the attack threshold
    pub multi_origin_identities: usize,
    pub rejections: RejectionTotals,
}

impl MonitorSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Constants shared by the server and CLI
pub mod constants {
    /// Default query parameter carrying the offer secret
    pub const DEFAULT_SECRET_PARAM: &str = "k";

    /// Default verification cookie name
    pub const DEFAULT_COOKIE_NAME: &str = "vigia_offer";

    /// Default verification cookie lifetime (30 days)
    pub const DEFAULT_COOKIE_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;

    /// Admin monitor endpoint
    pub const MONITOR_PATH: &str = "/api/admin/monitor";

    /// Transaction submission endpoint
    pub const TRANSACTIONS_PATH: &str = "/api/transactions";

    /// Country code stripped from phone numbers
    pub const PHONE_COUNTRY_CODE: &str = "55";

    /// Tracking parameters copied into the classification
    pub const TRACKING_PARAMS: &[&str] = &[
        "utm_source",
        "utm_medium",
        "utm_campaign",
        "utm_content",
        "utm_term",
        "fbclid",
        "gclid",
        "ttclid",
        "src",
        "sck",
        "xcod",
    ];

    /// Path prefixes that skip classification and the offer guard
    pub const BYPASS_PREFIXES: &[&str] = &[
        "/api",
        "/webhook",
        "/static",
        "/fonts",
        "/js",
        "/assets",
        "/css",
        "/images",
        "/img",
        "/favicon.ico",
        "/manifest.json",
        "/service-worker.js",
        "/robots.txt",
    ];

    /// Headers that reveal a forwarding chain
    pub const PROXY_HEADERS: &[&str] = &[
        "x-forwarded-for",
        "via",
        "client-ip",
        "x-real-ip",
        "forwarded",
    ];

    /// Rate limit response headers
    pub const RATE_LIMIT_LIMIT_HEADER: &str = "X-RateLimit-Limit";
    pub const RATE_LIMIT_REMAINING_HEADER: &str = "X-RateLimit-Remaining";
    pub const RATE_LIMIT_RESET_HEADER: &str = "X-RateLimit-Reset";
}
