//! Offer link guard
//!
//! Protected routes are only reachable through a link carrying the offer
//! secret. A matching secret is traded for a signed verification cookie and
//! the visitor is redirected to the same URL without the secret; from then on
//! the cookie alone grants access until it expires.
//!
//! [`OfferLinkGuard::decide`] is a pure function of its inputs. Applying the
//! decision to an HTTP response is the caller's job.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use vigia_common::constants;

type HmacSha256 = Hmac<Sha256>;

/// Tolerated clock skew for freshly issued tokens
const ISSUE_SKEW_SECS: u64 = 60;

/// A route that requires the offer link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedRoute {
    /// Path prefix without a trailing `/` (root stays `/`); matches the path
    /// itself and anything below it
    pub path: String,
    pub fallback_url: String,
    pub cookie_name: String,
    pub cookie_max_age: Duration,
}

impl ProtectedRoute {
    /// Route with the default fallback, cookie name and lifetime
    pub fn new(path: impl AsRef<str>) -> Self {
        Self {
            path: normalize_path(path.as_ref()),
            fallback_url: "https://www.google.com".to_string(),
            cookie_name: constants::DEFAULT_COOKIE_NAME.to_string(),
            cookie_max_age: Duration::from_secs(constants::DEFAULT_COOKIE_MAX_AGE_SECS),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        if self.path == "/" {
            return true;
        }
        path == self.path || path.starts_with(&format!("{}/", self.path))
    }
}

/// `/oferta/` and `/oferta` name the same route; the cookie path and the
/// token binding use the trimmed form
fn normalize_path(path: &str) -> String {
    match path.trim_end_matches('/') {
        "" => "/".to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// Guard configuration shared by all protected routes
#[derive(Debug, Clone, Default)]
pub struct LinkGuardConfig {
    pub developing: bool,
    /// Expected secret value; empty denies every request in production
    pub secret: String,
    pub secret_param: String,
    /// Key for signing verification cookies
    pub signing_key: Vec<u8>,
}

/// Cookie the caller must set on a clean redirect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationCookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub max_age: Duration,
}

/// Outcome of the guard for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkDecision {
    Allow,
    /// Secret matched: set the cookie and redirect to the cleaned URL
    RedirectClean {
        location: String,
        cookie: VerificationCookie,
    },
    /// Not verified: send the visitor away
    RedirectFallback { location: String },
}

pub struct OfferLinkGuard {
    config: LinkGuardConfig,
    routes: Vec<ProtectedRoute>,
}

impl OfferLinkGuard {
    pub fn new(config: LinkGuardConfig, routes: Vec<ProtectedRoute>) -> Self {
        Self { config, routes }
    }

    pub fn routes(&self) -> &[ProtectedRoute] {
        &self.routes
    }

    /// Most specific protected route covering `path`
    pub fn route_for(&self, path: &str) -> Option<&ProtectedRoute> {
        self.routes
            .iter()
            .filter(|route| route.matches(path))
            .max_by_key(|route| route.path.len())
    }

    /// Decide what happens to a request for a protected route
    ///
    /// `cookie` is the value of the route's verification cookie, if sent.
    pub fn decide(
        &self,
        route: &ProtectedRoute,
        path: &str,
        raw_query: Option<&str>,
        cookie: Option<&str>,
        now_unix: u64,
    ) -> LinkDecision {
        if self.config.developing {
            return LinkDecision::Allow;
        }

        let fallback = LinkDecision::RedirectFallback {
            location: route.fallback_url.clone(),
        };

        if self.config.secret.is_empty() {
            tracing::warn!("Offer secret not configured, denying access to {}", path);
            return fallback;
        }

        if let Some(token) = cookie {
            if self.verify_token(route, token, now_unix) {
                return LinkDecision::Allow;
            }
        }

        let (kept, matched) = self.split_query(raw_query.unwrap_or(""));
        if !matched {
            tracing::debug!("Offer link missing or wrong secret for {}", path);
            return fallback;
        }

        let location = if kept.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, kept.join("&"))
        };

        let Some(value) = self.issue_token(route, now_unix) else {
            return fallback;
        };

        tracing::info!("Offer link verified for {}", path);
        LinkDecision::RedirectClean {
            location,
            cookie: VerificationCookie {
                name: route.cookie_name.clone(),
                value,
                path: route.path.clone(),
                max_age: route.cookie_max_age,
            },
        }
    }

    /// Signed token `"{issued_at}.{signature}"` bound to the route
    pub fn issue_token(&self, route: &ProtectedRoute, issued_at: u64) -> Option<String> {
        let signature = URL_SAFE_NO_PAD.encode(self.mac(route, issued_at)?.finalize().into_bytes());
        Some(format!("{}.{}", issued_at, signature))
    }

    /// Whether a token was signed for this route and is still unexpired
    pub fn verify_token(&self, route: &ProtectedRoute, token: &str, now_unix: u64) -> bool {
        let Some((issued, signature)) = token.split_once('.') else {
            return false;
        };
        let Ok(issued_at) = issued.parse::<u64>() else {
            return false;
        };
        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };

        if issued_at > now_unix.saturating_add(ISSUE_SKEW_SECS) {
            return false;
        }
        if now_unix >= issued_at.saturating_add(route.cookie_max_age.as_secs()) {
            return false;
        }

        match self.mac(route, issued_at) {
            Some(mac) => mac.verify_slice(&signature).is_ok(),
            None => false,
        }
    }

    fn mac(&self, route: &ProtectedRoute, issued_at: u64) -> Option<HmacSha256> {
        let mut mac = match HmacSha256::new_from_slice(&self.config.signing_key) {
            Ok(m) => m,
            Err(_) => {
                tracing::error!("Invalid verification cookie key");
                return None;
            }
        };
        mac.update(route.path.as_bytes());
        mac.update(b"|");
        mac.update(issued_at.to_string().as_bytes());
        Some(mac)
    }

    /// Raw query segments without the secret parameter, and whether any
    /// occurrence of the secret parameter matched
    fn split_query<'q>(&self, raw_query: &'q str) -> (Vec<&'q str>, bool) {
        let mut kept = Vec::new();
        let mut matched = false;

        for segment in raw_query.split('&').filter(|s| !s.is_empty()) {
            let decoded = url::form_urlencoded::parse(segment.as_bytes()).next();
            match decoded {
                Some((key, value)) if key == self.config.secret_param.as_str() => {
                    if value == self.config.secret.as_str() {
                        matched = true;
                    }
                }
                _ => kept.push(segment),
            }
        }

        (kept, matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000;

    fn guard(developing: bool, secret: &str) -> OfferLinkGuard {
        OfferLinkGuard::new(
            LinkGuardConfig {
                developing,
                secret: secret.to_string(),
                secret_param: "k".to_string(),
                signing_key: b"test-signing-key".to_vec(),
            },
            vec![ProtectedRoute::new("/oferta"), ProtectedRoute::new("/oferta/vip")],
        )
    }

    fn route() -> ProtectedRoute {
        ProtectedRoute::new("/oferta")
    }

    #[test]
    fn test_secret_match_redirects_to_clean_url() {
        let guard = guard(false, "s3cret");
        let decision = guard.decide(
            &route(),
            "/oferta",
            Some("utm_source=FB&k=s3cret&utm_campaign=a%7Cb&fbclid=123"),
            None,
            NOW,
        );

        match decision {
            LinkDecision::RedirectClean { location, cookie } => {
                assert_eq!(location, "/oferta?utm_source=FB&utm_campaign=a%7Cb&fbclid=123");
                assert_eq!(cookie.name, "vigia_offer");
                assert_eq!(cookie.path, "/oferta");
                assert_eq!(cookie.max_age, Duration::from_secs(30 * 24 * 60 * 60));
                assert!(guard.verify_token(&route(), &cookie.value, NOW));
            }
            other => panic!("Expected clean redirect, got {:?}", other),
        }
    }

    #[test]
    fn test_secret_only_query_yields_bare_path() {
        let guard = guard(false, "s3cret");
        let decision = guard.decide(&route(), "/oferta", Some("k=s3cret"), None, NOW);
        assert!(matches!(
            decision,
            LinkDecision::RedirectClean { ref location, .. } if location == "/oferta"
        ));
    }

    #[test]
    fn test_encoded_secret_is_decoded_for_comparison() {
        let guard = guard(false, "a b+c");
        let decision = guard.decide(&route(), "/oferta", Some("x=1&k=a+b%2Bc"), None, NOW);
        assert!(matches!(
            decision,
            LinkDecision::RedirectClean { ref location, .. } if location == "/oferta?x=1"
        ));
    }

    #[test]
    fn test_mismatch_without_cookie_falls_back() {
        let guard = guard(false, "s3cret");
        for query in [None, Some("k=wrong"), Some("utm_source=ig"), Some("k=")] {
            assert_eq!(
                guard.decide(&route(), "/oferta", query, None, NOW),
                LinkDecision::RedirectFallback {
                    location: "https://www.google.com".to_string()
                }
            );
        }
    }

    #[test]
    fn test_valid_cookie_allows_regardless_of_secret() {
        let guard = guard(false, "s3cret");
        let token = guard.issue_token(&route(), NOW).unwrap();
        let later = NOW + 29 * 24 * 60 * 60;

        for query in [None, Some("k=wrong"), Some("k=s3cret&x=1")] {
            assert_eq!(
                guard.decide(&route(), "/oferta", query, Some(&token), later),
                LinkDecision::Allow
            );
        }
    }

    #[test]
    fn test_expired_cookie_reverts_to_unverified() {
        let guard = guard(false, "s3cret");
        let token = guard.issue_token(&route(), NOW).unwrap();
        let expired = NOW + 30 * 24 * 60 * 60;

        assert!(!guard.verify_token(&route(), &token, expired));
        assert!(matches!(
            guard.decide(&route(), "/oferta", None, Some(&token), expired),
            LinkDecision::RedirectFallback { .. }
        ));
    }

    #[test]
    fn test_forged_or_foreign_cookies_are_rejected() {
        let guard = guard(false, "s3cret");
        assert!(!guard.verify_token(&route(), "garbage", NOW));
        assert!(!guard.verify_token(&route(), "1700000000.AAAA", NOW));

        let future = guard.issue_token(&route(), NOW + 3600).unwrap();
        assert!(!guard.verify_token(&route(), &future, NOW));

        let other_route = ProtectedRoute::new("/promo");
        let token = guard.issue_token(&other_route, NOW).unwrap();
        assert!(!guard.verify_token(&route(), &token, NOW));
    }

    #[test]
    fn test_empty_secret_fails_closed_in_production() {
        let guard = guard(false, "");
        let token = guard.issue_token(&route(), NOW).unwrap();
        assert!(matches!(
            guard.decide(&route(), "/oferta", Some("k="), Some(&token), NOW),
            LinkDecision::RedirectFallback { .. }
        ));
    }

    #[test]
    fn test_development_always_allows() {
        let guard = guard(true, "");
        assert_eq!(guard.decide(&route(), "/oferta", None, None, NOW), LinkDecision::Allow);
    }

    #[test]
    fn test_route_matching() {
        let guard = guard(false, "s3cret");
        assert_eq!(guard.route_for("/oferta").map(|r| r.path.as_str()), Some("/oferta"));
        assert_eq!(guard.route_for("/oferta/step-2").map(|r| r.path.as_str()), Some("/oferta"));
        assert_eq!(guard.route_for("/oferta/vip/1").map(|r| r.path.as_str()), Some("/oferta/vip"));
        assert!(guard.route_for("/ofertas").is_none());
        assert!(guard.route_for("/").is_none());
    }

    #[test]
    fn test_trailing_slash_route_is_normalized() {
        let slashed = ProtectedRoute::new("/oferta/");
        assert_eq!(slashed, ProtectedRoute::new("/oferta"));
        assert_eq!(ProtectedRoute::new("/").path, "/");
        assert_eq!(ProtectedRoute::new("//").path, "/");
        assert!(ProtectedRoute::new("/").matches("/anything"));

        let guard = guard(false, "s3cret");
        match guard.decide(&slashed, "/oferta", Some("k=s3cret"), None, NOW) {
            LinkDecision::RedirectClean { location, cookie } => {
                assert_eq!(location, "/oferta");
                assert_eq!(cookie.path, "/oferta");
                assert!(guard.verify_token(&route(), &cookie.value, NOW));
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }
}
