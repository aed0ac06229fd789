//! Request signatures: user-agent patterns, ad networks and proxy markers

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use vigia_common::{AdSource, DeviceClass};

/// Known scraper/crawler user agents
static BOT_AGENTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(httrack|curl|wget|python-requests|saveweb2zip|bot|spider|crawler|headless|scrapy)")
        .expect("valid bot pattern")
});

/// Mobile device and browser tokens
static MOBILE_AGENTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(android|iphone|ipad|ipod|\bios\b|mobile|mobi|tablet|windows phone|blackberry|opera mini|iemobile|silk|; wv|\bsm-|\bgt-|redmi)",
    )
    .expect("valid mobile pattern")
});

/// Desktop platform tokens
static DESKTOP_AGENTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(windows nt|macintosh|mac os x|x11|linux|cros)").expect("valid desktop pattern")
});

/// Referrer domains of social and ad networks
static AD_DOMAINS: Lazy<Vec<(&'static str, AdSource)>> = Lazy::new(|| {
    vec![
        ("instagram.com", AdSource::InstagramAds),
        ("l.instagram.com", AdSource::InstagramAds),
        ("facebook.com", AdSource::FacebookAds),
        ("m.facebook.com", AdSource::FacebookAds),
        ("l.facebook.com", AdSource::FacebookAds),
        ("fb.com", AdSource::FacebookAds),
        ("fb.watch", AdSource::FacebookAds),
        ("tiktok.com", AdSource::TiktokAds),
        ("googleadservices.com", AdSource::GoogleAds),
    ]
});

/// Click identifiers appended by ad networks
static CLICK_IDS: Lazy<Vec<(&'static str, AdSource)>> = Lazy::new(|| {
    vec![
        ("fbclid", AdSource::FacebookAds),
        ("igshid", AdSource::InstagramAds),
        ("gclid", AdSource::GoogleAds),
        ("ttclid", AdSource::TiktokAds),
        ("ad_id", AdSource::SocialAds),
    ]
});

/// `utm_medium` values that mark paid traffic
static PAID_MEDIUMS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["cpc", "paid", "ads", "paid_social", "paidsocial"].into_iter().collect());

/// Device class from the user agent; empty agents are unknown
pub fn detect_device(user_agent: &str) -> DeviceClass {
    let user_agent = user_agent.trim();
    if user_agent.is_empty() {
        return DeviceClass::Unknown;
    }
    if MOBILE_AGENTS.is_match(user_agent) {
        return DeviceClass::Mobile;
    }
    if DESKTOP_AGENTS.is_match(user_agent) {
        return DeviceClass::Desktop;
    }
    DeviceClass::Unknown
}

pub fn is_bot_agent(user_agent: &str) -> bool {
    BOT_AGENTS.is_match(user_agent)
}

/// Whether forwarding headers show an intermediary
///
/// `headers` holds the non-empty proxy headers by lowercase name.
pub fn uses_proxy(headers: &[(&str, &str)]) -> bool {
    let present: Vec<_> = headers
        .iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .collect();

    let multi_hop = present.iter().any(|(name, value)| {
        *name == "x-forwarded-for" && value.split(',').filter(|hop| !hop.trim().is_empty()).count() > 1
    });

    multi_hop || present.len() > 1
}

/// Ad network of a referrer host
pub fn host_network(host: &str) -> Option<AdSource> {
    let host = host.trim_start_matches("www.");
    AD_DOMAINS
        .iter()
        .find(|(domain, _)| host == *domain || host.ends_with(&format!(".{}", domain)))
        .map(|(_, source)| *source)
}

/// Ad network named by a `utm_source` value
pub fn utm_network(utm_source: &str) -> Option<AdSource> {
    let value = utm_source.trim().to_lowercase();
    if value.contains("instagram") || value == "ig" {
        Some(AdSource::InstagramAds)
    } else if value.contains("facebook") || value == "fb" || value == "meta" {
        Some(AdSource::FacebookAds)
    } else if value.contains("google") {
        Some(AdSource::GoogleAds)
    } else if value.contains("tiktok") {
        Some(AdSource::TiktokAds)
    } else {
        None
    }
}

/// Resolve the ad source from referrer host and query parameters
pub fn detect_ad_source(referrer_host: Option<&str>, query: &[(String, String)]) -> AdSource {
    let param = |key: &str| query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());

    let from_host = referrer_host.and_then(host_network);
    let from_utm = param("utm_source").and_then(utm_network);
    let from_click = CLICK_IDS
        .iter()
        .find(|(key, _)| param(*key).is_some())
        .map(|(_, source)| *source);
    let paid_medium = param("utm_medium")
        .map(|medium| PAID_MEDIUMS.contains(medium.trim().to_lowercase().as_str()))
        .unwrap_or(false);

    let is_ad = from_host.is_some() || from_utm.is_some() || from_click.is_some() || paid_medium;
    if !is_ad {
        return AdSource::Organic;
    }

    from_host
        .or(from_utm)
        .or(from_click.filter(|source| *source != AdSource::SocialAds))
        .unwrap_or(AdSource::SocialAds)
}

#[cfg(test)]
mod tests {
    use super::*;

    const IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 Mobile/15E148";
    const ANDROID_WEBVIEW: &str = "Mozilla/5.0 (Linux; Android 13; SM-A515F; wv) AppleWebKit/537.36 Chrome/119.0 Mobile Safari/537.36";
    const WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/120.0 Safari/537.36";
    const MAC: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 Safari/605.1.15";

    fn query(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_device_detection() {
        assert_eq!(detect_device(IPHONE), DeviceClass::Mobile);
        assert_eq!(detect_device(ANDROID_WEBVIEW), DeviceClass::Mobile);
        assert_eq!(detect_device(WINDOWS), DeviceClass::Desktop);
        assert_eq!(detect_device(MAC), DeviceClass::Desktop);
        assert_eq!(detect_device(""), DeviceClass::Unknown);
        assert_eq!(detect_device("SomethingElse/1.0"), DeviceClass::Unknown);
    }

    #[test]
    fn test_bot_signatures() {
        assert!(is_bot_agent("curl/8.4.0"));
        assert!(is_bot_agent("Mozilla/5.0 (compatible; Googlebot/2.1)"));
        assert!(is_bot_agent("python-requests/2.31"));
        assert!(is_bot_agent("HTTrack Website Copier"));
        assert!(!is_bot_agent(IPHONE));
        assert!(!is_bot_agent(WINDOWS));
    }

    #[test]
    fn test_proxy_markers() {
        assert!(!uses_proxy(&[]));
        assert!(!uses_proxy(&[("x-forwarded-for", "203.0.113.9")]));
        assert!(uses_proxy(&[("x-forwarded-for", "203.0.113.9, 10.0.0.1")]));
        assert!(uses_proxy(&[("x-forwarded-for", "203.0.113.9"), ("via", "1.1 squid")]));
        assert!(!uses_proxy(&[("x-forwarded-for", "203.0.113.9"), ("via", "  ")]));
    }

    #[test]
    fn test_ad_source_from_referrer() {
        assert_eq!(detect_ad_source(Some("l.instagram.com"), &[]), AdSource::InstagramAds);
        assert_eq!(detect_ad_source(Some("m.facebook.com"), &[]), AdSource::FacebookAds);
        assert_eq!(detect_ad_source(Some("www.facebook.com"), &[]), AdSource::FacebookAds);
        assert_eq!(detect_ad_source(Some("example.com"), &[]), AdSource::Organic);
        assert_eq!(detect_ad_source(Some("notfacebook.com"), &[]), AdSource::Organic);
    }

    #[test]
    fn test_ad_source_from_query() {
        assert_eq!(
            detect_ad_source(None, &query(&[("utm_source", "FB"), ("utm_campaign", "x")])),
            AdSource::FacebookAds
        );
        assert_eq!(detect_ad_source(None, &query(&[("utm_source", "ig")])), AdSource::InstagramAds);
        assert_eq!(detect_ad_source(None, &query(&[("gclid", "abc")])), AdSource::GoogleAds);
        assert_eq!(detect_ad_source(None, &query(&[("ad_id", "42")])), AdSource::SocialAds);
        assert_eq!(
            detect_ad_source(None, &query(&[("utm_source", "newsletter"), ("utm_medium", "cpc")])),
            AdSource::SocialAds
        );
        assert_eq!(
            detect_ad_source(None, &query(&[("utm_source", "newsletter")])),
            AdSource::Organic
        );
    }

    #[test]
    fn test_referrer_wins_over_utm() {
        assert_eq!(
            detect_ad_source(Some("instagram.com"), &query(&[("utm_source", "facebook")])),
            AdSource::InstagramAds
        );
    }
}
