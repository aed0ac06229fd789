//! Request shield middleware
//!
//! Runs in front of every route: rate limiting, classification with bot
//! redirects, and the offer link guard on protected routes.

use crate::abuse::{Clock, LinkDecision, RateLimitResult, RequestMeta, Verdict, VerificationCookie};
use crate::routes::AppState;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{Response, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::net::SocketAddr;
use vigia_common::constants;

/// Network origin of the client, attached to every request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOrigin(pub String);

/// Shield middleware
pub async fn shield(State(state): State<AppState>, mut request: Request, next: Next) -> Response<Body> {
    let origin = client_origin(&state, &request);
    request.extensions_mut().insert(ClientOrigin(origin.clone()));

    let admission = state.classifier.admit(&origin);
    if !admission.allowed {
        return rate_limit_response(&admission);
    }

    let path = request.uri().path().to_string();
    if is_bypassed(&path) {
        return next.run(request).await;
    }

    let meta = RequestMeta::from_parts(&origin, request.headers(), request.uri().query());
    let classification = state.classifier.classify(&meta);
    request.extensions_mut().insert(classification.clone());

    if let Verdict::Redirect(location) = state.classifier.verdict(&classification) {
        return Redirect::to(&location).into_response();
    }

    if let Some(route) = state.link_guard.route_for(&path) {
        let jar = CookieJar::from_headers(request.headers());
        let decision = state.link_guard.decide(
            route,
            &path,
            request.uri().query(),
            jar.get(&route.cookie_name).map(|cookie| cookie.value()),
            state.clock.unix_now(),
        );

        match decision {
            LinkDecision::Allow => {}
            LinkDecision::RedirectClean { location, cookie } => {
                return (jar.add(verification_cookie(cookie)), Redirect::to(&location)).into_response();
            }
            LinkDecision::RedirectFallback { location } => {
                return Redirect::to(&location).into_response();
            }
        }
    }

    next.run(request).await
}

/// Socket peer address, or the first forwarded hop when proxies are trusted
pub fn client_origin(state: &AppState, request: &Request) -> String {
    if state.config.trust_proxy_headers {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty());
        if let Some(hop) = forwarded {
            return hop.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Paths served without classification or link checks
fn is_bypassed(path: &str) -> bool {
    constants::BYPASS_PREFIXES.iter().any(|prefix| {
        path == *prefix
            || path
                .strip_prefix(prefix)
                .map(|rest| rest.starts_with('/'))
                .unwrap_or(false)
    })
}

fn verification_cookie(cookie: VerificationCookie) -> Cookie<'static> {
    let max_age = i64::try_from(cookie.max_age.as_secs()).unwrap_or(i64::MAX);
    Cookie::build((cookie.name, cookie.value))
        .path(cookie.path)
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(max_age))
        .build()
}

/// Rate limit error response
fn rate_limit_response(result: &RateLimitResult) -> Response<Body> {
    let reset_in_secs = result.retry_after_secs();
    let body = format!(
        "Rate limit exceeded. Try again in {} seconds.",
        reset_in_secs
    );

    let mut builder = Response::builder()
        .status(StatusCode::TOO_MANY_REQUESTS)
        .header("Retry-After", reset_in_secs.to_string());
    for (name, value) in result.headers() {
        builder = builder.header(name, value);
    }

    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
