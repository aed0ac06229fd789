//! Admin monitor for the abuse-protection state

use crate::abuse::Clock;
use crate::routes::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use vigia_common::{constants, BanEntry, MonitorSnapshot};

/// Build the admin router
pub fn router() -> Router<AppState> {
    Router::new().route(constants::MONITOR_PATH, get(get_monitor))
}

/// Validate the admin bearer token
fn validate_admin(state: &AppState, headers: &HeaderMap) -> bool {
    let admin_token = state.config.admin_token.as_str();
    if admin_token.is_empty() {
        return false;
    }

    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|t| t == admin_token)
        .unwrap_or(false)
}

/// Current counters, bans and top identities
pub fn snapshot(state: &AppState) -> MonitorSnapshot {
    let now = state.clock.now();
    let activity = state.throttle.activity(now);

    MonitorSnapshot {
        generated_at_unix: state.clock.unix_now(),
        bans: state
            .bans
            .active(now)
            .into_iter()
            .map(|(origin, remaining)| BanEntry {
                origin,
                expires_in_secs: remaining.as_secs(),
            })
            .collect(),
        tracked_identities: activity.tracked_identities,
        tracked_pairs: activity.tracked_pairs,
        rate_limited_origins: state.classifier.tracked_origins(),
        cached_classifications: state.classifier.cached(),
        top_identities: activity.top_identities,
        near_limit_identities: activity.near_limit_identities,
        multi_origin_identities: activity.multi_origin_identities,
        rejections: activity.rejections,
    }
}

async fn get_monitor(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !validate_admin(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    Json(snapshot(&state)).into_response()
}
