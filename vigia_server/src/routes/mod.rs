//! Route handlers for the Vigia server

pub mod admin;
pub mod pages;
pub mod shield;
pub mod transactions;

use crate::abuse::{
    BanStore, Clock, OfferLinkGuard, RequestClassifier, SharedClock, Sweeper, SystemClock,
    TransactionThrottle,
};
use crate::config::{Config, ConfigError};
use axum::{extract::State, middleware, response::IntoResponse, routing::get, Json, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub clock: SharedClock,
    pub bans: Arc<BanStore>,
    pub classifier: Arc<RequestClassifier>,
    pub link_guard: Arc<OfferLinkGuard>,
    pub throttle: Arc<TransactionThrottle>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build every store around one clock
    pub fn with_clock(config: Config, clock: SharedClock) -> Result<Self, ConfigError> {
        let bans = Arc::new(BanStore::new());
        let classifier = Arc::new(RequestClassifier::new(config.classifier(), clock.clone()));
        let link_guard = Arc::new(OfferLinkGuard::new(
            config.link_guard(),
            config.protected_routes()?,
        ));
        let throttle = Arc::new(TransactionThrottle::new(
            config.throttle(),
            bans.clone(),
            clock.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            clock,
            bans,
            classifier,
            link_guard,
            throttle,
        })
    }

    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            self.bans.clone(),
            self.classifier.clone(),
            self.throttle.clone(),
            self.clock.clone(),
        )
    }
}

/// Build the full router with the shield middleware in front of every route
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(transactions::router())
        .merge(admin::router())
        .fallback(pages::classified_page)
        .layer(middleware::from_fn_with_state(state.clone(), shield::shield))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let now = state.clock.now();
    Json(serde_json::json!({
        "status": "healthy",
        "bans": state.bans.active(now).len(),
        "tracked_identities": state.throttle.tracked_identities(),
    }))
}
