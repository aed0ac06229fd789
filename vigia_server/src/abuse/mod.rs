//! Abuse prevention module
//!
//! Provides protection against:
//! - Scrapers and bots (request classification, redirects)
//! - Request floods (sliding-window rate limiting per origin)
//! - Offer link sharing (secret-to-cookie link guard)
//! - Purchase fraud (transaction throttle and origin bans)

pub mod ban_store;
pub mod classifier;
pub mod clock;
pub mod link_guard;
pub mod rate_limit;
pub mod signatures;
pub mod sweeper;
pub mod throttle;

pub use ban_store::BanStore;
pub use classifier::{ClassifierConfig, RequestClassifier, RequestMeta, Verdict};
pub use clock::{Clock, SharedClock, SystemClock};
pub use link_guard::{LinkDecision, LinkGuardConfig, OfferLinkGuard, ProtectedRoute, VerificationCookie};
pub use rate_limit::{RateLimitConfig, RateLimitResult, RateLimiter};
pub use sweeper::{spawn_sweeper, SweepReport, Sweeper};
pub use throttle::{ThrottleActivity, ThrottleConfig, TransactionThrottle};
