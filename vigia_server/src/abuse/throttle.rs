//! Transaction throttle
//!
//! Bounds purchase attempts per identity and per (identity, origin) pair over
//! a rolling window, and bans every origin of an identity that shows up from
//! too many networks in a short span.
//!
//! Rules are evaluated in order and the first match wins:
//! 1. origin banned
//! 2. identity over its window limit
//! 3. (identity, origin) pair over its window limit
//! 4. distinct origins within the attack span reach the threshold
//!
//! Only allowed attempts enter the attempt log.

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use vigia_common::{IdentityActivity, IdentityKey, RejectionTotals, ThrottleDecision};

use super::ban_store::BanStore;
use super::clock::{within, Clock, SharedClock};

/// Identities listed in the activity report
const TOP_IDENTITIES: usize = 10;

/// Throttle thresholds and windows
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub identity_window: Duration,
    /// Attempts per identity within the window
    pub identity_max: usize,
    /// Attempts per (identity, origin) within the window
    pub origin_max: usize,
    pub attack_span: Duration,
    /// Distinct origins within the span that count as an attack
    pub attack_threshold: usize,
    pub ban_duration: Duration,
}

impl ThrottleConfig {
    /// How long attempt records are kept
    pub fn retention(&self) -> Duration {
        self.identity_window.max(self.attack_span)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            identity_window: Duration::from_secs(24 * 60 * 60),
            identity_max: 20,
            origin_max: 5,
            attack_span: Duration::from_secs(60 * 60),
            attack_threshold: 3,
            ban_duration: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
struct Attempt {
    origin: String,
    at: Instant,
}

#[derive(Default)]
struct Rejections {
    identity_limit: AtomicU64,
    origin_limit: AtomicU64,
    attack: AtomicU64,
    banned: AtomicU64,
}

impl Rejections {
    fn record(&self, decision: ThrottleDecision) {
        let counter = match decision {
            ThrottleDecision::Allowed => return,
            ThrottleDecision::IdentityLimitExceeded => &self.identity_limit,
            ThrottleDecision::OriginLimitExceeded => &self.origin_limit,
            ThrottleDecision::AttackDetected => &self.attack,
            ThrottleDecision::Banned => &self.banned,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn totals(&self) -> RejectionTotals {
        RejectionTotals {
            identity_limit: self.identity_limit.load(Ordering::Relaxed),
            origin_limit: self.origin_limit.load(Ordering::Relaxed),
            attack: self.attack.load(Ordering::Relaxed),
            banned: self.banned.load(Ordering::Relaxed),
        }
    }
}

/// Aggregated throttle state for the admin monitor
#[derive(Debug, Clone, Default)]
pub struct ThrottleActivity {
    pub tracked_identities: usize,
    pub tracked_pairs: usize,
    pub top_identities: Vec<IdentityActivity>,
    pub near_limit_identities: usize,
    pub multi_origin_identities: usize,
    pub rejections: RejectionTotals,
}

pub struct TransactionThrottle {
    config: ThrottleConfig,
    bans: Arc<BanStore>,
    clock: SharedClock,
    attempts: DashMap<IdentityKey, Vec<Attempt>>,
    rejections: Rejections,
}

impl TransactionThrottle {
    pub fn new(config: ThrottleConfig, bans: Arc<BanStore>, clock: SharedClock) -> Self {
        Self {
            config,
            bans,
            clock,
            attempts: DashMap::new(),
            rejections: Rejections::default(),
        }
    }

    /// Check an attempt at the current clock time
    pub fn check_now(&self, key: &IdentityKey, origin: &str) -> ThrottleDecision {
        self.check(key, origin, self.clock.now())
    }

    /// Evaluate an attempt and record it when allowed
    pub fn check(&self, key: &IdentityKey, origin: &str, now: Instant) -> ThrottleDecision {
        if self.bans.is_banned(origin, now) {
            return self.reject(key, origin, ThrottleDecision::Banned);
        }

        let outcome: Result<Option<Vec<String>>, ThrottleDecision> = {
            let mut entry = self.attempts.entry(key.clone()).or_default();
            let log = entry.value_mut();
            log.retain(|attempt| within(now, attempt.at, self.config.retention()));

            let identity_count = log
                .iter()
                .filter(|attempt| within(now, attempt.at, self.config.identity_window))
                .count();
            let pair_count = log
                .iter()
                .filter(|attempt| {
                    attempt.origin == origin && within(now, attempt.at, self.config.identity_window)
                })
                .count();

            if identity_count >= self.config.identity_max {
                Err(ThrottleDecision::IdentityLimitExceeded)
            } else if pair_count >= self.config.origin_max {
                Err(ThrottleDecision::OriginLimitExceeded)
            } else {
                let mut origins: Vec<String> = log
                    .iter()
                    .filter(|attempt| within(now, attempt.at, self.config.attack_span))
                    .map(|attempt| attempt.origin.as_str())
                    .collect::<HashSet<_>>()
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                if !origins.iter().any(|seen| seen == origin) {
                    origins.push(origin.to_string());
                }

                if origins.len() >= self.config.attack_threshold {
                    Ok(Some(origins))
                } else {
                    log.push(Attempt {
                        origin: origin.to_string(),
                        at: now,
                    });
                    Ok(None)
                }
            }
        };

        // The identity entry is released before any ban is written
        match outcome {
            Err(decision) => self.reject(key, origin, decision),
            Ok(None) => ThrottleDecision::Allowed,
            Ok(Some(mut origins)) => {
                origins.sort();
                for banned in &origins {
                    self.bans.ban(banned, self.config.ban_duration, now);
                }
                tracing::warn!(
                    "Attack detected for identity {}: banning {} origins ({}) for {}s",
                    key.masked(),
                    origins.len(),
                    origins.join(", "),
                    self.config.ban_duration.as_secs()
                );
                self.reject(key, origin, ThrottleDecision::AttackDetected)
            }
        }
    }

    /// Drop records past retention for every identity. Returns records removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        self.identities().iter().map(|key| self.prune(key, now)).sum()
    }

    /// Identity keys currently tracked
    pub fn identities(&self) -> Vec<IdentityKey> {
        self.attempts.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Drop one identity's records past retention, removing it when empty
    pub fn prune(&self, key: &IdentityKey, now: Instant) -> usize {
        let retention = self.config.retention();
        let removed = match self.attempts.get_mut(key) {
            Some(mut log) => {
                let before = log.len();
                log.retain(|attempt| within(now, attempt.at, retention));
                before - log.len()
            }
            None => 0,
        };
        self.attempts.remove_if(key, |_, log| log.is_empty());
        removed
    }

    /// Attempts recorded for an identity within the identity window
    pub fn attempts(&self, key: &IdentityKey, now: Instant) -> usize {
        self.attempts
            .get(key)
            .map(|log| {
                log.iter()
                    .filter(|attempt| within(now, attempt.at, self.config.identity_window))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn tracked_identities(&self) -> usize {
        self.attempts.len()
    }

    pub fn rejections(&self) -> RejectionTotals {
        self.rejections.totals()
    }

    /// Per-identity activity summary
    pub fn activity(&self, now: Instant) -> ThrottleActivity {
        let near_limit = (self.config.identity_max * 3).div_ceil(4);
        let multi_origin = self.config.attack_threshold.saturating_sub(1).max(2);

        let mut activity = ThrottleActivity {
            rejections: self.rejections.totals(),
            ..Default::default()
        };
        let mut identities = Vec::new();

        for entry in self.attempts.iter() {
            let live: Vec<&Attempt> = entry
                .value()
                .iter()
                .filter(|attempt| within(now, attempt.at, self.config.identity_window))
                .collect();
            if live.is_empty() {
                continue;
            }

            let mut per_origin: HashMap<&str, usize> = HashMap::new();
            for attempt in &live {
                *per_origin.entry(attempt.origin.as_str()).or_default() += 1;
            }
            let recent_origins = entry
                .value()
                .iter()
                .filter(|attempt| within(now, attempt.at, self.config.attack_span))
                .map(|attempt| attempt.origin.as_str())
                .collect::<HashSet<_>>()
                .len();

            activity.tracked_identities += 1;
            activity.tracked_pairs += per_origin.len();
            if live.len() >= near_limit {
                activity.near_limit_identities += 1;
            }
            if recent_origins >= multi_origin {
                activity.multi_origin_identities += 1;
            }

            identities.push(IdentityActivity {
                identity: entry.key().masked(),
                attempts: live.len(),
                distinct_origins: per_origin.len(),
            });
        }

        identities.sort_by(|a, b| {
            b.attempts
                .cmp(&a.attempts)
                .then_with(|| a.identity.cmp(&b.identity))
        });
        identities.truncate(TOP_IDENTITIES);
        activity.top_identities = identities;
        activity
    }

    fn reject(&self, key: &IdentityKey, origin: &str, decision: ThrottleDecision) -> ThrottleDecision {
        self.rejections.record(decision);
        tracing::warn!(
            "Transaction rejected ({}) for identity {} from {}",
            decision.as_str(),
            key.masked(),
            origin
        );
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abuse::clock::{Clock, MockClock};

    fn jane() -> IdentityKey {
        IdentityKey::from_parts("Jane Roe", "12345678900", "5511999999999").unwrap()
    }

    fn other() -> IdentityKey {
        IdentityKey::from_parts("John Doe", "98765432100", "11988887777").unwrap()
    }

    fn throttle(clock: &MockClock, config: ThrottleConfig) -> (TransactionThrottle, Arc<BanStore>) {
        let bans = Arc::new(BanStore::new());
        (TransactionThrottle::new(config, bans.clone(), clock.shared()), bans)
    }

    fn generous_origin_limit() -> ThrottleConfig {
        ThrottleConfig {
            origin_max: 20,
            ..Default::default()
        }
    }

    #[test]
    fn test_identity_limit_and_reset() {
        let clock = MockClock::new();
        let (throttle, _) = throttle(&clock, generous_origin_limit());
        let start = clock.now();

        for i in 1..=20 {
            assert_eq!(
                throttle.check(&jane(), "A", clock.now()),
                ThrottleDecision::Allowed,
                "attempt {} should be allowed",
                i
            );
            clock.advance(Duration::from_secs(60));
        }

        assert_eq!(
            throttle.check(&jane(), "A", clock.now()),
            ThrottleDecision::IdentityLimitExceeded
        );
        assert_eq!(throttle.attempts(&jane(), clock.now()), 20);

        // Exactly 24h after the first attempt it no longer counts
        let reset_at = start + Duration::from_secs(24 * 60 * 60);
        assert_eq!(throttle.check(&jane(), "A", reset_at), ThrottleDecision::Allowed);
        assert_eq!(throttle.rejections().identity_limit, 1);
    }

    #[test]
    fn test_identity_limit_applies_from_any_origin() {
        let clock = MockClock::new();
        let (throttle, bans) = throttle(&clock, generous_origin_limit());

        for _ in 0..20 {
            assert_eq!(throttle.check(&jane(), "A", clock.now()), ThrottleDecision::Allowed);
        }
        assert_eq!(
            throttle.check(&jane(), "B", clock.now()),
            ThrottleDecision::IdentityLimitExceeded
        );
        assert!(!bans.is_banned("B", clock.now()));
        assert_eq!(throttle.check(&other(), "B", clock.now()), ThrottleDecision::Allowed);
    }

    #[test]
    fn test_concurrent_checks_never_exceed_identity_limit() {
        let clock = MockClock::new();
        let (throttle, _) = throttle(
            &clock,
            ThrottleConfig {
                origin_max: 100,
                ..Default::default()
            },
        );
        let now = clock.now();

        let allowed: usize = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        (0..10)
                            .filter(|_| throttle.check(&jane(), "A", now).is_allowed())
                            .count()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).sum()
        });

        assert_eq!(allowed, 20);
        assert_eq!(throttle.attempts(&jane(), now), 20);
        assert_eq!(throttle.rejections().identity_limit, 60);
    }

    #[test]
    fn test_equivalent_identities_share_a_counter() {
        let clock = MockClock::new();
        let (throttle, _) = throttle(
            &clock,
            ThrottleConfig {
                identity_max: 2,
                ..generous_origin_limit()
            },
        );

        let variant = IdentityKey::from_parts("  jane   ROE ", "123.456.789-00", "+55 (11) 99999-9999").unwrap();
        assert_eq!(throttle.check(&jane(), "A", clock.now()), ThrottleDecision::Allowed);
        assert_eq!(throttle.check(&variant, "A", clock.now()), ThrottleDecision::Allowed);
        assert_eq!(
            throttle.check(&jane(), "A", clock.now()),
            ThrottleDecision::IdentityLimitExceeded
        );
    }

    #[test]
    fn test_origin_limit() {
        let clock = MockClock::new();
        let (throttle, bans) = throttle(&clock, ThrottleConfig::default());

        for _ in 0..5 {
            assert_eq!(throttle.check(&jane(), "A", clock.now()), ThrottleDecision::Allowed);
        }
        assert_eq!(
            throttle.check(&jane(), "A", clock.now()),
            ThrottleDecision::OriginLimitExceeded
        );

        // A second origin is still fine and nothing was banned
        assert_eq!(throttle.check(&jane(), "B", clock.now()), ThrottleDecision::Allowed);
        assert!(bans.is_empty());
    }

    #[test]
    fn test_attack_bans_all_origins_until_expiry() {
        let clock = MockClock::new();
        let (throttle, bans) = throttle(&clock, ThrottleConfig::default());

        assert_eq!(throttle.check(&jane(), "A", clock.now()), ThrottleDecision::Allowed);
        clock.advance(Duration::from_secs(60));
        assert_eq!(throttle.check(&jane(), "B", clock.now()), ThrottleDecision::Allowed);
        clock.advance(Duration::from_secs(60));
        assert_eq!(throttle.check(&jane(), "C", clock.now()), ThrottleDecision::AttackDetected);

        for origin in ["A", "B", "C"] {
            assert!(bans.is_banned(origin, clock.now()));
            assert_eq!(throttle.check(&other(), origin, clock.now()), ThrottleDecision::Banned);
        }
        assert_eq!(throttle.rejections().attack, 1);
        assert_eq!(throttle.rejections().banned, 3);

        // Bans and the attack span have both lapsed
        clock.advance(Duration::from_secs(60 * 60));
        for origin in ["A", "B", "C"] {
            assert!(!bans.is_banned(origin, clock.now()));
        }
        assert_eq!(throttle.check(&jane(), "C", clock.now()), ThrottleDecision::Allowed);
    }

    #[test]
    fn test_ban_takes_precedence() {
        let clock = MockClock::new();
        let (throttle, bans) = throttle(&clock, ThrottleConfig::default());

        bans.ban("A", Duration::from_secs(60), clock.now());
        assert_eq!(throttle.check(&jane(), "A", clock.now()), ThrottleDecision::Banned);
        assert_eq!(throttle.attempts(&jane(), clock.now()), 0);
    }

    #[test]
    fn test_unrelated_identities_are_unaffected() {
        let clock = MockClock::new();
        let (throttle, _) = throttle(&clock, ThrottleConfig::default());

        for _ in 0..5 {
            throttle.check(&jane(), "A", clock.now());
        }
        assert_eq!(
            throttle.check(&jane(), "A", clock.now()),
            ThrottleDecision::OriginLimitExceeded
        );
        assert_eq!(throttle.check(&other(), "A", clock.now()), ThrottleDecision::Allowed);
    }

    #[test]
    fn test_prune_drops_old_records_and_empty_identities() {
        let clock = MockClock::new();
        let (throttle, _) = throttle(&clock, ThrottleConfig::default());

        throttle.check(&jane(), "A", clock.now());
        clock.advance(Duration::from_secs(23 * 60 * 60));
        throttle.check(&other(), "B", clock.now());
        clock.advance(Duration::from_secs(60 * 60));

        assert_eq!(throttle.purge_expired(clock.now()), 1);
        assert_eq!(throttle.tracked_identities(), 1);
        assert_eq!(throttle.identities(), vec![other()]);
    }

    #[test]
    fn test_activity_summary() {
        let clock = MockClock::new();
        let (throttle, _) = throttle(&clock, generous_origin_limit());

        for _ in 0..15 {
            throttle.check(&jane(), "A", clock.now());
        }
        throttle.check(&other(), "A", clock.now());
        throttle.check(&other(), "B", clock.now());

        let activity = throttle.activity(clock.now());
        assert_eq!(activity.tracked_identities, 2);
        assert_eq!(activity.tracked_pairs, 3);
        assert_eq!(activity.near_limit_identities, 1);
        assert_eq!(activity.multi_origin_identities, 1);
        assert_eq!(activity.top_identities[0].attempts, 15);
        assert_eq!(activity.top_identities[0].identity, jane().masked());
        assert_eq!(activity.top_identities[1].distinct_origins, 2);
    }
}
