//! Temporary bans on network origins

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Bans longer than this are stored as this; effectively permanent
const PERMANENT: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Keyed set of banned origins with expiry
///
/// Expired records read as absent before the sweeper removes them.
#[derive(Default)]
pub struct BanStore {
    bans: DashMap<String, Instant>,
}

impl BanStore {
    pub fn new() -> Self {
        Self {
            bans: DashMap::new(),
        }
    }

    pub fn is_banned(&self, origin: &str, now: Instant) -> bool {
        self.bans
            .get(origin)
            .map(|until| *until > now)
            .unwrap_or(false)
    }

    /// Ban an origin until `now + duration`, keeping a later existing expiry
    pub fn ban(&self, origin: &str, duration: Duration, now: Instant) {
        if duration.is_zero() {
            return;
        }
        let until = now + duration.min(PERMANENT);
        self.bans
            .entry(origin.to_string())
            .and_modify(|existing| {
                if *existing < until {
                    *existing = until;
                }
            })
            .or_insert(until);
    }

    /// Remove expired records, one key at a time. Returns how many were removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        self.expired(now)
            .iter()
            .filter(|origin| self.purge(origin, now))
            .count()
    }

    /// Origins whose ban has run out
    pub fn expired(&self, now: Instant) -> Vec<String> {
        self.bans
            .iter()
            .filter(|entry| *entry.value() <= now)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Remove one record if it is still expired
    pub fn purge(&self, origin: &str, now: Instant) -> bool {
        self.bans.remove_if(origin, |_, until| *until <= now).is_some()
    }

    /// Unexpired bans with their remaining time
    pub fn active(&self, now: Instant) -> Vec<(String, Duration)> {
        let mut active: Vec<(String, Duration)> = self
            .bans
            .iter()
            .filter(|entry| *entry.value() > now)
            .map(|entry| (entry.key().clone(), entry.value().duration_since(now)))
            .collect();
        active.sort_by(|a, b| b.1.cmp(&a.1));
        active
    }

    /// Physical record count, expired records included
    pub fn len(&self) -> usize {
        self.bans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bans.is_empty()
    }
}
