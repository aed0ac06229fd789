//! Background cleanup of expired abuse state
//!
//! Each pass walks every store key by key, so no lock is held for longer than
//! one key, and yields to the runtime periodically.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::ban_store::BanStore;
use super::classifier::RequestClassifier;
use super::clock::{Clock, SharedClock};
use super::throttle::TransactionThrottle;

/// Keys processed between yields
const YIELD_EVERY: usize = 256;

/// Counts removed by one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub bans: usize,
    pub attempts: usize,
    pub rate_windows: usize,
    pub classifications: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.bans + self.attempts + self.rate_windows + self.classifications
    }
}

#[derive(Clone)]
pub struct Sweeper {
    bans: Arc<BanStore>,
    classifier: Arc<RequestClassifier>,
    throttle: Arc<TransactionThrottle>,
    clock: SharedClock,
}

impl Sweeper {
    pub fn new(
        bans: Arc<BanStore>,
        classifier: Arc<RequestClassifier>,
        throttle: Arc<TransactionThrottle>,
        clock: SharedClock,
    ) -> Self {
        Self {
            bans,
            classifier,
            throttle,
            clock,
        }
    }

    /// Run one cleanup pass at the current clock time
    pub async fn run_pass(&self) -> SweepReport {
        let now = self.clock.now();

        let bans = sweep(self.bans.expired(now), |origin| {
            usize::from(self.bans.purge(origin, now))
        })
        .await;

        let attempts = sweep(self.throttle.identities(), |key| self.throttle.prune(key, now)).await;

        let limiter = self.classifier.limiter();
        let rate_windows = sweep(limiter.stale_keys(now), |key| {
            usize::from(limiter.purge(key, now))
        })
        .await;

        let classifications = sweep(self.classifier.stale_entries(now), |key| {
            usize::from(self.classifier.purge_entry(key, now))
        })
        .await;

        let report = SweepReport {
            bans,
            attempts,
            rate_windows,
            classifications,
        };

        tracing::debug!(
            "Sweep removed {} entries: {} bans, {} attempts, {} rate windows, {} classifications",
            report.total(),
            report.bans,
            report.attempts,
            report.rate_windows,
            report.classifications
        );
        report
    }
}

/// Apply `purge` to each key, yielding every [`YIELD_EVERY`] keys
async fn sweep<K>(keys: Vec<K>, mut purge: impl FnMut(&K) -> usize) -> usize {
    let mut removed = 0;
    for (i, key) in keys.iter().enumerate() {
        removed += purge(key);
        if (i + 1) % YIELD_EVERY == 0 {
            tokio::task::yield_now().await;
        }
    }
    removed
}

/// Spawn the periodic sweeper; it stops once `shutdown_rx` turns true
pub fn spawn_sweeper(
    sweeper: Sweeper,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Cleanup sweeper started (every {}s)", interval.as_secs());

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    sweeper.run_pass().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::info!("Cleanup sweeper shutting down");
                        break;
                    }
                }
            }
        }
    })
}
