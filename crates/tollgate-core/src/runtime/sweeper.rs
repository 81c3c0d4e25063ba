//! Periodic maintenance of in-memory state.
//!
//! One task per runtime. Each tick removes expired cache entries, evicts idle rate-limit
//! buckets, prunes stale verification entries and republishes the size gauges. Lazy expiry on
//! access keeps reads correct between ticks; the sweep only bounds memory.

use super::TollgateComponents;
use crate::metrics;
use std::time::Duration;
use tokio::{
    sync::broadcast,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_entries: usize,
    pub idle_buckets: usize,
    pub stale_verifications: usize,
}

pub(super) fn sweep_once(components: &TollgateComponents) -> SweepReport {
    let report = SweepReport {
        expired_entries: components.cache().sweep_expired(),
        idle_buckets: components.limiter().evict_idle(),
        stale_verifications: components.keys().prune_verification_cache(),
    };

    metrics::set_cache_entries(components.cache().len());
    metrics::set_rate_limit_buckets(components.limiter().bucket_count());

    if report != SweepReport::default() {
        debug!(
            expired_entries = report.expired_entries,
            idle_buckets = report.idle_buckets,
            stale_verifications = report.stale_verifications,
            "sweep completed"
        );
    }
    report
}

/// Runs until the shutdown channel fires or closes.
///
/// The first sweep happens one `period` after start. Ticks missed while a sweep overran are
/// delayed rather than bunched.
pub(super) async fn run_sweeper(
    components: TollgateComponents,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let Some(start) = Instant::now().checked_add(period) else {
        warn!(period_secs = period.as_secs(), "sweep period out of range, sweeper idle");
        let _ = shutdown_rx.recv().await;
        return;
    };
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(period_secs = period.as_secs(), "sweeper started");

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => {
                debug!("sweeper received shutdown signal");
                break;
            }

            _ = ticker.tick() => {
                sweep_once(&components);
            }
        }
    }

    info!("sweeper shutdown complete");
}
