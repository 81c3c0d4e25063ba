//! Coordination of concurrent fills for the same fingerprint.
//!
//! The first caller to miss becomes the leader and receives a [`FillGuard`]; later callers
//! subscribe to the leader's `watch` channel. The guard removes the in-flight slot when it is
//! finished or dropped, so a cancelled leader never leaves waiters stuck: they see the sender
//! close and retry.

use super::Fingerprint;
use crate::backend::UpstreamError;
use bytes::Bytes;
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

pub(crate) type FillOutcome = Result<Bytes, UpstreamError>;

struct InflightFill {
    id: u64,
    tx: watch::Sender<Option<FillOutcome>>,
}

#[derive(Default)]
pub(crate) struct InflightFills {
    fills: DashMap<Fingerprint, InflightFill>,
    next_id: AtomicU64,
}

pub(crate) enum FillRole<'a> {
    Leader(FillGuard<'a>),
    Waiter(watch::Receiver<Option<FillOutcome>>),
}

impl InflightFills {
    /// Registers the caller as leader for `fingerprint`, or subscribes it to the current one.
    pub(crate) fn join_or_lead(&self, fingerprint: Fingerprint) -> FillRole<'_> {
        match self.fills.entry(fingerprint) {
            Entry::Occupied(entry) => FillRole::Waiter(entry.get().tx.subscribe()),
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, _rx) = watch::channel(None);
                entry.insert(InflightFill { id, tx });
                FillRole::Leader(FillGuard { fills: &self.fills, fingerprint, id, finished: false })
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.fills.len()
    }
}

/// Waits for the leader's outcome. `None` means the leader went away without one.
pub(crate) async fn wait_for_leader(
    mut rx: watch::Receiver<Option<FillOutcome>>,
) -> Option<FillOutcome> {
    let outcome = rx.wait_for(Option::is_some).await.ok()?.clone();
    outcome
}

/// Leadership of one in-flight fill.
pub(crate) struct FillGuard<'a> {
    fills: &'a DashMap<Fingerprint, InflightFill>,
    fingerprint: Fingerprint,
    id: u64,
    finished: bool,
}

impl FillGuard<'_> {
    /// Releases the slot and hands `outcome` to every current waiter.
    pub(crate) fn finish(mut self, outcome: FillOutcome) {
        self.finished = true;
        if let Some((_, fill)) = self.release() {
            fill.tx.send_replace(Some(outcome));
        }
    }

    fn release(&self) -> Option<(Fingerprint, InflightFill)> {
        let id = self.id;
        self.fills.remove_if(&self.fingerprint, |_, fill| fill.id == id)
    }
}

impl Drop for FillGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // Dropping the sender wakes waiters with a closed channel.
            self.release();
        }
    }
}
