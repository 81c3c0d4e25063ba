//! Time sources for the access layer.
//!
//! Every component that reasons about time (bucket refill, cache expiry, key expiry) reads it
//! through a [`Clock`] so tests can drive time explicitly with [`ManualClock`] instead of
//! sleeping. The monotonic view ([`Clock::now`]) is used for in-memory bookkeeping; the wall
//! view ([`Clock::utc_now`]) is used for anything persisted.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

/// Source of monotonic and wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Monotonic instant for durations measured in-process.
    fn now(&self) -> Instant;

    /// Wall-clock time for persisted timestamps.
    fn utc_now(&self) -> DateTime<Utc>;
}

/// Shared handle to a clock implementation.
pub type SharedClock = Arc<dyn Clock>;

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    #[must_use]
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Both views advance together: after `advance(d)`, `now()` and `utc_now()` are each `d` later
/// than before.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    wall_origin: DateTime<Utc>,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a clock frozen at the current system time.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Creates a clock whose wall view starts at `wall_origin`.
    #[must_use]
    pub fn starting_at(wall_origin: DateTime<Utc>) -> Self {
        Self { origin: Instant::now(), wall_origin, offset: Mutex::new(Duration::ZERO) }
    }

    /// Moves time forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock();
        *offset += by;
    }

    /// Sets the total elapsed time since the clock was created.
    ///
    /// Offsets only move forward; a smaller value than the current one is ignored so the
    /// monotonic view never goes backwards.
    pub fn set_offset(&self, offset: Duration) {
        let mut current = self.offset.lock();
        if offset > *current {
            *current = offset;
        }
    }

    /// Total time this clock has been advanced.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        let offset = *self.offset.lock();
        // chrono cannot represent offsets beyond ~292 billion years; saturate instead.
        let delta = chrono::Duration::from_std(offset).unwrap_or(chrono::Duration::MAX);
        self.wall_origin.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
