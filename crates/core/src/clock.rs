// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for testable time handling.
//!
//! Every duration comparison in the scaling/reconciliation/lease loops
//! goes through this trait so boundary conditions (idle timeout at exactly
//! `T_idle`, token skew at exactly `T_skew`) can be tested deterministically
//! with [`FakeClock`] instead of racing the wall clock.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A clock that provides both a monotonic instant (for measuring elapsed
/// durations) and the current wall-clock time (for comparing against
/// externally-issued timestamps such as token/lease expiry).
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;
    fn wall_now(&self) -> DateTime<Utc>;
}

/// Real system clock.
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fake clock for testing with controllable, independently-advanceable time.
#[derive(Clone)]
pub struct FakeClock {
    current: Arc<Mutex<Instant>>,
    wall: Arc<Mutex<DateTime<Utc>>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(Instant::now())),
            wall: Arc::new(Mutex::new(
                DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_else(Utc::now),
            )),
        }
    }

    /// Advance both the monotonic and wall clock by the same duration.
    pub fn advance(&self, duration: Duration) {
        *self.current.lock() += duration;
        if let Ok(d) = chrono::Duration::from_std(duration) {
            *self.wall.lock() += d;
        }
    }

    pub fn set_wall(&self, wall: DateTime<Utc>) {
        *self.wall.lock() = wall;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        *self.current.lock()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        *self.wall.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_both_monotonic_and_wall_time() {
        let clock = FakeClock::new();
        let start_instant = clock.now();
        let start_wall = clock.wall_now();

        clock.advance(Duration::from_secs(300));

        assert_eq!(clock.now() - start_instant, Duration::from_secs(300));
        assert_eq!((clock.wall_now() - start_wall).num_seconds(), 300);
    }
}
