// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Monotonic time sources.
//!
//! The scheduling core never reads the OS clock directly; everything that
//! needs "now" goes through the [`Clock`] trait so tests can substitute a
//! [`ManualClock`] and drive time deterministically.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use crate::time::{Duration, Timestamp};

/// A monotonic time source.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// The production clock: monotonic, anchored at an arbitrary process-local
/// origin chosen at construction.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Creates a clock whose zero point is "now".
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "process uptime in nanoseconds fits in i64 for ~292 years"
        )]
        let nanos = self.origin.elapsed().as_nanos() as i64;
        Timestamp::from_nanos(nanos)
    }
}

/// A clock that only moves when told to. Test-only in spirit, but exported so
/// downstream harnesses can drive the core deterministically.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Creates a manual clock starting at the given time.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(start.nanos()),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, d: Duration) {
        self.now.fetch_add(d.nanos(), Ordering::Relaxed);
    }

    /// Jumps the clock to an absolute time.
    pub fn set(&self, t: Timestamp) {
        self.now.store(t.nanos(), Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_nanos(self.now.load(Ordering::Relaxed))
    }
}
