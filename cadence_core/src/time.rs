// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Monotonic time points and durations.
//!
//! All time in this crate lives in a single signed 64-bit nanosecond domain.
//! [`Timestamp`] is a point on the monotonic clock; [`Duration`] is a signed
//! span between two points. Hardware vsync timestamps, predicted vsync
//! instants, fence signal times, and timer deadlines all use these types, so
//! arithmetic never crosses a unit boundary.

use core::fmt;
use core::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// A point in time, in nanoseconds on the monotonic clock.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// The zero point of the monotonic domain.
    pub const ZERO: Self = Self(0);

    /// Returns the raw nanosecond value.
    #[inline]
    #[must_use]
    pub const fn nanos(self) -> i64 {
        self.0
    }

    /// Creates a timestamp from raw nanoseconds.
    #[inline]
    #[must_use]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Creates a timestamp from milliseconds.
    #[inline]
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000_000)
    }

    /// Saturating addition of a duration.
    #[inline]
    #[must_use]
    pub const fn saturating_add(self, d: Duration) -> Self {
        Self(self.0.saturating_add(d.0))
    }

    /// Returns the span since an earlier point, or zero if `earlier` is
    /// actually later.
    #[inline]
    #[must_use]
    pub const fn saturating_since(self, earlier: Self) -> Duration {
        if self.0 > earlier.0 {
            Duration(self.0 - earlier.0)
        } else {
            Duration::ZERO
        }
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign<Duration> for Timestamp {
    #[inline]
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs.0;
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Duration) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Self) -> Duration {
        Duration(self.0 - rhs.0)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A signed span of time in nanoseconds.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(pub i64);

impl Duration {
    /// A zero-length span.
    pub const ZERO: Self = Self(0);

    /// Returns the raw nanosecond value.
    #[inline]
    #[must_use]
    pub const fn nanos(self) -> i64 {
        self.0
    }

    /// Creates a duration from raw nanoseconds.
    #[inline]
    #[must_use]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Creates a duration from microseconds.
    #[inline]
    #[must_use]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros * 1_000)
    }

    /// Creates a duration from milliseconds.
    #[inline]
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000_000)
    }

    /// Creates a duration from whole seconds.
    #[inline]
    #[must_use]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * 1_000_000_000)
    }

    /// Whether this span is strictly positive.
    #[inline]
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Absolute value of the span.
    #[inline]
    #[must_use]
    pub const fn abs(self) -> Self {
        Self(self.0.abs())
    }

    /// Saturating subtraction, clamped at zero.
    #[inline]
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        if self.0 > rhs.0 {
            Self(self.0 - rhs.0)
        } else {
            Self::ZERO
        }
    }

    /// Converts a non-negative span to a [`std::time::Duration`] for use with
    /// OS wait primitives. Negative spans convert to zero.
    #[inline]
    #[must_use]
    pub fn to_std(self) -> std::time::Duration {
        std::time::Duration::from_nanos(self.0.max(0) as u64)
    }
}

impl Add for Duration {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Duration {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Duration {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Duration {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Mul<i64> for Duration {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: i64) -> Self {
        Self(self.0 * rhs)
    }
}

impl Neg for Duration {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Duration({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_duration_arithmetic() {
        let t = Timestamp::from_nanos(1_000);
        let d = Duration::from_nanos(250);
        assert_eq!((t + d).nanos(), 1_250);
        assert_eq!((t - d).nanos(), 750);
        assert_eq!(t + d - t, d);
    }

    #[test]
    fn timestamp_difference_is_signed() {
        let a = Timestamp::from_nanos(100);
        let b = Timestamp::from_nanos(400);
        assert_eq!(b - a, Duration::from_nanos(300));
        assert_eq!(a - b, Duration::from_nanos(-300));
        assert_eq!(a.saturating_since(b), Duration::ZERO);
        assert_eq!(b.saturating_since(a), Duration::from_nanos(300));
    }

    #[test]
    fn unit_constructors() {
        assert_eq!(Duration::from_micros(500).nanos(), 500_000);
        assert_eq!(Duration::from_millis(3).nanos(), 3_000_000);
        assert_eq!(Duration::from_secs(1).nanos(), 1_000_000_000);
        assert_eq!(Timestamp::from_millis(750).nanos(), 750_000_000);
    }

    #[test]
    fn duration_helpers() {
        assert!(Duration::from_nanos(1).is_positive());
        assert!(!Duration::ZERO.is_positive());
        assert_eq!(Duration::from_nanos(-7).abs().nanos(), 7);
        assert_eq!(
            Duration::from_nanos(5).saturating_sub(Duration::from_nanos(9)),
            Duration::ZERO
        );
        assert_eq!((-Duration::from_nanos(4)).nanos(), -4);
        assert_eq!((Duration::from_millis(2) * 3).nanos(), 6_000_000);
    }

    #[test]
    fn to_std_clamps_negative() {
        assert_eq!(Duration::from_nanos(-1).to_std(), std::time::Duration::ZERO);
        assert_eq!(
            Duration::from_micros(10).to_std(),
            std::time::Duration::from_micros(10)
        );
    }
}
