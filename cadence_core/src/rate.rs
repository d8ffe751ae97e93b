// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Refresh rates, display modes, and sub-harmonic dividers.
//!
//! [`Fps`] deliberately does not implement `PartialEq`: two rates measured or
//! derived independently are never bit-identical, so all comparisons go
//! through the margin-aware methods ([`equals_with_margin`] and friends).
//!
//! [`equals_with_margin`]: Fps::equals_with_margin

use core::fmt;

use crate::time::Duration;

/// Comparison tolerance for refresh rates, in Hz.
const FPS_EPSILON: f32 = 0.001;

/// A refresh rate in frames per second. Always strictly positive.
#[derive(Clone, Copy)]
pub struct Fps(f32);

impl Fps {
    /// Creates a rate from a Hz value.
    ///
    /// # Panics
    ///
    /// Panics if `hz` is not strictly positive.
    #[must_use]
    pub fn from_hz(hz: f32) -> Self {
        assert!(hz > 0.0, "refresh rate must be positive, got {hz}");
        Self(hz)
    }

    /// Creates a rate from a vsync period.
    ///
    /// # Panics
    ///
    /// Panics if `period` is not strictly positive.
    #[must_use]
    pub fn from_period(period: Duration) -> Self {
        assert!(
            period.is_positive(),
            "vsync period must be positive, got {period:?}"
        );
        #[expect(
            clippy::cast_precision_loss,
            reason = "realistic vsync periods are far below f32 precision limits in Hz"
        )]
        let hz = 1e9_f32 / period.nanos() as f32;
        Self(hz)
    }

    /// Returns the rate in Hz.
    #[inline]
    #[must_use]
    pub const fn hz(self) -> f32 {
        self.0
    }

    /// Returns the vsync period, `round(1e9 / fps)` nanoseconds.
    #[must_use]
    pub fn vsync_period(self) -> Duration {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "1e9 / positive finite fps rounds to a representable i64"
        )]
        let nanos = (1e9_f64 / f64::from(self.0)).round() as i64;
        Duration::from_nanos(nanos)
    }

    /// Whether two rates are equal within [`FPS_EPSILON`].
    #[must_use]
    pub fn equals_with_margin(self, other: Self) -> bool {
        (self.0 - other.0).abs() < FPS_EPSILON
    }

    /// Whether `self` is greater than `other` beyond the margin.
    #[must_use]
    pub fn greater_than_with_margin(self, other: Self) -> bool {
        self.0 > other.0 + FPS_EPSILON
    }

    /// Whether `self` is less than or equal to `other` within the margin.
    #[must_use]
    pub fn less_than_or_equal_with_margin(self, other: Self) -> bool {
        !self.greater_than_with_margin(other)
    }
}

impl fmt::Debug for Fps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}Hz", self.0)
    }
}

impl fmt::Display for Fps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} Hz", self.0)
    }
}

/// Identifies one mode of a physical display. Totally ordered so ties between
/// otherwise equivalent modes break deterministically.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DisplayModeId(pub u32);

impl fmt::Debug for DisplayModeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DisplayModeId({})", self.0)
    }
}

/// Identifies a physical display.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DisplayId(pub u64);

impl fmt::Debug for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DisplayId({})", self.0)
    }
}

/// One selectable refresh configuration of the display.
#[derive(Clone, Copy, Debug)]
pub struct RefreshRate {
    /// The mode this rate belongs to.
    pub mode_id: DisplayModeId,
    /// The refresh rate itself.
    pub fps: Fps,
}

impl RefreshRate {
    /// Creates a refresh rate entry.
    #[must_use]
    pub fn new(mode_id: DisplayModeId, fps: Fps) -> Self {
        Self { mode_id, fps }
    }

    /// The vsync period of this rate.
    #[must_use]
    pub fn vsync_period(&self) -> Duration {
        self.fps.vsync_period()
    }
}

/// Computes the sub-harmonic divider between the display rate and a target
/// rate: `round(display / target)`.
///
/// Returns 0 when the ratio is more than 0.1 away from an integer (the target
/// does not divide the display rate) or when the target exceeds the display
/// rate; callers treat 0 and 1 alike as "no throttling".
#[must_use]
pub fn frame_rate_divider(display: Fps, target: Fps) -> i64 {
    const RATIO_THRESHOLD: f32 = 0.1;

    let ratio = display.hz() / target.hz();
    let rounded = ratio.round();
    if (ratio - rounded).abs() > RATIO_THRESHOLD {
        return 0;
    }
    #[expect(
        clippy::cast_possible_truncation,
        reason = "rounded ratio of two positive refresh rates is a small integer"
    )]
    let divider = rounded as i64;
    divider
}
