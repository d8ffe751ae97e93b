// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Online estimation of the hardware vsync period and phase.
//!
//! [`VsyncTracker`] consumes a stream of hardware vsync timestamps and keeps
//! a linear model `t = phase + k * period` fitted over a sliding window of
//! recent samples. The model answers two questions for the rest of the core:
//! when is the next vsync at or after a given time, and does a given instant
//! land on the sub-harmonic grid of a slower client rate.
//!
//! Until enough samples accrue the tracker predicts off the ideal seed
//! period; this is deliberately not an error (callers cannot do anything
//! better than the seed either).

use std::collections::VecDeque;

use log::{debug, trace};

use crate::rate::{frame_rate_divider, Fps};
use crate::time::{Duration, Timestamp};

/// Number of recent timestamps retained for fitting.
const HISTORY_SIZE: usize = 20;
/// Minimum samples required before the fit replaces the seed model.
const MIN_SAMPLES_FOR_PREDICTION: usize = 6;
/// Percentage of samples (worst residuals first) discarded before fitting.
const DISCARD_OUTLIER_PERCENT: usize = 20;

#[derive(Clone, Copy, Debug)]
struct Model {
    /// Estimated vsync period, nanoseconds. Always positive.
    period: i64,
    /// Absolute anchor: some instant congruent to a vsync.
    phase: i64,
}

/// Learns the display's true vsync period and phase from noisy timestamps.
#[derive(Debug)]
pub struct VsyncTracker {
    ideal_period: i64,
    timestamps: VecDeque<i64>,
    model: Model,
    /// Last timestamp ever accepted, surviving resets as a phase anchor.
    last_known: Option<i64>,
}

impl VsyncTracker {
    /// Creates a tracker seeded with the given ideal period.
    ///
    /// # Panics
    ///
    /// Panics if `ideal_period` is not strictly positive.
    #[must_use]
    pub fn new(ideal_period: Duration) -> Self {
        assert!(
            ideal_period.is_positive(),
            "ideal period must be positive, got {ideal_period:?}"
        );
        Self {
            ideal_period: ideal_period.nanos(),
            timestamps: VecDeque::with_capacity(HISTORY_SIZE),
            model: Model {
                period: ideal_period.nanos(),
                phase: 0,
            },
            last_known: None,
        }
    }

    /// Feeds one hardware vsync timestamp.
    ///
    /// Returns false (and changes nothing) for duplicate or backward
    /// timestamps.
    pub fn add_timestamp(&mut self, t: Timestamp) -> bool {
        let t = t.nanos();
        if let Some(&last) = self.timestamps.back() {
            if t <= last {
                debug!("vsync timestamp {t} not after {last}, rejected");
                return false;
            }
        }

        if self.timestamps.len() == HISTORY_SIZE {
            self.timestamps.pop_front();
        }
        self.timestamps.push_back(t);
        self.last_known = Some(t);

        if self.timestamps.len() < MIN_SAMPLES_FOR_PREDICTION {
            // Not enough data: slide the seed model's phase along instead.
            self.model.phase = t;
            return true;
        }

        if let Some(model) = self.fit() {
            trace!(
                "vsync model updated: period={} phase={}",
                model.period,
                model.phase
            );
            self.model = model;
        }
        true
    }

    /// Least-squares fit over the current window, with the worst residuals
    /// discarded first. Returns `None` when the fit is degenerate or lands
    /// outside the plausible period range.
    fn fit(&self) -> Option<Model> {
        let base = *self.timestamps.front()?;

        // Ordinal step from the median inter-sample gap. The model period
        // would alias badly right after a large rate change; the median gap
        // tracks whatever cadence the samples actually arrive at.
        let mut gaps: Vec<i64> = self
            .timestamps
            .iter()
            .zip(self.timestamps.iter().skip(1))
            .map(|(a, b)| b - a)
            .collect();
        gaps.sort_unstable();
        let step = gaps[gaps.len() / 2] as f64;

        let mut points: Vec<(f64, f64)> = self
            .timestamps
            .iter()
            .map(|&t| {
                let rel = (t - base) as f64;
                let ordinal = (rel / step).round();
                (ordinal, rel)
            })
            .collect();

        let first = Self::least_squares(&points)?;

        // Drop the worst residuals, but never below the prediction floor.
        let discard = (points.len() * DISCARD_OUTLIER_PERCENT / 100)
            .min(points.len() - MIN_SAMPLES_FOR_PREDICTION);
        if discard > 0 {
            points.sort_by(|a, b| {
                let ra = (a.1 - (first.1 + first.0 * a.0)).abs();
                let rb = (b.1 - (first.1 + first.0 * b.0)).abs();
                ra.total_cmp(&rb)
            });
            points.truncate(points.len() - discard);
        }

        let (slope, intercept) = if discard > 0 {
            Self::least_squares(&points)?
        } else {
            first
        };

        let min_period = self.ideal_period as f64 * 0.5;
        let max_period = self.ideal_period as f64 * 2.0;
        if !(min_period..=max_period).contains(&slope) {
            debug!("vsync fit period {slope:.0} outside [{min_period:.0}, {max_period:.0}]");
            return None;
        }

        #[expect(
            clippy::cast_possible_truncation,
            reason = "slope is bounded by 2x the ideal period, intercept by the window span"
        )]
        let model = Model {
            period: slope.round() as i64,
            phase: base + intercept.round() as i64,
        };
        Some(model)
    }

    fn least_squares(points: &[(f64, f64)]) -> Option<(f64, f64)> {
        let n = points.len() as f64;
        let sum_k: f64 = points.iter().map(|p| p.0).sum();
        let sum_t: f64 = points.iter().map(|p| p.1).sum();
        let sum_kk: f64 = points.iter().map(|p| p.0 * p.0).sum();
        let sum_kt: f64 = points.iter().map(|p| p.0 * p.1).sum();

        let denom = n * sum_kk - sum_k * sum_k;
        if denom.abs() < f64::EPSILON {
            return None;
        }
        let slope = (n * sum_kt - sum_k * sum_t) / denom;
        let intercept = (sum_t - slope * sum_k) / n;
        Some((slope, intercept))
    }

    /// Returns the smallest predicted vsync instant at or after `from`.
    #[must_use]
    pub fn next_anticipated_vsync_from(&self, from: Timestamp) -> Timestamp {
        let Model { period, phase } = self.model;
        let delta = from.nanos() - phase;
        let mut k = delta.div_euclid(period);
        if phase + k * period < from.nanos() {
            k += 1;
        }
        Timestamp::from_nanos(phase + k * period)
    }

    /// Whether `t` lands on the sub-harmonic grid for `fps`.
    ///
    /// The divider is `round(display_fps / fps)`; dividers of 0 or 1 mean
    /// every vsync is in phase.
    #[must_use]
    pub fn is_vsync_in_phase(&self, t: Timestamp, fps: Fps) -> bool {
        let Model { period, phase } = self.model;
        let display_fps = Fps::from_period(Duration::from_nanos(period));
        let divider = frame_rate_divider(display_fps, fps);
        if divider <= 1 {
            return true;
        }

        let delta = t.nanos() - phase;
        #[expect(
            clippy::cast_possible_truncation,
            reason = "vsync ordinals within the prediction horizon are small"
        )]
        let ordinal = (delta as f64 / period as f64).round() as i64;
        ordinal.rem_euclid(divider) == 0
    }

    /// The current period estimate.
    #[must_use]
    pub fn current_period(&self) -> Duration {
        Duration::from_nanos(self.model.period)
    }

    /// Whether the window is still below the prediction floor.
    #[must_use]
    pub fn needs_more_samples(&self) -> bool {
        self.timestamps.len() < MIN_SAMPLES_FOR_PREDICTION
    }

    /// Retargets the tracker at a new nominal period, forgetting samples
    /// learned at the old rate.
    pub fn set_period(&mut self, period: Duration) {
        assert!(
            period.is_positive(),
            "vsync period must be positive, got {period:?}"
        );
        self.ideal_period = period.nanos();
        self.timestamps.clear();
        self.model = Model {
            period: period.nanos(),
            phase: self.last_known.unwrap_or(0),
        };
    }

    /// Forgets all samples; predictions fall back to the ideal period,
    /// anchored at the last known timestamp.
    pub fn reset_model(&mut self) {
        self.timestamps.clear();
        self.model = Model {
            period: self.ideal_period,
            phase: self.last_known.unwrap_or(0),
        };
    }

    /// One-line state summary for diagnostics.
    #[must_use]
    pub fn dump(&self) -> String {
        format!(
            "period={}ns phase={}ns samples={}",
            self.model.period,
            self.model.phase,
            self.timestamps.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDEAL_60: Duration = Duration::from_nanos(16_666_667);

    fn ms(v: f64) -> Timestamp {
        #[expect(clippy::cast_possible_truncation, reason = "test values are small")]
        let nanos = (v * 1e6) as i64;
        Timestamp::from_nanos(nanos)
    }

    #[test]
    fn converges_on_sixty_hertz_samples() {
        let mut tracker = VsyncTracker::new(IDEAL_60);
        for v in [0.0, 16.6, 33.3, 49.9, 66.5, 83.2] {
            assert!(tracker.add_timestamp(ms(v)));
        }

        let period = tracker.current_period().nanos();
        assert!(
            (16_600_000..=16_800_000).contains(&period),
            "period {period} outside [16.6ms, 16.8ms]"
        );

        // Next vsync after the last sample lands one fitted period later.
        let next = tracker.next_anticipated_vsync_from(ms(90.0)).nanos();
        assert!(
            (99_800_000..=100_200_000).contains(&next),
            "next vsync {next} outside [99.8ms, 100.2ms]"
        );
        assert!(!tracker.needs_more_samples());
    }

    #[test]
    fn converges_within_one_percent() {
        let mut tracker = VsyncTracker::new(IDEAL_60);
        let true_period = 11_111_111_i64; // 90 Hz
        for k in 0..12 {
            tracker.add_timestamp(Timestamp::from_nanos(1_000_000 + k * true_period));
        }
        let fitted = tracker.current_period().nanos();
        let err = (fitted - true_period).abs() as f64 / true_period as f64;
        assert!(err < 0.01, "period {fitted} off by {err:.4}");
    }

    #[test]
    fn falls_back_to_ideal_until_enough_samples() {
        let mut tracker = VsyncTracker::new(IDEAL_60);
        for k in 0..5 {
            tracker.add_timestamp(Timestamp::from_nanos(k * 11_111_111));
        }
        assert!(tracker.needs_more_samples());
        assert_eq!(tracker.current_period(), IDEAL_60);

        // Predictions are seeded off the latest sample.
        let next = tracker.next_anticipated_vsync_from(Timestamp::from_nanos(44_444_444 + 1));
        assert_eq!(next.nanos(), 44_444_444 + IDEAL_60.nanos());
    }

    #[test]
    fn rejects_duplicates_and_backward_jumps() {
        let mut tracker = VsyncTracker::new(IDEAL_60);
        assert!(tracker.add_timestamp(ms(16.6)));
        assert!(!tracker.add_timestamp(ms(16.6)));
        assert!(!tracker.add_timestamp(ms(10.0)));
        assert!(tracker.add_timestamp(ms(33.2)));
    }

    #[test]
    fn single_outlier_does_not_skew_the_fit() {
        let mut tracker = VsyncTracker::new(IDEAL_60);
        let period = 16_666_667_i64;
        for k in 0..10 {
            let jitter = if k == 7 { 6_000_000 } else { 0 };
            tracker.add_timestamp(Timestamp::from_nanos(k * period + jitter));
        }
        let fitted = tracker.current_period().nanos();
        let err = (fitted - period).abs() as f64 / period as f64;
        assert!(err < 0.01, "outlier skewed period to {fitted}");
    }

    #[test]
    fn wild_fit_keeps_previous_model() {
        let mut tracker = VsyncTracker::new(IDEAL_60);
        // Samples spaced at 5x the ideal period: the fitted "period" would be
        // far outside the acceptance window, so the seed must survive.
        for k in 0..8 {
            tracker.add_timestamp(Timestamp::from_nanos(k * 83_333_335));
        }
        assert_eq!(tracker.current_period(), IDEAL_60);
    }

    #[test]
    fn in_phase_respects_divider() {
        let mut tracker = VsyncTracker::new(IDEAL_60);
        let period = 16_666_667_i64;
        for k in 0..8 {
            tracker.add_timestamp(Timestamp::from_nanos(k * period));
        }

        // 30 Hz on a 60 Hz display: every other vsync.
        let thirty = Fps::from_hz(30.0);
        let phase_ok = tracker.is_vsync_in_phase(Timestamp::from_nanos(8 * period), thirty);
        let phase_next = tracker.is_vsync_in_phase(Timestamp::from_nanos(9 * period), thirty);
        assert_ne!(phase_ok, phase_next, "adjacent vsyncs must alternate at 30Hz");

        // Full-rate clients are never filtered.
        assert!(tracker.is_vsync_in_phase(Timestamp::from_nanos(9 * period), Fps::from_hz(60.0)));
        // Rates that do not divide the display rate are never filtered.
        assert!(tracker.is_vsync_in_phase(Timestamp::from_nanos(9 * period), Fps::from_hz(45.0)));
    }

    #[test]
    fn set_period_reseeds_the_model() {
        let mut tracker = VsyncTracker::new(IDEAL_60);
        let period = 16_666_667_i64;
        for k in 0..8 {
            tracker.add_timestamp(Timestamp::from_nanos(k * period));
        }

        let ninety = Duration::from_nanos(11_111_111);
        tracker.set_period(ninety);
        assert_eq!(tracker.current_period(), ninety);
        assert!(tracker.needs_more_samples());

        // New samples at the new rate are accepted by the widened window.
        let base = 8 * period;
        for k in 0..8 {
            tracker.add_timestamp(Timestamp::from_nanos(base + k * 11_111_111));
        }
        let fitted = tracker.current_period().nanos();
        assert!((fitted - 11_111_111).abs() < 120_000, "fitted {fitted}");
    }

    #[test]
    fn reset_model_returns_to_seed() {
        let mut tracker = VsyncTracker::new(IDEAL_60);
        for k in 0..8 {
            tracker.add_timestamp(Timestamp::from_nanos(k * 11_111_111));
        }
        assert_ne!(tracker.current_period(), IDEAL_60);

        tracker.reset_model();
        assert_eq!(tracker.current_period(), IDEAL_60);
        assert!(tracker.needs_more_samples());
    }
}
