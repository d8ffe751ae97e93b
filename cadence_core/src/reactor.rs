// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deciding whether hardware vsync interrupts are still needed.
//!
//! [`VsyncReactor`] sits between the host's vsync/fence feeds and the
//! [`VsyncTracker`](crate::tracker::VsyncTracker). Hardware vsync timestamps
//! and presentation-fence signal times are both evidence about where real
//! vsyncs fall; once the tracker's model is confident, the reactor reports
//! that hardware vsync interrupts can be turned off, and fence arrivals keep
//! validating the model from then on.
//!
//! The reactor also mediates period transitions: after
//! [`start_period_transition`](VsyncReactor::start_period_transition) it
//! withholds confidence until a hardware sample is consistent with the target
//! period (directly via the composer-reported period, or via the spacing
//! between consecutive samples), then flushes the new period into the
//! tracker.
//!
//! The reactor never toggles hardware vsync itself; it only reports intent
//! and the scheduler acts on it.

use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use crate::time::{Duration, Timestamp};
use crate::tracker::VsyncTracker;

/// Upper bound on remembered not-yet-signaled presentation fences.
const PENDING_FENCE_LIMIT: usize = 20;

/// What a presentation fence currently knows about its signal time.
#[derive(Clone, Copy, Debug)]
pub enum FenceStatus {
    /// The frame has not been presented yet.
    Pending,
    /// The fence will never produce a usable time.
    Invalid,
    /// The frame was presented at this instant.
    Signaled(Timestamp),
}

/// A handle to a presentation fence.
pub trait PresentFence: Send + Sync {
    /// The fence's signal time, if it has one yet.
    fn signal_time(&self) -> FenceStatus;
}

/// Integrates hardware vsync timestamps and presentation fences.
pub struct VsyncReactor {
    tracker: Arc<Mutex<VsyncTracker>>,
    support_kernel_idle_timer: bool,
    unfired_fences: Vec<Arc<dyn PresentFence>>,
    more_samples_needed: bool,
    period_confirmation_in_progress: bool,
    period_transitioning_to: Option<Duration>,
    last_hw_vsync: Option<Timestamp>,
    external_ignore_fences: bool,
    internal_ignore_fences: bool,
}

impl VsyncReactor {
    /// Creates a reactor feeding the given tracker.
    #[must_use]
    pub fn new(tracker: Arc<Mutex<VsyncTracker>>, support_kernel_idle_timer: bool) -> Self {
        Self {
            tracker,
            support_kernel_idle_timer,
            unfired_fences: Vec::new(),
            more_samples_needed: false,
            period_confirmation_in_progress: false,
            period_transitioning_to: None,
            last_hw_vsync: None,
            external_ignore_fences: false,
            internal_ignore_fences: false,
        }
    }

    /// Feeds a presentation fence. Returns whether hardware vsync is still
    /// needed to (re)build the timing model.
    pub fn add_present_fence(&mut self, fence: Arc<dyn PresentFence>) -> bool {
        if matches!(fence.signal_time(), FenceStatus::Invalid) {
            return true;
        }
        if self.external_ignore_fences || self.internal_ignore_fences {
            return true;
        }

        let mut accepted = true;
        {
            let mut tracker = self.tracker.lock();
            // Fences queued earlier may have signaled since.
            self.unfired_fences.retain(|f| match f.signal_time() {
                FenceStatus::Pending => true,
                FenceStatus::Invalid => false,
                FenceStatus::Signaled(t) => {
                    accepted &= tracker.add_timestamp(t);
                    false
                }
            });

            match fence.signal_time() {
                FenceStatus::Pending => {
                    if self.unfired_fences.len() == PENDING_FENCE_LIMIT {
                        self.unfired_fences.remove(0);
                    }
                    self.unfired_fences.push(fence);
                }
                FenceStatus::Signaled(t) => {
                    accepted &= tracker.add_timestamp(t);
                }
                FenceStatus::Invalid => {}
            }

            self.more_samples_needed = !accepted || tracker.needs_more_samples();
        }
        self.more_samples_needed
    }

    /// Feeds a hardware vsync timestamp, with the composer-reported period if
    /// the host has one. Returns `(needs_more_hw_vsync, period_flushed)`.
    pub fn add_hw_vsync_timestamp(
        &mut self,
        timestamp: Timestamp,
        composer_period: Option<Duration>,
    ) -> (bool, bool) {
        let mut period_flushed = false;

        if self.period_confirmation_in_progress {
            if self.period_confirmed(timestamp, composer_period) {
                let mut tracker = self.tracker.lock();
                if let Some(period) = self.period_transitioning_to {
                    tracker.set_period(period);
                    period_flushed = true;
                }
                if let Some(last) = self.last_hw_vsync {
                    tracker.add_timestamp(last);
                }
                tracker.add_timestamp(timestamp);
                self.more_samples_needed = tracker.needs_more_samples();
                drop(tracker);
                self.end_period_transition();
                self.set_internal_ignore_fences(false);
            } else {
                self.more_samples_needed = true;
                self.last_hw_vsync = Some(timestamp);
            }
        } else {
            let mut tracker = self.tracker.lock();
            if tracker.needs_more_samples() {
                tracker.add_timestamp(timestamp);
                self.more_samples_needed = tracker.needs_more_samples();
            } else {
                self.more_samples_needed = false;
            }
        }

        (self.more_samples_needed, period_flushed)
    }

    /// Begins a period transition toward `period`. Samples arriving from here
    /// on bridge the old and new rates, and present fences are ignored until
    /// the new period is confirmed.
    ///
    /// A "transition" to the current period just revalidates the model, and
    /// without the kernel idle timer there is nothing to revalidate, so it
    /// completes immediately.
    pub fn start_period_transition(&mut self, period: Duration) {
        trace!("period transition toward {period:?}");
        self.last_hw_vsync = None;
        let current = self.tracker.lock().current_period();
        if !self.support_kernel_idle_timer && period == current {
            self.end_period_transition();
            self.set_internal_ignore_fences(false);
            self.more_samples_needed = false;
        } else {
            self.period_confirmation_in_progress = true;
            self.period_transitioning_to = Some(period);
            self.more_samples_needed = true;
            self.set_internal_ignore_fences(true);
        }
    }

    /// Externally suppresses fence-based validation (e.g. while the display
    /// is in a power state with unreliable fences).
    pub fn set_ignore_present_fences(&mut self, ignore: bool) {
        self.external_ignore_fences = ignore;
        self.prune_ignored_fences();
    }

    fn set_internal_ignore_fences(&mut self, ignore: bool) {
        self.internal_ignore_fences = ignore;
        self.prune_ignored_fences();
    }

    fn prune_ignored_fences(&mut self) {
        if self.external_ignore_fences || self.internal_ignore_fences {
            self.unfired_fences.clear();
        }
    }

    fn end_period_transition(&mut self) {
        self.period_confirmation_in_progress = false;
        self.period_transitioning_to = None;
        self.last_hw_vsync = None;
    }

    fn period_confirmed(&self, timestamp: Timestamp, composer_period: Option<Duration>) -> bool {
        let target = self
            .period_transitioning_to
            .unwrap_or_else(|| self.tracker.lock().current_period());

        let period_is_changing = self
            .period_transitioning_to
            .is_some_and(|p| p != self.tracker.lock().current_period());
        let composer_period = if self.support_kernel_idle_timer && !period_is_changing {
            // The kernel timer toggles vsync without changing the rate; the
            // composer period would trivially match, so fall through to the
            // sample-spacing check.
            None
        } else {
            composer_period
        };

        let allowance = target.nanos() / 10;
        if let Some(hwc) = composer_period {
            return (hwc.nanos() - target.nanos()).abs() < allowance;
        }

        let Some(last) = self.last_hw_vsync else {
            return false;
        };
        let distance = (timestamp - last).nanos().rem_euclid(target.nanos());
        distance < allowance || distance > target.nanos() - allowance
    }

    /// One-line state summary for diagnostics.
    #[must_use]
    pub fn dump(&self) -> String {
        format!(
            "more_samples_needed={} transition={:?} pending_fences={} ignore_fences={}/{}",
            self.more_samples_needed,
            self.period_transitioning_to,
            self.unfired_fences.len(),
            self.external_ignore_fences,
            self.internal_ignore_fences,
        )
    }
}
