// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-application frame-rate overrides.
//!
//! Overrides live in two tiers: an administrative backdoor map and a map
//! derived from content analysis. A backdoor entry always shadows a content
//! entry for the same application. The presence of an entry in either map is
//! a throttling directive: vsync delivery for that application is restricted
//! to the sub-harmonic matching its override.

use std::collections::BTreeMap;
use std::fmt::Write;

use log::warn;

use crate::rate::Fps;

/// Identifies an application for override and throttling purposes.
pub type Uid = u32;

/// A request to cap (or uncap) one application's frame rate.
///
/// `fps_hz == 0` erases the override. Values in the open interval (0, 1) are
/// invalid and silently dropped.
#[derive(Clone, Copy, Debug)]
pub struct FrameRateOverride {
    /// The application the override applies to.
    pub uid: Uid,
    /// The requested rate in Hz, or 0 to erase.
    pub fps_hz: f32,
}

/// The two-tier override store.
#[derive(Default)]
pub(crate) struct OverrideState {
    backdoor: BTreeMap<Uid, Fps>,
    by_content: BTreeMap<Uid, Fps>,
}

impl OverrideState {
    /// The effective override for `uid`: backdoor first, then content.
    pub(crate) fn get(&self, uid: Uid) -> Option<Fps> {
        self.backdoor
            .get(&uid)
            .or_else(|| self.by_content.get(&uid))
            .copied()
    }

    /// Installs or erases a backdoor override.
    pub(crate) fn set_backdoor(&mut self, request: FrameRateOverride) {
        if request.fps_hz > 0.0 && request.fps_hz < 1.0 {
            warn!(
                "ignoring invalid frame rate override of {} for uid {}",
                request.fps_hz, request.uid
            );
            return;
        }
        if request.fps_hz == 0.0 {
            self.backdoor.remove(&request.uid);
        } else {
            self.backdoor.insert(request.uid, Fps::from_hz(request.fps_hz));
        }
    }

    /// Replaces the content-derived map. Returns whether anything changed
    /// under margin comparison of the rates.
    pub(crate) fn replace_by_content(&mut self, new: Vec<(Uid, Fps)>) -> bool {
        let new: BTreeMap<Uid, Fps> = new.into_iter().collect();
        let unchanged = new.len() == self.by_content.len()
            && new
                .iter()
                .zip(self.by_content.iter())
                .all(|((ua, fa), (ub, fb))| ua == ub && fa.equals_with_margin(*fb));
        if unchanged {
            return false;
        }
        self.by_content = new;
        true
    }

    /// A snapshot of every effective override, backdoor entries shadowing
    /// content entries.
    pub(crate) fn merged(&self) -> Vec<FrameRateOverride> {
        let mut out: Vec<FrameRateOverride> = self
            .backdoor
            .iter()
            .map(|(&uid, fps)| FrameRateOverride {
                uid,
                fps_hz: fps.hz(),
            })
            .collect();
        out.extend(
            self.by_content
                .iter()
                .filter(|(uid, _)| !self.backdoor.contains_key(uid))
                .map(|(&uid, fps)| FrameRateOverride {
                    uid,
                    fps_hz: fps.hz(),
                }),
        );
        out
    }

    /// Appends both maps to a dump buffer.
    pub(crate) fn dump(&self, out: &mut String) {
        let _ = write!(out, "Frame rate overrides (backdoor): {{");
        for (uid, fps) in &self.backdoor {
            let _ = write!(out, "[uid: {uid} rate: {fps}], ");
        }
        let _ = writeln!(out, "}}");

        let _ = write!(out, "Frame rate overrides (content): {{");
        for (uid, fps) in &self.by_content {
            let _ = write!(out, "[uid: {uid} rate: {fps}], ");
        }
        let _ = writeln!(out, "}}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backdoor_shadows_content() {
        let mut state = OverrideState::default();
        state.set_backdoor(FrameRateOverride {
            uid: 42,
            fps_hz: 30.0,
        });
        state.replace_by_content(vec![(42, Fps::from_hz(45.0))]);

        assert!(state.get(42).unwrap().equals_with_margin(Fps::from_hz(30.0)));

        // Erasing the backdoor exposes the content override.
        state.set_backdoor(FrameRateOverride { uid: 42, fps_hz: 0.0 });
        assert!(state.get(42).unwrap().equals_with_margin(Fps::from_hz(45.0)));
    }

    #[test]
    fn fractional_override_is_dropped() {
        let mut state = OverrideState::default();
        state.set_backdoor(FrameRateOverride {
            uid: 7,
            fps_hz: 0.5,
        });
        assert!(state.get(7).is_none());
    }

    #[test]
    fn erase_of_absent_override_is_harmless() {
        let mut state = OverrideState::default();
        state.set_backdoor(FrameRateOverride { uid: 9, fps_hz: 0.0 });
        assert!(state.get(9).is_none());
    }

    #[test]
    fn content_replacement_reports_change() {
        let mut state = OverrideState::default();
        assert!(state.replace_by_content(vec![(1, Fps::from_hz(30.0))]));
        // Same map within margin: no change.
        assert!(!state.replace_by_content(vec![(1, Fps::from_hz(30.0004))]));
        // Different rate: change.
        assert!(state.replace_by_content(vec![(1, Fps::from_hz(60.0))]));
        // Different key set: change.
        assert!(state.replace_by_content(vec![(2, Fps::from_hz(60.0))]));
    }

    #[test]
    fn merged_snapshot_prefers_backdoor() {
        let mut state = OverrideState::default();
        state.set_backdoor(FrameRateOverride {
            uid: 1,
            fps_hz: 30.0,
        });
        state.replace_by_content(vec![(1, Fps::from_hz(60.0)), (2, Fps::from_hz(45.0))]);

        let merged = state.merged();
        assert_eq!(merged.len(), 2);
        let one = merged.iter().find(|o| o.uid == 1).unwrap();
        let two = merged.iter().find(|o| o.uid == 2).unwrap();
        assert!((one.fps_hz - 30.0).abs() < 0.001);
        assert!((two.fps_hz - 45.0).abs() < 0.001);
    }
}
