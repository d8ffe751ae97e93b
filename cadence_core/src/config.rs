// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Process-wide scheduler configuration, read once at startup.

use log::warn;

/// Feature toggles and timer intervals for a [`Scheduler`].
///
/// [`Scheduler`]: crate::scheduler::Scheduler
#[derive(Clone, Copy, Debug, Default)]
pub struct SchedulerConfig {
    /// Use the kernel-driven idle timer variant instead of the user-space
    /// idle callback.
    pub support_kernel_timer: bool,
    /// Let layer content drive refresh-rate votes.
    pub use_content_detection: bool,
    /// Idle inactivity window in milliseconds; 0 disables the timer.
    pub idle_timer_ms: u32,
    /// Touch inactivity window in milliseconds; 0 disables the timer.
    pub touch_timer_ms: u32,
    /// Display-power grace window in milliseconds; 0 disables the timer.
    pub display_power_timer_ms: u32,
    /// Trace a parity bit at every predicted vsync.
    pub show_predicted_vsync: bool,
}

impl SchedulerConfig {
    /// Reads the configuration from the process environment.
    ///
    /// Recognized variables: `CADENCE_KERNEL_IDLE_TIMER`,
    /// `CADENCE_CONTENT_DETECTION`, `CADENCE_IDLE_TIMER_MS`,
    /// `CADENCE_TOUCH_TIMER_MS`, `CADENCE_DISPLAY_POWER_TIMER_MS`,
    /// `CADENCE_SHOW_PREDICTED_VSYNC`, and the debugging override
    /// `CADENCE_DEBUG_IDLE_TIMER_MS` which, when non-zero, replaces the idle
    /// interval.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), with the variable lookup supplied
    /// by the caller.
    #[must_use]
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self {
            support_kernel_timer: flag(&get, "CADENCE_KERNEL_IDLE_TIMER"),
            use_content_detection: flag(&get, "CADENCE_CONTENT_DETECTION"),
            idle_timer_ms: millis(&get, "CADENCE_IDLE_TIMER_MS"),
            touch_timer_ms: millis(&get, "CADENCE_TOUCH_TIMER_MS"),
            display_power_timer_ms: millis(&get, "CADENCE_DISPLAY_POWER_TIMER_MS"),
            show_predicted_vsync: flag(&get, "CADENCE_SHOW_PREDICTED_VSYNC"),
        };
        let debug_idle = millis(&get, "CADENCE_DEBUG_IDLE_TIMER_MS");
        if debug_idle > 0 {
            config.idle_timer_ms = debug_idle;
        }
        config
    }
}

fn flag(get: &impl Fn(&str) -> Option<String>, key: &str) -> bool {
    match get(key).as_deref() {
        None | Some("") => false,
        Some("1" | "true") => true,
        Some("0" | "false") => false,
        Some(other) => {
            warn!("unrecognized value {other:?} for {key}, treating as off");
            false
        }
    }
}

fn millis(get: &impl Fn(&str) -> Option<String>, key: &str) -> u32 {
    let Some(raw) = get(key) else { return 0 };
    match raw.parse() {
        Ok(ms) => ms,
        Err(_) => {
            warn!("unparsable value {raw:?} for {key}, treating as 0");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        move |key| map.get(key).map(|v| (*v).to_owned())
    }

    #[test]
    fn default_is_everything_off() {
        let config = SchedulerConfig::default();
        assert!(!config.support_kernel_timer);
        assert!(!config.use_content_detection);
        assert_eq!(config.idle_timer_ms, 0);
        assert_eq!(config.touch_timer_ms, 0);
        assert_eq!(config.display_power_timer_ms, 0);
        assert!(!config.show_predicted_vsync);
    }

    #[test]
    fn reads_flags_and_intervals() {
        let config = SchedulerConfig::from_lookup(lookup(&[
            ("CADENCE_CONTENT_DETECTION", "1"),
            ("CADENCE_IDLE_TIMER_MS", "4500"),
            ("CADENCE_TOUCH_TIMER_MS", "300"),
            ("CADENCE_SHOW_PREDICTED_VSYNC", "true"),
        ]));
        assert!(config.use_content_detection);
        assert!(!config.support_kernel_timer);
        assert_eq!(config.idle_timer_ms, 4500);
        assert_eq!(config.touch_timer_ms, 300);
        assert_eq!(config.display_power_timer_ms, 0);
        assert!(config.show_predicted_vsync);
    }

    #[test]
    fn debug_override_shadows_idle_interval() {
        let config = SchedulerConfig::from_lookup(lookup(&[
            ("CADENCE_IDLE_TIMER_MS", "4500"),
            ("CADENCE_DEBUG_IDLE_TIMER_MS", "100"),
        ]));
        assert_eq!(config.idle_timer_ms, 100);

        // A zero override leaves the configured interval alone.
        let config = SchedulerConfig::from_lookup(lookup(&[
            ("CADENCE_IDLE_TIMER_MS", "4500"),
            ("CADENCE_DEBUG_IDLE_TIMER_MS", "0"),
        ]));
        assert_eq!(config.idle_timer_ms, 4500);
    }

    #[test]
    fn garbage_values_fall_back_quietly() {
        let config = SchedulerConfig::from_lookup(lookup(&[
            ("CADENCE_IDLE_TIMER_MS", "soon"),
            ("CADENCE_KERNEL_IDLE_TIMER", "maybe"),
        ]));
        assert_eq!(config.idle_timer_ms, 0);
        assert!(!config.support_kernel_timer);
    }
}
