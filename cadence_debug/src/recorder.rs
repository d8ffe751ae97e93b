// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! In-memory capture of a connection's event stream.
//!
//! [`EventRecorder`] implements [`EventSink`] and appends every delivered
//! event as a [`RecordedEvent`]. Attach one to a scheduler connection (e.g.
//! via `create_display_event_connection`) and hand the capture to
//! [`chrome::export`](crate::chrome::export) afterwards.

use cadence_core::rate::{DisplayId, DisplayModeId};
use cadence_core::stream::{EventSink, ModeChangedEvent, VsyncEvent};
use cadence_core::time::{Duration, Timestamp};
use cadence_core::FrameRateOverride;

/// One captured event.
#[derive(Clone, Debug)]
pub enum RecordedEvent {
    /// A vsync delivery.
    Vsync {
        /// When the event was generated.
        timestamp: Timestamp,
        /// The vsync instant the client aims at.
        expected_vsync: Timestamp,
        /// The frame deadline.
        deadline: Timestamp,
        /// The delivery period for this client.
        vsync_period: Duration,
    },
    /// A refresh-mode change.
    ModeChanged {
        /// Which display changed.
        display_id: DisplayId,
        /// The adopted mode.
        mode_id: DisplayModeId,
        /// The adopted mode's period.
        vsync_period: Duration,
    },
    /// The effective override set changed.
    FrameRateOverrides {
        /// Which display the set applies to.
        display_id: DisplayId,
        /// (uid, Hz) pairs of the new set.
        overrides: Vec<(u32, f32)>,
    },
    /// Display connected or disconnected.
    Hotplug {
        /// Which display.
        display_id: DisplayId,
        /// Connected or gone.
        connected: bool,
    },
}

/// An [`EventSink`] that captures everything it sees.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Vec<RecordedEvent>,
}

impl EventRecorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The capture so far.
    #[must_use]
    pub fn events(&self) -> &[RecordedEvent] {
        &self.events
    }

    /// Consumes the recorder and returns the capture.
    #[must_use]
    pub fn into_events(self) -> Vec<RecordedEvent> {
        self.events
    }
}

impl EventSink for EventRecorder {
    fn on_vsync(&mut self, event: &VsyncEvent) {
        self.events.push(RecordedEvent::Vsync {
            timestamp: event.timestamp,
            expected_vsync: event.expected_vsync,
            deadline: event.deadline,
            vsync_period: event.vsync_period,
        });
    }

    fn on_hotplug(&mut self, display_id: DisplayId, connected: bool) {
        self.events.push(RecordedEvent::Hotplug {
            display_id,
            connected,
        });
    }

    fn on_mode_changed(&mut self, event: &ModeChangedEvent) {
        self.events.push(RecordedEvent::ModeChanged {
            display_id: event.display_id,
            mode_id: event.mode_id,
            vsync_period: event.vsync_period,
        });
    }

    fn on_frame_rate_overrides(&mut self, display_id: DisplayId, overrides: &[FrameRateOverride]) {
        self.events.push(RecordedEvent::FrameRateOverrides {
            display_id,
            overrides: overrides.iter().map(|o| (o.uid, o.fps_hz)).collect(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_delivery_order() {
        let mut recorder = EventRecorder::new();
        recorder.on_hotplug(DisplayId(0), true);
        recorder.on_vsync(&VsyncEvent {
            timestamp: Timestamp::from_nanos(1_000),
            expected_vsync: Timestamp::from_nanos(17_000),
            deadline: Timestamp::from_nanos(12_000),
            vsync_period: Duration::from_nanos(16_666_667),
        });
        recorder.on_mode_changed(&ModeChangedEvent {
            display_id: DisplayId(0),
            mode_id: DisplayModeId(2),
            vsync_period: Duration::from_nanos(11_111_111),
        });
        recorder.on_frame_rate_overrides(
            DisplayId(0),
            &[FrameRateOverride {
                uid: 42,
                fps_hz: 30.0,
            }],
        );

        let events = recorder.into_events();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], RecordedEvent::Hotplug { connected: true, .. }));
        assert!(
            matches!(events[1], RecordedEvent::Vsync { expected_vsync, .. }
                if expected_vsync.nanos() == 17_000)
        );
        assert!(
            matches!(events[2], RecordedEvent::ModeChanged { mode_id, .. }
                if mode_id == DisplayModeId(2))
        );
        assert!(
            matches!(&events[3], RecordedEvent::FrameRateOverrides { overrides, .. }
                if overrides == &[(42, 30.0)])
        );
    }
}
