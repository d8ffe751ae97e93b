// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format exporter.
//!
//! [`export`] turns a capture from [`EventRecorder`](crate::recorder::EventRecorder)
//! into [Chrome Trace Event Format][spec] JSON, loadable in
//! `chrome://tracing` or [Perfetto](https://ui.perfetto.dev/).
//!
//! Vsync deliveries become instant events, mode changes a counter track of
//! the mode id, so the prediction grid and rate switches line up visually.
//!
//! [spec]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use std::io::{self, Write};

use serde_json::{json, Value};

use crate::recorder::RecordedEvent;

/// Exports a capture as a complete JSON array of trace events.
pub fn export(events: &[RecordedEvent], writer: &mut dyn Write) -> io::Result<()> {
    let mut out: Vec<Value> = Vec::with_capacity(events.len());

    for event in events {
        match event {
            RecordedEvent::Vsync {
                timestamp,
                expected_vsync,
                deadline,
                vsync_period,
            } => out.push(json!({
                "ph": "i",
                "name": "Vsync",
                "cat": "Scheduler",
                "ts": nanos_to_us(timestamp.nanos()),
                "pid": 0,
                "tid": 0,
                "s": "g",
                "args": {
                    "expected_vsync_us": nanos_to_us(expected_vsync.nanos()),
                    "deadline_us": nanos_to_us(deadline.nanos()),
                    "vsync_period_ns": vsync_period.nanos(),
                }
            })),
            RecordedEvent::ModeChanged {
                display_id,
                mode_id,
                vsync_period,
            } => out.push(json!({
                "ph": "C",
                "name": "RefreshMode",
                "cat": "Scheduler",
                "ts": 0,
                "pid": display_id.0,
                "args": {
                    "mode": mode_id.0,
                    "vsync_period_ns": vsync_period.nanos(),
                }
            })),
            RecordedEvent::FrameRateOverrides {
                display_id,
                overrides,
            } => out.push(json!({
                "ph": "i",
                "name": "FrameRateOverrides",
                "cat": "Scheduler",
                "ts": 0,
                "pid": display_id.0,
                "tid": 0,
                "s": "g",
                "args": {
                    "count": overrides.len(),
                }
            })),
            RecordedEvent::Hotplug {
                display_id,
                connected,
            } => out.push(json!({
                "ph": "i",
                "name": "Hotplug",
                "cat": "Scheduler",
                "ts": 0,
                "pid": display_id.0,
                "tid": 0,
                "s": "g",
                "args": {
                    "connected": connected,
                }
            })),
        }
    }

    serde_json::to_writer(writer, &out).map_err(io::Error::from)
}

fn nanos_to_us(nanos: i64) -> f64 {
    #[expect(
        clippy::cast_precision_loss,
        reason = "trace viewers take microsecond floats; sub-ns precision is not needed"
    )]
    let us = nanos as f64 / 1_000.0;
    us
}

#[cfg(test)]
mod tests {
    use cadence_core::rate::{DisplayId, DisplayModeId};
    use cadence_core::time::{Duration, Timestamp};

    use super::*;

    #[test]
    fn export_produces_loadable_json() {
        let events = vec![
            RecordedEvent::Vsync {
                timestamp: Timestamp::from_nanos(1_000_000),
                expected_vsync: Timestamp::from_nanos(17_666_667),
                deadline: Timestamp::from_nanos(12_000_000),
                vsync_period: Duration::from_nanos(16_666_667),
            },
            RecordedEvent::ModeChanged {
                display_id: DisplayId(0),
                mode_id: DisplayModeId(2),
                vsync_period: Duration::from_nanos(11_111_111),
            },
        ];

        let mut buf = Vec::new();
        export(&events, &mut buf).unwrap();

        let parsed: Vec<serde_json::Value> = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["name"], "Vsync");
        assert_eq!(parsed[0]["ph"], "i");
        assert!((parsed[0]["ts"].as_f64().unwrap() - 1_000.0).abs() < f64::EPSILON);
        assert_eq!(parsed[1]["name"], "RefreshMode");
        assert_eq!(parsed[1]["args"]["mode"], 2);
    }

    #[test]
    fn empty_capture_exports_an_empty_array() {
        let mut buf = Vec::new();
        export(&[], &mut buf).unwrap();
        assert_eq!(buf, b"[]");
    }
}
