// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-connection fan-out of display events.
//!
//! An [`EventStream`] couples one [`VsyncSource`] to any number of
//! [`EventConnection`]s. Vsync ticks are delivered only while the display is
//! hot-plugged and the screen acquired, only to connections that asked for
//! the next vsync, and only when the per-application throttle agrees that the
//! tick is in phase for that connection's uid. A throttled request stays
//! pending and is satisfied by the next in-phase tick.
//!
//! The transport to actual client processes is not this module's business;
//! events terminate in an [`EventSink`], which follows the
//! all-methods-default-to-no-ops pattern so consumers implement only what
//! they care about.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use log::trace;
use parking_lot::Mutex;

use crate::overrides::{FrameRateOverride, Uid};
use crate::rate::{DisplayId, DisplayModeId};
use crate::source::{SourceVsync, VsyncSource};
use crate::time::{Duration, Timestamp};

/// Fallback vsync period reported when no per-uid period function is
/// installed (e.g. on the injector stream).
const FALLBACK_VSYNC_PERIOD: Duration = Duration::from_nanos(16_666_667);

/// A vsync delivery to one connection.
#[derive(Clone, Copy, Debug)]
pub struct VsyncEvent {
    /// When the event was generated.
    pub timestamp: Timestamp,
    /// The vsync instant the client should aim at.
    pub expected_vsync: Timestamp,
    /// When the client's frame must be ready.
    pub deadline: Timestamp,
    /// The delivery period for this client (a sub-harmonic of the display
    /// period when an override is active).
    pub vsync_period: Duration,
}

/// A display mode change notification.
#[derive(Clone, Copy, Debug)]
pub struct ModeChangedEvent {
    /// Which display changed.
    pub display_id: DisplayId,
    /// The adopted mode.
    pub mode_id: DisplayModeId,
    /// The adopted mode's vsync period.
    pub vsync_period: Duration,
}

/// Receives the events of one connection. All methods default to no-ops.
pub trait EventSink: Send {
    /// A vsync tick for this connection.
    fn on_vsync(&mut self, event: &VsyncEvent) {
        _ = event;
    }

    /// Display connected or disconnected.
    fn on_hotplug(&mut self, display_id: DisplayId, connected: bool) {
        _ = (display_id, connected);
    }

    /// The display adopted a new mode.
    fn on_mode_changed(&mut self, event: &ModeChangedEvent) {
        _ = event;
    }

    /// The effective per-application override set changed.
    fn on_frame_rate_overrides(&mut self, display_id: DisplayId, overrides: &[FrameRateOverride]) {
        _ = (display_id, overrides);
    }
}

/// An [`EventSink`] that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {}

/// Decides whether a vsync at the given instant must be suppressed for a uid.
pub type ThrottleVsyncFn = Box<dyn Fn(Timestamp, Uid) -> bool + Send + Sync>;
/// Reports the delivery period for a uid.
pub type VsyncPeriodFn = Box<dyn Fn(Uid) -> Duration + Send + Sync>;
/// Observes every vsync tick on the stream (tracing, frame bookkeeping).
pub type InterceptVsyncFn = Box<dyn Fn(Timestamp) + Send + Sync>;
/// Invoked when a connection requests its next vsync.
pub type ResyncFn = Box<dyn Fn() + Send + Sync>;

struct StreamState {
    hotplugged: bool,
    screen_acquired: bool,
    connections: Vec<Arc<EventConnection>>,
}

struct StreamInner {
    name: String,
    source: Mutex<Box<dyn VsyncSource>>,
    throttle_vsync: Option<ThrottleVsyncFn>,
    vsync_period_for: Option<VsyncPeriodFn>,
    intercept_vsync: Option<InterceptVsyncFn>,
    state: Mutex<StreamState>,
}

/// One source's worth of event fan-out.
#[derive(Clone)]
pub struct EventStream {
    inner: Arc<StreamInner>,
}

/// One client's subscription on a stream.
pub struct EventConnection {
    stream: Weak<StreamInner>,
    uid: Uid,
    sink: Mutex<Box<dyn EventSink>>,
    vsync_requested: AtomicBool,
    resync: ResyncFn,
}

impl EventConnection {
    /// The application this connection belongs to.
    #[must_use]
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Asks for one vsync delivery. Fires the resync hook and turns the
    /// stream's source on.
    pub fn request_next_vsync(&self) {
        (self.resync)();
        self.vsync_requested.store(true, Ordering::Release);
        if let Some(stream) = self.stream.upgrade() {
            stream.source.lock().set_vsync_enabled(true);
        }
    }
}

impl EventStream {
    /// Creates a stream over `source` and wires the source's callback to it.
    #[must_use]
    pub fn new(
        mut source: Box<dyn VsyncSource>,
        throttle_vsync: Option<ThrottleVsyncFn>,
        vsync_period_for: Option<VsyncPeriodFn>,
        intercept_vsync: Option<InterceptVsyncFn>,
    ) -> Self {
        let name = source.name().to_owned();
        let inner = Arc::new_cyclic(|weak: &Weak<StreamInner>| {
            let hook = weak.clone();
            source.set_callback(Box::new(move |v| {
                if let Some(inner) = hook.upgrade() {
                    inner.on_source_vsync(v);
                }
            }));
            StreamInner {
                name,
                source: Mutex::new(source),
                throttle_vsync,
                vsync_period_for,
                intercept_vsync,
                state: Mutex::new(StreamState {
                    hotplugged: false,
                    screen_acquired: false,
                    connections: Vec::new(),
                }),
            }
        });
        Self { inner }
    }

    /// Diagnostic name (the source's name).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Adds a connection delivering into `sink`, with `resync` fired on each
    /// vsync request.
    pub fn create_connection(
        &self,
        uid: Uid,
        sink: Box<dyn EventSink>,
        resync: ResyncFn,
    ) -> Arc<EventConnection> {
        let connection = Arc::new(EventConnection {
            stream: Arc::downgrade(&self.inner),
            uid,
            sink: Mutex::new(sink),
            vsync_requested: AtomicBool::new(false),
            resync,
        });
        self.inner
            .state
            .lock()
            .connections
            .push(Arc::clone(&connection));
        connection
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    /// Records display hot-plug state and notifies sinks.
    pub fn on_hotplug(&self, display_id: DisplayId, connected: bool) {
        let connections = {
            let mut state = self.inner.state.lock();
            state.hotplugged = connected;
            state.connections.clone()
        };
        for conn in connections {
            conn.sink.lock().on_hotplug(display_id, connected);
        }
    }

    /// Resumes vsync delivery after the screen is acquired.
    pub fn on_screen_acquired(&self) {
        let pending = {
            let mut state = self.inner.state.lock();
            state.screen_acquired = true;
            state
                .connections
                .iter()
                .any(|c| c.vsync_requested.load(Ordering::Acquire))
        };
        if pending {
            self.inner.source.lock().set_vsync_enabled(true);
        }
    }

    /// Pauses vsync delivery while the screen is released.
    pub fn on_screen_released(&self) {
        self.inner.state.lock().screen_acquired = false;
    }

    /// Fans a mode change out to every connection.
    pub fn on_mode_changed(&self, event: &ModeChangedEvent) {
        let connections = self.inner.state.lock().connections.clone();
        for conn in connections {
            conn.sink.lock().on_mode_changed(event);
        }
    }

    /// Fans the effective override set out to every connection.
    pub fn on_frame_rate_overrides(&self, display_id: DisplayId, overrides: &[FrameRateOverride]) {
        let connections = self.inner.state.lock().connections.clone();
        for conn in connections {
            conn.sink.lock().on_frame_rate_overrides(display_id, overrides);
        }
    }

    /// Retargets the source's lead times.
    pub fn set_duration(&self, work: Duration, ready: Duration) {
        self.inner.source.lock().set_duration(work, ready);
    }

    /// One-line state summary.
    #[must_use]
    pub fn dump(&self) -> String {
        let state = self.inner.state.lock();
        format!(
            "{}: hotplugged={} screen_acquired={} connections={}",
            self.inner.name,
            state.hotplugged,
            state.screen_acquired,
            state.connections.len()
        )
    }
}

impl StreamInner {
    fn on_source_vsync(&self, v: SourceVsync) {
        if let Some(intercept) = &self.intercept_vsync {
            intercept(v.when);
        }

        let (deliveries, still_pending) = {
            let state = self.state.lock();
            if !state.hotplugged || !state.screen_acquired {
                // Requests stay pending until the display can show frames.
                return;
            }

            let mut deliveries = Vec::new();
            let mut still_pending = false;
            for conn in &state.connections {
                if !conn.vsync_requested.load(Ordering::Acquire) {
                    continue;
                }
                if let Some(throttle) = &self.throttle_vsync {
                    if throttle(v.expected_vsync, conn.uid) {
                        trace!(
                            "{}: vsync at {} throttled for uid {}",
                            self.name,
                            v.expected_vsync.nanos(),
                            conn.uid
                        );
                        still_pending = true;
                        continue;
                    }
                }
                conn.vsync_requested.store(false, Ordering::Release);
                deliveries.push(Arc::clone(conn));
            }
            (deliveries, still_pending)
        };

        for conn in &deliveries {
            let period = self
                .vsync_period_for
                .as_ref()
                .map_or(FALLBACK_VSYNC_PERIOD, |f| f(conn.uid));
            conn.sink.lock().on_vsync(&VsyncEvent {
                timestamp: v.when,
                expected_vsync: v.expected_vsync,
                deadline: v.deadline,
                vsync_period: period,
            });
        }

        if !still_pending {
            let any_requested = self
                .state
                .lock()
                .connections
                .iter()
                .any(|c| c.vsync_requested.load(Ordering::Acquire));
            if !any_requested {
                self.source.lock().set_vsync_enabled(false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::source::InjectVsyncSource;

    struct RecordingSink {
        tx: mpsc::Sender<SinkEvent>,
    }

    #[derive(Debug)]
    enum SinkEvent {
        Vsync(VsyncEvent),
        Hotplug(bool),
        ModeChanged(DisplayModeId),
        Overrides(usize),
    }

    impl EventSink for RecordingSink {
        fn on_vsync(&mut self, event: &VsyncEvent) {
            let _ = self.tx.send(SinkEvent::Vsync(*event));
        }

        fn on_hotplug(&mut self, _display_id: DisplayId, connected: bool) {
            let _ = self.tx.send(SinkEvent::Hotplug(connected));
        }

        fn on_mode_changed(&mut self, event: &ModeChangedEvent) {
            let _ = self.tx.send(SinkEvent::ModeChanged(event.mode_id));
        }

        fn on_frame_rate_overrides(
            &mut self,
            _display_id: DisplayId,
            overrides: &[FrameRateOverride],
        ) {
            let _ = self.tx.send(SinkEvent::Overrides(overrides.len()));
        }
    }

    fn injected_stream(
        throttle: Option<ThrottleVsyncFn>,
    ) -> (EventStream, crate::source::VsyncInjector) {
        let (source, injector) = InjectVsyncSource::new("test-stream");
        let stream = EventStream::new(Box::new(source), throttle, None, None);
        (stream, injector)
    }

    fn live_stream(
        throttle: Option<ThrottleVsyncFn>,
    ) -> (
        EventStream,
        crate::source::VsyncInjector,
        Arc<EventConnection>,
        mpsc::Receiver<SinkEvent>,
    ) {
        let (stream, injector) = injected_stream(throttle);
        stream.on_hotplug(DisplayId(0), true);
        stream.on_screen_acquired();
        let (tx, rx) = mpsc::channel();
        let conn = stream.create_connection(0, Box::new(RecordingSink { tx }), Box::new(|| {}));
        (stream, injector, conn, rx)
    }

    fn inject(injector: &crate::source::VsyncInjector, at: i64) {
        injector.inject(
            Timestamp::from_nanos(at),
            Timestamp::from_nanos(at + 1_000_000),
            Timestamp::from_nanos(at + 500_000),
        );
    }

    #[test]
    fn vsync_needs_request_and_live_display() {
        let (stream, injector, conn, rx) = live_stream(None);

        // No request yet: nothing delivered.
        inject(&injector, 1_000);
        assert!(rx.try_recv().is_err());

        conn.request_next_vsync();
        inject(&injector, 2_000);
        assert!(matches!(rx.try_recv(), Ok(SinkEvent::Vsync(_))));

        // One-shot: the next tick is not delivered without a new request.
        inject(&injector, 3_000);
        assert!(rx.try_recv().is_err());

        // Screen released: requests stay pending.
        conn.request_next_vsync();
        stream.on_screen_released();
        inject(&injector, 4_000);
        assert!(rx.try_recv().is_err());

        // Re-acquired: the pending request is served by the next tick.
        stream.on_screen_acquired();
        inject(&injector, 5_000);
        assert!(matches!(rx.try_recv(), Ok(SinkEvent::Vsync(_))));
    }

    #[test]
    fn throttled_request_stays_pending() {
        // Suppress every vsync before 10ms, pass the rest.
        let throttle: ThrottleVsyncFn =
            Box::new(|expected, _uid| expected.nanos() < 10_000_000);
        let (_stream, injector, conn, rx) = live_stream(Some(throttle));

        conn.request_next_vsync();
        inject(&injector, 1_000);
        assert!(rx.try_recv().is_err(), "out-of-phase vsync must be suppressed");

        inject(&injector, 20_000_000);
        assert!(
            matches!(rx.try_recv(), Ok(SinkEvent::Vsync(_))),
            "pending request must be served by the next in-phase vsync"
        );
    }

    #[test]
    fn mode_and_override_events_reach_every_connection() {
        let (stream, _injector, _conn, rx) = live_stream(None);

        stream.on_mode_changed(&ModeChangedEvent {
            display_id: DisplayId(0),
            mode_id: DisplayModeId(3),
            vsync_period: Duration::from_nanos(8_333_333),
        });
        assert!(matches!(rx.try_recv(), Ok(SinkEvent::ModeChanged(DisplayModeId(3)))));

        stream.on_frame_rate_overrides(
            DisplayId(0),
            &[FrameRateOverride {
                uid: 1,
                fps_hz: 30.0,
            }],
        );
        assert!(matches!(rx.try_recv(), Ok(SinkEvent::Overrides(1))));

        stream.on_hotplug(DisplayId(0), false);
        assert!(matches!(rx.try_recv(), Ok(SinkEvent::Hotplug(false))));
    }

    #[test]
    fn fallback_period_without_period_function() {
        let (_stream, injector, conn, rx) = live_stream(None);
        conn.request_next_vsync();
        inject(&injector, 1_000);
        match rx.try_recv() {
            Ok(SinkEvent::Vsync(v)) => assert_eq!(v.vsync_period, FALLBACK_VSYNC_PERIOD),
            other => panic!("expected vsync, got {other:?}"),
        }
    }

    #[test]
    fn connection_count_tracks_subscriptions() {
        let (stream, _injector) = injected_stream(None);
        assert_eq!(stream.connection_count(), 0);
        let _a = stream.create_connection(1, Box::new(NoopSink), Box::new(|| {}));
        let _b = stream.create_connection(2, Box::new(NoopSink), Box::new(|| {}));
        assert_eq!(stream.connection_count(), 2);
    }
}
