// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Vsync event sources feeding the event streams.
//!
//! A [`VsyncSource`] produces [`SourceVsync`] ticks into a callback while
//! enabled. The production source ([`DispatchVsyncSource`]) is backed by a
//! [`VsyncDispatch`] registration and re-arms itself after every tick; the
//! synthetic source ([`InjectVsyncSource`]) emits whatever the diagnostics
//! path pushes into it.

use std::sync::{Arc, Weak};

use log::trace;
use parking_lot::Mutex;

use crate::dispatch::{
    CallbackToken, DispatchedVsync, ScheduleTiming, VsyncCallbackRegistration, VsyncDispatch,
};
use crate::time::{Duration, Timestamp};

/// One tick produced by a vsync source.
#[derive(Clone, Copy, Debug)]
pub struct SourceVsync {
    /// When the tick was produced (the wakeup instant).
    pub when: Timestamp,
    /// The vsync instant the tick anticipates.
    pub expected_vsync: Timestamp,
    /// The instant the client's frame must be ready by.
    pub deadline: Timestamp,
}

/// Receives ticks from a source.
pub type SourceCallback = Box<dyn FnMut(SourceVsync) + Send>;

/// A producer of vsync ticks.
pub trait VsyncSource: Send {
    /// Diagnostic name.
    fn name(&self) -> &str;

    /// Installs the tick consumer. Replaces any previous one.
    fn set_callback(&mut self, callback: SourceCallback);

    /// Starts or stops tick production.
    fn set_vsync_enabled(&mut self, enabled: bool);

    /// Adjusts the lead times of future ticks.
    fn set_duration(&mut self, work: Duration, ready: Duration);
}

struct SourceState {
    enabled: bool,
    work: Duration,
    ready: Duration,
    last_vsync: Timestamp,
}

struct SourceInner {
    name: String,
    trace_vsync: bool,
    dispatch: Weak<VsyncDispatch>,
    token: Mutex<Option<CallbackToken>>,
    state: Mutex<SourceState>,
    callback: Mutex<Option<SourceCallback>>,
}

impl SourceInner {
    fn on_dispatched(&self, d: DispatchedVsync) {
        if self.trace_vsync {
            trace!("{}: vsync predicted at {}", self.name, d.vsync.nanos());
        }
        self.state.lock().last_vsync = d.vsync;

        if let Some(cb) = self.callback.lock().as_mut() {
            cb(SourceVsync {
                when: d.scheduled_wakeup,
                expected_vsync: d.vsync,
                deadline: d.ready,
            });
        }

        // Re-arm for the next vsync while we stay enabled. The consumer may
        // have disabled us from inside the callback.
        let state = self.state.lock();
        if state.enabled {
            if let (Some(dispatch), Some(token)) = (self.dispatch.upgrade(), *self.token.lock()) {
                dispatch.schedule(
                    token,
                    ScheduleTiming {
                        work_duration: state.work,
                        ready_duration: state.ready,
                        earliest_vsync: d.vsync + Duration::from_nanos(1),
                    },
                );
            }
        }
    }
}

/// The production source: a self-re-arming dispatch registration.
pub struct DispatchVsyncSource {
    inner: Arc<SourceInner>,
    registration: VsyncCallbackRegistration,
}

impl DispatchVsyncSource {
    /// Creates a source named `name` with the given lead times.
    #[must_use]
    pub fn new(
        dispatch: &Arc<VsyncDispatch>,
        name: impl Into<String>,
        work: Duration,
        ready: Duration,
        trace_vsync: bool,
    ) -> Self {
        let name = name.into();
        let inner = Arc::new(SourceInner {
            name: name.clone(),
            trace_vsync,
            dispatch: Arc::downgrade(dispatch),
            token: Mutex::new(None),
            state: Mutex::new(SourceState {
                enabled: false,
                work,
                ready,
                last_vsync: Timestamp::ZERO,
            }),
            callback: Mutex::new(None),
        });

        let hook = Arc::clone(&inner);
        let registration =
            VsyncCallbackRegistration::new(dispatch, name, move |d| hook.on_dispatched(d));
        *inner.token.lock() = Some(registration.token());

        Self {
            inner,
            registration,
        }
    }

    fn timing(state: &SourceState) -> ScheduleTiming {
        ScheduleTiming {
            work_duration: state.work,
            ready_duration: state.ready,
            earliest_vsync: state.last_vsync + Duration::from_nanos(1),
        }
    }
}

impl VsyncSource for DispatchVsyncSource {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn set_callback(&mut self, callback: SourceCallback) {
        *self.inner.callback.lock() = Some(callback);
    }

    fn set_vsync_enabled(&mut self, enabled: bool) {
        let timing = {
            let mut state = self.inner.state.lock();
            if state.enabled == enabled {
                return;
            }
            state.enabled = enabled;
            enabled.then(|| Self::timing(&state))
        };
        match timing {
            Some(timing) => {
                self.registration.schedule(timing);
            }
            None => self.registration.cancel(),
        }
    }

    fn set_duration(&mut self, work: Duration, ready: Duration) {
        let timing = {
            let mut state = self.inner.state.lock();
            state.work = work;
            state.ready = ready;
            state.enabled.then(|| Self::timing(&state))
        };
        if let Some(timing) = timing {
            self.registration.schedule(timing);
        }
    }
}

struct InjectorShared {
    callback: Mutex<Option<SourceCallback>>,
}

/// A synthetic source fed by [`VsyncInjector::inject`].
pub struct InjectVsyncSource {
    name: String,
    shared: Arc<InjectorShared>,
}

impl InjectVsyncSource {
    /// Creates the source and the injector handle that feeds it.
    #[must_use]
    pub fn new(name: impl Into<String>) -> (Self, VsyncInjector) {
        let shared = Arc::new(InjectorShared {
            callback: Mutex::new(None),
        });
        (
            Self {
                name: name.into(),
                shared: Arc::clone(&shared),
            },
            VsyncInjector { shared },
        )
    }
}

impl VsyncSource for InjectVsyncSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_callback(&mut self, callback: SourceCallback) {
        *self.shared.callback.lock() = Some(callback);
    }

    fn set_vsync_enabled(&mut self, enabled: bool) {
        // Synthetic ticks arrive whenever the injector pushes them.
        trace!("{}: enable={enabled} ignored by injected source", self.name);
    }

    fn set_duration(&mut self, _work: Duration, _ready: Duration) {}
}

/// Pushes synthetic vsync events into an [`InjectVsyncSource`].
pub struct VsyncInjector {
    shared: Arc<InjectorShared>,
}

impl VsyncInjector {
    /// Emits one synthetic vsync. Returns false if no consumer is attached.
    pub fn inject(&self, when: Timestamp, expected_vsync: Timestamp, deadline: Timestamp) -> bool {
        match self.shared.callback.lock().as_mut() {
            Some(cb) => {
                cb(SourceVsync {
                    when,
                    expected_vsync,
                    deadline,
                });
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration as StdDuration;

    use super::*;
    use crate::clock::{Clock, MonotonicClock};
    use crate::tracker::VsyncTracker;

    fn dispatch_with_period(period_ns: i64) -> (Arc<VsyncDispatch>, Arc<dyn Clock>) {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let mut tracker = VsyncTracker::new(Duration::from_nanos(period_ns));
        let base = clock.now();
        for k in 0..8 {
            tracker.add_timestamp(base + Duration::from_nanos(k * period_ns));
        }
        let dispatch = Arc::new(VsyncDispatch::new(
            Arc::new(Mutex::new(tracker)),
            Arc::clone(&clock),
        ));
        (dispatch, clock)
    }

    #[test]
    fn source_ticks_repeatedly_while_enabled() {
        let (dispatch, _clock) = dispatch_with_period(15_000_000);
        let mut source = DispatchVsyncSource::new(
            &dispatch,
            "test-source",
            Duration::from_millis(2),
            Duration::ZERO,
            false,
        );

        let (tx, rx) = mpsc::channel();
        source.set_callback(Box::new(move |v| {
            let _ = tx.send(v);
        }));
        source.set_vsync_enabled(true);

        let first = rx
            .recv_timeout(StdDuration::from_secs(2))
            .expect("first tick");
        let second = rx
            .recv_timeout(StdDuration::from_secs(2))
            .expect("second tick");
        assert!(second.expected_vsync > first.expected_vsync);
        assert_eq!(
            first.when,
            first.expected_vsync - Duration::from_millis(2),
            "tick arrives a work-duration early"
        );

        source.set_vsync_enabled(false);
        // Let any in-flight tick land before checking that production stops.
        std::thread::sleep(StdDuration::from_millis(50));
        while rx.try_recv().is_ok() {}
        assert!(rx.recv_timeout(StdDuration::from_millis(150)).is_err());
    }

    #[test]
    fn injector_reaches_attached_callback() {
        let (mut source, injector) = InjectVsyncSource::new("inject");
        assert!(!injector.inject(
            Timestamp::from_nanos(1),
            Timestamp::from_nanos(2),
            Timestamp::from_nanos(3)
        ));

        let (tx, rx) = mpsc::channel();
        source.set_callback(Box::new(move |v| {
            let _ = tx.send(v);
        }));
        assert!(injector.inject(
            Timestamp::from_nanos(10),
            Timestamp::from_nanos(20),
            Timestamp::from_nanos(15)
        ));
        let v = rx.recv().unwrap();
        assert_eq!(v.when.nanos(), 10);
        assert_eq!(v.expected_vsync.nanos(), 20);
        assert_eq!(v.deadline.nanos(), 15);
    }
}
