// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wakeup scheduling against predicted vsyncs.
//!
//! [`VsyncDispatch`] owns a single monitor thread that sleeps until the
//! earliest pending wakeup, then fires every callback that is due. Callbacks
//! are woken `work_duration` ahead of their predicted vsync so the client has
//! time to produce a frame before the deadline.
//!
//! Callbacks run on the monitor thread with no dispatch lock held, so a
//! callback may re-arm itself (or any other registration) from inside its own
//! invocation. Late wakeups still fire; a callback is never dropped.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread;

use log::error;
use parking_lot::{Condvar, Mutex};

use crate::clock::Clock;
use crate::time::{Duration, Timestamp};
use crate::tracker::VsyncTracker;

/// Callbacks are batched if their wakeups land within this span of the
/// earliest one, and a wake later than this is considered late (but fires
/// regardless).
const TIMER_SLACK: Duration = Duration::from_micros(500);

/// A caller already this close to its promised vsync is not re-aimed at a
/// later one.
const VSYNC_MOVE_THRESHOLD: Duration = Duration::from_millis(3);

/// Identifies one registered callback.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CallbackToken(u64);

/// How a callback wants to be woken relative to its vsync.
#[derive(Clone, Copy, Debug)]
pub struct ScheduleTiming {
    /// Lead time for the client's own work; the wakeup fires this long
    /// before the predicted vsync.
    pub work_duration: Duration,
    /// Lead time by which the produced frame must be ready.
    pub ready_duration: Duration,
    /// Never aim at a vsync before this instant.
    pub earliest_vsync: Timestamp,
}

/// What a fired callback is told about its vsync.
#[derive(Clone, Copy, Debug)]
pub struct DispatchedVsync {
    /// The predicted vsync instant this wakeup targets.
    pub vsync: Timestamp,
    /// The wakeup instant that was scheduled.
    pub scheduled_wakeup: Timestamp,
    /// The instant the frame must be ready by.
    pub ready: Timestamp,
}

type DispatchFn = Box<dyn FnMut(DispatchedVsync) + Send>;

#[derive(Clone, Copy, Debug)]
struct Armed {
    vsync: Timestamp,
    wakeup: Timestamp,
    ready: Timestamp,
}

struct Entry {
    name: String,
    /// Taken out of the entry while the callback is executing.
    callback: Option<DispatchFn>,
    armed: Option<Armed>,
}

#[derive(Default)]
struct DispatchState {
    entries: HashMap<CallbackToken, Entry>,
    next_token: u64,
    shutdown: bool,
}

struct DispatchInner {
    state: Mutex<DispatchState>,
    condvar: Condvar,
    tracker: Arc<Mutex<VsyncTracker>>,
    clock: Arc<dyn Clock>,
}

/// The vsync-aligned timer queue.
pub struct VsyncDispatch {
    inner: Arc<DispatchInner>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl VsyncDispatch {
    /// Creates the dispatch and starts its monitor thread.
    #[must_use]
    pub fn new(tracker: Arc<Mutex<VsyncTracker>>, clock: Arc<dyn Clock>) -> Self {
        let inner = Arc::new(DispatchInner {
            state: Mutex::new(DispatchState::default()),
            condvar: Condvar::new(),
            tracker,
            clock,
        });
        let monitor = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name("vsync-dispatch".into())
            .spawn(move || monitor.run())
            .expect("failed to spawn vsync dispatch thread");
        Self {
            inner,
            thread: Mutex::new(Some(handle)),
        }
    }

    /// Registers a callback under a diagnostic name. The callback stays
    /// dormant until [`schedule`](Self::schedule) arms it.
    pub fn register_callback(
        &self,
        name: impl Into<String>,
        callback: impl FnMut(DispatchedVsync) + Send + 'static,
    ) -> CallbackToken {
        let mut state = self.inner.state.lock();
        state.next_token += 1;
        let token = CallbackToken(state.next_token);
        state.entries.insert(
            token,
            Entry {
                name: name.into(),
                callback: Some(Box::new(callback)),
                armed: None,
            },
        );
        token
    }

    /// Removes a callback entirely. A pending wakeup is discarded.
    pub fn unregister_callback(&self, token: CallbackToken) {
        let mut state = self.inner.state.lock();
        state.entries.remove(&token);
        self.inner.condvar.notify_all();
    }

    /// Arms (or re-arms) a callback and returns the vsync it will target, or
    /// `None` for an unknown token.
    ///
    /// If the caller is already within the move threshold of a previously
    /// promised vsync, a request that would re-aim at a *later* vsync keeps
    /// the original promise instead.
    pub fn schedule(&self, token: CallbackToken, timing: ScheduleTiming) -> Option<Timestamp> {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock();
        let Some(entry) = state.entries.get_mut(&token) else {
            error!("schedule on unknown dispatch token {token:?}");
            return None;
        };

        let target_from = timing.earliest_vsync.max(now + timing.work_duration);
        let vsync = self
            .inner
            .tracker
            .lock()
            .next_anticipated_vsync_from(target_from);

        if let Some(armed) = entry.armed {
            if vsync > armed.vsync && armed.vsync - now <= VSYNC_MOVE_THRESHOLD {
                return Some(armed.vsync);
            }
        }

        entry.armed = Some(Armed {
            vsync,
            wakeup: vsync - timing.work_duration,
            ready: vsync - timing.ready_duration,
        });
        self.inner.condvar.notify_all();
        Some(vsync)
    }

    /// Disarms a callback without removing it.
    pub fn cancel(&self, token: CallbackToken) {
        let mut state = self.inner.state.lock();
        if let Some(entry) = state.entries.get_mut(&token) {
            entry.armed = None;
            self.inner.condvar.notify_all();
        }
    }

    /// Diagnostic name of a registration, if it exists.
    #[must_use]
    pub fn callback_name(&self, token: CallbackToken) -> Option<String> {
        self.inner
            .state
            .lock()
            .entries
            .get(&token)
            .map(|e| e.name.clone())
    }

    /// One-line-per-registration state summary.
    #[must_use]
    pub fn dump(&self) -> String {
        use std::fmt::Write;

        let state = self.inner.state.lock();
        let mut out = String::new();
        for (token, entry) in &state.entries {
            let _ = match entry.armed {
                Some(armed) => writeln!(
                    out,
                    "  {} (token {}): wakeup={}ns vsync={}ns",
                    entry.name,
                    token.0,
                    armed.wakeup.nanos(),
                    armed.vsync.nanos()
                ),
                None => writeln!(out, "  {} (token {}): disarmed", entry.name, token.0),
            };
        }
        out
    }
}

impl Drop for VsyncDispatch {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
            self.inner.condvar.notify_all();
        }
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl DispatchInner {
    fn run(self: Arc<Self>) {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return;
            }

            let now = self.clock.now();
            let due: Vec<(CallbackToken, Armed)> = state
                .entries
                .iter_mut()
                .filter_map(|(&token, entry)| {
                    let armed = entry.armed?;
                    (armed.wakeup <= now + TIMER_SLACK).then(|| {
                        entry.armed = None;
                        (token, armed)
                    })
                })
                .collect();

            if !due.is_empty() {
                // Take the callbacks out of the map so they can run without
                // the lock, which is what allows re-entrant scheduling.
                let mut work = Vec::with_capacity(due.len());
                for (token, armed) in due {
                    if let Some(entry) = state.entries.get_mut(&token) {
                        if let Some(cb) = entry.callback.take() {
                            work.push((token, cb, armed));
                        }
                    }
                }
                drop(state);

                for (_, cb, armed) in &mut work {
                    cb(DispatchedVsync {
                        vsync: armed.vsync,
                        scheduled_wakeup: armed.wakeup,
                        ready: armed.ready,
                    });
                }

                state = self.state.lock();
                for (token, cb, _) in work {
                    // The entry may have been unregistered while we ran it.
                    if let Some(entry) = state.entries.get_mut(&token) {
                        entry.callback = Some(cb);
                    }
                }
                continue;
            }

            let earliest = state
                .entries
                .values()
                .filter_map(|e| e.armed.map(|a| a.wakeup))
                .min();
            match earliest {
                None => self.condvar.wait(&mut state),
                Some(wakeup) => {
                    let delay = (wakeup - now).to_std();
                    let _ = self.condvar.wait_for(&mut state, delay);
                }
            }
        }
    }
}

/// RAII handle tying a registration's lifetime to its owner.
pub struct VsyncCallbackRegistration {
    dispatch: Weak<VsyncDispatch>,
    token: CallbackToken,
}

impl VsyncCallbackRegistration {
    /// Registers `callback` on `dispatch` under `name`.
    #[must_use]
    pub fn new(
        dispatch: &Arc<VsyncDispatch>,
        name: impl Into<String>,
        callback: impl FnMut(DispatchedVsync) + Send + 'static,
    ) -> Self {
        let token = dispatch.register_callback(name, callback);
        Self {
            dispatch: Arc::downgrade(dispatch),
            token,
        }
    }

    /// The token for direct [`VsyncDispatch::schedule`] calls (e.g. from
    /// inside the callback itself).
    #[must_use]
    pub fn token(&self) -> CallbackToken {
        self.token
    }

    /// Arms the registration. See [`VsyncDispatch::schedule`].
    pub fn schedule(&self, timing: ScheduleTiming) -> Option<Timestamp> {
        self.dispatch.upgrade()?.schedule(self.token, timing)
    }

    /// Disarms the registration.
    pub fn cancel(&self) {
        if let Some(dispatch) = self.dispatch.upgrade() {
            dispatch.cancel(self.token);
        }
    }
}

impl Drop for VsyncCallbackRegistration {
    fn drop(&mut self) {
        if let Some(dispatch) = self.dispatch.upgrade() {
            dispatch.unregister_callback(self.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration as StdDuration;

    use super::*;
    use crate::clock::{ManualClock, MonotonicClock};

    fn seeded_tracker(clock: &dyn Clock, period_ns: i64) -> Arc<Mutex<VsyncTracker>> {
        let mut tracker = VsyncTracker::new(Duration::from_nanos(period_ns));
        let base = clock.now();
        for k in 0..8 {
            tracker.add_timestamp(base + Duration::from_nanos(k * period_ns));
        }
        Arc::new(Mutex::new(tracker))
    }

    #[test]
    fn fires_scheduled_callback_with_promised_vsync() {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let tracker = seeded_tracker(clock.as_ref(), 20_000_000);
        let dispatch = Arc::new(VsyncDispatch::new(tracker, Arc::clone(&clock)));

        let (tx, rx) = mpsc::channel();
        let token = dispatch.register_callback("test", move |d| {
            let _ = tx.send(d);
        });

        let promised = dispatch
            .schedule(
                token,
                ScheduleTiming {
                    work_duration: Duration::from_millis(5),
                    ready_duration: Duration::ZERO,
                    earliest_vsync: Timestamp::ZERO,
                },
            )
            .expect("valid token");

        let fired = rx
            .recv_timeout(StdDuration::from_secs(2))
            .expect("callback should fire");
        assert_eq!(fired.vsync, promised);
        assert_eq!(fired.scheduled_wakeup, promised - Duration::from_millis(5));
    }

    #[test]
    fn callback_can_reschedule_itself() {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let tracker = seeded_tracker(clock.as_ref(), 15_000_000);
        let dispatch = Arc::new(VsyncDispatch::new(tracker, Arc::clone(&clock)));

        let (tx, rx) = mpsc::channel();
        let weak = Arc::downgrade(&dispatch);
        let token_cell = Arc::new(Mutex::new(None::<CallbackToken>));
        let cell = Arc::clone(&token_cell);
        let token = dispatch.register_callback("repeating", move |d| {
            let _ = tx.send(d.vsync);
            if let (Some(dispatch), Some(token)) = (weak.upgrade(), *cell.lock()) {
                dispatch.schedule(
                    token,
                    ScheduleTiming {
                        work_duration: Duration::ZERO,
                        ready_duration: Duration::ZERO,
                        earliest_vsync: d.vsync + Duration::from_nanos(1),
                    },
                );
            }
        });
        *token_cell.lock() = Some(token);

        dispatch.schedule(
            token,
            ScheduleTiming {
                work_duration: Duration::ZERO,
                ready_duration: Duration::ZERO,
                earliest_vsync: Timestamp::ZERO,
            },
        );

        let mut fired = Vec::new();
        for _ in 0..3 {
            fired.push(
                rx.recv_timeout(StdDuration::from_secs(2))
                    .expect("repeating callback should keep firing"),
            );
        }
        assert!(fired[0] < fired[1] && fired[1] < fired[2]);
    }

    #[test]
    fn cancel_prevents_the_wakeup() {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let tracker = seeded_tracker(clock.as_ref(), 50_000_000);
        let dispatch = Arc::new(VsyncDispatch::new(tracker, Arc::clone(&clock)));

        let (tx, rx) = mpsc::channel();
        let token = dispatch.register_callback("cancelled", move |d| {
            let _ = tx.send(d);
        });
        dispatch.schedule(
            token,
            ScheduleTiming {
                work_duration: Duration::ZERO,
                ready_duration: Duration::ZERO,
                earliest_vsync: clock.now() + Duration::from_millis(40),
            },
        );
        dispatch.cancel(token);

        assert!(rx.recv_timeout(StdDuration::from_millis(200)).is_err());
    }

    #[test]
    fn close_to_promise_keeps_earlier_vsync() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(95)));
        let mut tracker = VsyncTracker::new(Duration::from_millis(10));
        for k in 0..8 {
            tracker.add_timestamp(Timestamp::from_nanos(k * 10_000_000));
        }
        let dispatch = Arc::new(VsyncDispatch::new(
            Arc::new(Mutex::new(tracker)),
            Arc::clone(&clock) as Arc<dyn Clock>,
        ));

        let token = dispatch.register_callback("pinned", |_| {});
        let zero_lead = |earliest| ScheduleTiming {
            work_duration: Duration::ZERO,
            ready_duration: Duration::ZERO,
            earliest_vsync: earliest,
        };

        // Promised the 100ms vsync.
        let first = dispatch.schedule(token, zero_lead(Timestamp::ZERO)).unwrap();
        assert_eq!(first, Timestamp::from_millis(100));

        // Far from the promise (5ms out): re-aiming later is honored.
        let moved = dispatch
            .schedule(token, zero_lead(Timestamp::from_millis(100) + Duration::from_nanos(1)))
            .unwrap();
        assert_eq!(moved, Timestamp::from_millis(110));

        // Within the move threshold of the promise: a later target is refused.
        clock.set(Timestamp::from_millis(108));
        let kept = dispatch
            .schedule(token, zero_lead(Timestamp::from_millis(111)))
            .unwrap();
        assert_eq!(kept, Timestamp::from_millis(110));
    }

    #[test]
    fn unknown_token_returns_none() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Timestamp::ZERO));
        let tracker = Arc::new(Mutex::new(VsyncTracker::new(Duration::from_millis(10))));
        let dispatch = VsyncDispatch::new(tracker, clock);
        assert!(dispatch
            .schedule(
                CallbackToken(999),
                ScheduleTiming {
                    work_duration: Duration::ZERO,
                    ready_duration: Duration::ZERO,
                    earliest_vsync: Timestamp::ZERO,
                },
            )
            .is_none());
    }

    #[test]
    fn registration_unregisters_on_drop() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Timestamp::ZERO));
        let tracker = Arc::new(Mutex::new(VsyncTracker::new(Duration::from_millis(10))));
        let dispatch = Arc::new(VsyncDispatch::new(tracker, clock));

        let registration = VsyncCallbackRegistration::new(&dispatch, "raii", |_| {});
        let token = registration.token();
        assert_eq!(dispatch.callback_name(token).as_deref(), Some("raii"));

        drop(registration);
        assert!(dispatch.callback_name(token).is_none());
    }
}
