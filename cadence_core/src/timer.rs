// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Named inactivity timers.
//!
//! A [`OneShotTimer`] counts down a fixed interval on its own thread.
//! [`reset`](OneShotTimer::reset) restarts the countdown; if the interval
//! elapses without one, the timer expires and fires `on_expired` once. The
//! `on_reset` hook fires when the countdown (re)starts: at
//! [`start`](OneShotTimer::start) and on any reset that leaves the expired
//! state. Resets that merely extend a running countdown are silent.
//!
//! The thread is joined on [`stop`](OneShotTimer::stop) and on drop.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration as StdDuration, Instant};

use parking_lot::{Condvar, Mutex};

/// Whether an inactivity window is counting down or has elapsed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TimerState {
    /// The window was (re)started.
    Reset,
    /// The window elapsed without activity.
    Expired,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
    Starting,
    Waiting,
    Expired,
}

struct Control {
    phase: Phase,
    reset_pending: bool,
    stop: bool,
}

struct TimerInner {
    interval: StdDuration,
    control: Mutex<Control>,
    condvar: Condvar,
    on_reset: Box<dyn Fn() + Send + Sync>,
    on_expired: Box<dyn Fn() + Send + Sync>,
}

/// A named inactivity timer with its own countdown thread.
pub struct OneShotTimer {
    name: String,
    interval: StdDuration,
    inner: Arc<TimerInner>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl OneShotTimer {
    /// Creates a timer. Nothing runs until [`start`](Self::start).
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        interval: StdDuration,
        on_reset: impl Fn() + Send + Sync + 'static,
        on_expired: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        assert!(!interval.is_zero(), "timer interval must be non-zero");
        Self {
            name: name.into(),
            interval,
            inner: Arc::new(TimerInner {
                interval,
                control: Mutex::new(Control {
                    phase: Phase::Starting,
                    reset_pending: false,
                    stop: false,
                }),
                condvar: Condvar::new(),
                on_reset: Box::new(on_reset),
                on_expired: Box::new(on_expired),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Spawns the countdown thread. The countdown begins immediately and
    /// `on_reset` fires first. Subsequent calls are no-ops.
    pub fn start(&self) {
        let mut slot = self.thread.lock();
        if slot.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name(format!("timer-{}", self.name))
            .spawn(move || inner.run())
            .expect("failed to spawn timer thread");
        *slot = Some(handle);
    }

    /// Restarts the countdown.
    pub fn reset(&self) {
        let mut control = self.inner.control.lock();
        control.reset_pending = true;
        self.inner.condvar.notify_all();
    }

    /// Stops the countdown and joins the thread. Idempotent.
    pub fn stop(&self) {
        {
            let mut control = self.inner.control.lock();
            control.stop = true;
            self.inner.condvar.notify_all();
        }
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// One-line state summary.
    #[must_use]
    pub fn dump(&self) -> String {
        let phase = self.inner.control.lock().phase;
        format!(
            "{}: interval={}ms state={:?}",
            self.name,
            self.interval.as_millis(),
            phase
        )
    }
}

impl Drop for OneShotTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for OneShotTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneShotTimer")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl TimerInner {
    fn run(self: Arc<Self>) {
        let mut control = self.control.lock();
        'outer: loop {
            if control.stop {
                return;
            }

            // Entering a countdown always announces the reset. The phase
            // flips to Waiting only once the announcement returned, so
            // observers of the phase see a completed callback.
            control.reset_pending = false;
            drop(control);
            (self.on_reset)();
            control = self.control.lock();
            control.phase = Phase::Waiting;

            let mut deadline = Instant::now() + self.interval;
            loop {
                if control.stop {
                    return;
                }
                if control.reset_pending {
                    // Activity during the countdown extends it silently.
                    control.reset_pending = false;
                    deadline = Instant::now() + self.interval;
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let _ = self.condvar.wait_for(&mut control, deadline - now);
            }

            control.phase = Phase::Expired;
            drop(control);
            (self.on_expired)();
            control = self.control.lock();

            while !control.stop && !control.reset_pending {
                self.condvar.wait(&mut control);
            }
            if control.stop {
                return;
            }
            // A reset out of the expired state starts the next countdown,
            // which re-announces via on_reset at the top of the loop.
            continue 'outer;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration as StdDuration;

    use super::*;

    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    enum Event {
        Reset,
        Expired,
    }

    fn timer_with_events(
        interval_ms: u64,
    ) -> (OneShotTimer, mpsc::Receiver<(Event, Instant)>) {
        let (tx, rx) = mpsc::channel();
        let tx2 = tx.clone();
        let timer = OneShotTimer::new(
            "test",
            StdDuration::from_millis(interval_ms),
            move || {
                let _ = tx.send((Event::Reset, Instant::now()));
            },
            move || {
                let _ = tx2.send((Event::Expired, Instant::now()));
            },
        );
        (timer, rx)
    }

    fn recv(rx: &mpsc::Receiver<(Event, Instant)>) -> (Event, Instant) {
        rx.recv_timeout(StdDuration::from_secs(5))
            .expect("timer event should arrive")
    }

    #[test]
    fn start_announces_reset_then_expires() {
        let (timer, rx) = timer_with_events(20);
        timer.start();

        assert_eq!(recv(&rx).0, Event::Reset);
        assert_eq!(recv(&rx).0, Event::Expired);
        timer.stop();
    }

    #[test]
    fn reset_during_countdown_extends_it_silently() {
        let (timer, rx) = timer_with_events(150);
        let started = Instant::now();
        timer.start();
        assert_eq!(recv(&rx).0, Event::Reset);

        std::thread::sleep(StdDuration::from_millis(60));
        timer.reset();

        let (event, at) = recv(&rx);
        assert_eq!(event, Event::Expired);
        // The reset pushed expiry to at least 60ms + 150ms after start.
        assert!(
            at.duration_since(started) >= StdDuration::from_millis(180),
            "expired too early: {:?}",
            at.duration_since(started)
        );
        timer.stop();
    }

    #[test]
    fn reset_after_expiry_reannounces() {
        let (timer, rx) = timer_with_events(20);
        timer.start();
        assert_eq!(recv(&rx).0, Event::Reset);
        assert_eq!(recv(&rx).0, Event::Expired);

        timer.reset();
        assert_eq!(recv(&rx).0, Event::Reset);
        assert_eq!(recv(&rx).0, Event::Expired);
        timer.stop();
    }

    #[test]
    fn stop_is_idempotent_and_joins() {
        let (timer, rx) = timer_with_events(10_000);
        timer.start();
        assert_eq!(recv(&rx).0, Event::Reset);
        timer.stop();
        timer.stop();
        assert!(rx.recv_timeout(StdDuration::from_millis(50)).is_err());
    }

    #[test]
    fn dump_names_the_timer() {
        let (timer, _rx) = timer_with_events(75);
        assert!(timer.dump().contains("test"));
        assert!(timer.dump().contains("75"));
    }
}
