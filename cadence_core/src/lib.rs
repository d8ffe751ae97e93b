// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Refresh-rate selection and vsync scheduling for display compositors.
//!
//! `cadence_core` drives a display that supports several refresh modes
//! (e.g. 60/90/120 Hz): it continuously picks the mode the visible content
//! and the user's behavior call for, learns the hardware's true vsync timing
//! from noisy samples, wakes clients early enough to hit their frame
//! deadlines, and arbitrates per-application frame-rate caps.
//!
//! # Architecture
//!
//! Two loops run through the [`Scheduler`](scheduler::Scheduler):
//!
//! ```text
//!   learning loop
//!     hw vsync timestamp ──► VsyncReactor ──► VsyncTracker (period/phase fit)
//!                                                  │
//!     present fence ────────► VsyncReactor ────────┤ (validates the model)
//!                                                  ▼
//!                             VsyncDispatch (wakeups ahead of each vsync)
//!
//!   decision loop
//!     content summary │ timer edges │ thermal cap │ power state
//!         └──► Scheduler::choose_refresh_rate_for_content /
//!              timer callbacks ──► RefreshRatePolicy ──► host callback
//! ```
//!
//! **[`time`]** / **[`clock`]** — the signed-nanosecond monotonic domain and
//! the substitutable time source.
//!
//! **[`rate`]** — [`Fps`](rate::Fps) with margin-aware comparison, display
//! modes, and sub-harmonic dividers.
//!
//! **[`tracker`]** — least-squares period/phase estimation over a sliding
//! sample window.
//!
//! **[`dispatch`]** — the vsync-aligned timer queue and its monitor thread.
//!
//! **[`reactor`]** — decides when hardware vsync interrupts are still needed.
//!
//! **[`timer`]** — named one-shot inactivity timers (idle, touch, power).
//!
//! **[`policy`]** — contracts for the external refresh-rate policy and layer
//! history.
//!
//! **[`overrides`]** — the two-tier per-application frame-rate override
//! store.
//!
//! **[`source`]** / **[`stream`]** — vsync tick sources (dispatch-backed and
//! injected) and per-connection event fan-out with uid throttling.
//!
//! **[`host`]** — the [`SchedulerCallback`](host::SchedulerCallback) surface
//! through which every outward decision flows.
//!
//! **[`config`]** — process-wide configuration, read once.
//!
//! **[`scheduler`]** — the orchestrator owning all of the above.

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod host;
pub mod overrides;
pub mod policy;
pub mod rate;
pub mod reactor;
pub mod scheduler;
pub mod source;
pub mod stream;
pub mod time;
pub mod timer;
pub mod tracker;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::SchedulerConfig;
pub use host::{DisplayStatInfo, ModeEvent, SchedulerCallback, VsyncPeriodChangeTimeline};
pub use overrides::{FrameRateOverride, Uid};
pub use rate::{DisplayId, DisplayModeId, Fps, RefreshRate};
pub use scheduler::{ConnectionHandle, Scheduler, TouchState};
pub use stream::{EventSink, ModeChangedEvent, VsyncEvent};
pub use time::{Duration, Timestamp};
