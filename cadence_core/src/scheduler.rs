// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The refresh-rate and vsync orchestrator.
//!
//! [`Scheduler`] owns the vsync machinery ([`VsyncTracker`],
//! [`VsyncDispatch`], [`VsyncReactor`]), the inactivity timers, the
//! connection registry, and the mode-selection state. Everything else talks
//! to it:
//!
//! ```text
//!   hw vsync timestamps ──► add_resync_sample ──► Reactor ──► Tracker
//!   present fences ───────► add_present_fence ──► Reactor ──► Tracker
//!                                   │ (needs hw vsync?)
//!                                   ▼
//!                      enable/disable_hardware_vsync ──► host
//!
//!   content summary / timer edges / thermal cap / power state
//!                                   │
//!                                   ▼
//!              decision pipeline ──► change_refresh_rate ──► host
//!                                └──► per-uid override maps ──► streams
//! ```
//!
//! The decision pipeline computes under the feature-state lock and performs
//! every host callback after releasing it; no internal lock is ever held
//! across a [`SchedulerCallback`] method.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration as StdDuration;

use log::{debug, error, trace, warn};
use parking_lot::Mutex;

use crate::clock::{Clock, MonotonicClock};
use crate::config::SchedulerConfig;
use crate::dispatch::{ScheduleTiming, VsyncCallbackRegistration, VsyncDispatch};
use crate::host::{DisplayStatInfo, ModeEvent, SchedulerCallback, VsyncPeriodChangeTimeline};
use crate::overrides::{FrameRateOverride, OverrideState, Uid};
use crate::policy::{
    ContentSummary, GlobalSignals, LayerHistory, LayerId, LayerUpdateType, LayerVoteType,
    RefreshRatePolicy, SurfaceKind,
};
use crate::rate::{frame_rate_divider, DisplayId, DisplayModeId, Fps, RefreshRate};
use crate::reactor::{PresentFence, VsyncReactor};
use crate::source::{DispatchVsyncSource, InjectVsyncSource, VsyncInjector};
use crate::stream::{
    EventConnection, EventSink, EventStream, InterceptVsyncFn, ModeChangedEvent, NoopSink,
    ResyncFn, ThrottleVsyncFn, VsyncPeriodFn,
};
use crate::time::{Duration, Timestamp};
use crate::timer::{OneShotTimer, TimerState};
use crate::tracker::VsyncTracker;

/// Period seed before any hardware samples arrive (60 Hz).
const IDEAL_SEED_PERIOD: Duration = Duration::from_nanos(16_666_667);

/// Repeated resync requests within this window collapse into one.
const RESYNC_IGNORE_DELAY: Duration = Duration::from_millis(750);

/// Host-reported vsync-applied times are clamped to at most this far ahead.
const MAX_VSYNC_APPLIED_LOOKAHEAD: Duration = Duration::from_secs(1);

/// Below this rate the kernel idle timer is allowed to park hardware vsync.
const KERNEL_TIMER_FPS_THRESHOLD: f32 = 65.0;

/// Identifies one event stream for the lifetime of the process. Never reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ConnectionHandle(pub u64);

/// Whether the user is currently interacting with the device.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TouchState {
    /// Recent touch activity.
    Active,
    /// No touch activity past the touch window.
    Inactive,
}

#[derive(Clone, Copy, Debug)]
struct ModeChangeParams {
    handle: ConnectionHandle,
    display_id: DisplayId,
    mode_id: DisplayModeId,
    vsync_period: Duration,
}

#[derive(Clone, Copy, Debug)]
struct ThermalCap {
    fps: Fps,
    mode_id: DisplayModeId,
}

/// The decision-state record. One mutex guards the whole value because the
/// pipeline needs a consistent snapshot of all of it.
struct Features {
    mode_id: Option<DisplayModeId>,
    content_requirements: ContentSummary,
    idle_timer: TimerState,
    touch: TouchState,
    display_power_timer: TimerState,
    is_display_power_state_normal: bool,
    cached_mode_changed_params: Option<ModeChangeParams>,
    thermal: Option<ThermalCap>,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            mode_id: None,
            content_requirements: ContentSummary::new(),
            idle_timer: TimerState::Reset,
            touch: TouchState::Inactive,
            display_power_timer: TimerState::Reset,
            is_display_power_state_normal: true,
            cached_mode_changed_params: None,
            thermal: None,
        }
    }
}

#[derive(Default)]
struct DecisionOutcome {
    emit: Option<(RefreshRate, ModeEvent)>,
    replay: Option<ModeChangeParams>,
    overrides_changed: bool,
    considered: GlobalSignals,
}

struct HwVsyncState {
    enabled: bool,
    available: bool,
}

struct Connection {
    stream: EventStream,
    connection: Arc<EventConnection>,
}

#[derive(Default)]
struct InjectorState {
    enabled: bool,
    handle: Option<ConnectionHandle>,
    injector: Option<VsyncInjector>,
}

/// The vsync machinery as one unit: clock, model, wakeups, and the
/// hw-vsync-needed arbiter.
struct VsyncSchedule {
    clock: Arc<dyn Clock>,
    tracker: Arc<Mutex<VsyncTracker>>,
    dispatch: Arc<VsyncDispatch>,
    reactor: Mutex<VsyncReactor>,
}

/// Toggles a traced parity bit at every predicted vsync, so the prediction
/// grid shows up in traces next to real vsyncs.
struct PredictedVsyncTracer {
    flips: Arc<AtomicU64>,
    _registration: VsyncCallbackRegistration,
}

impl PredictedVsyncTracer {
    fn new(dispatch: &Arc<VsyncDispatch>) -> Self {
        let flips = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&flips);
        let weak = Arc::downgrade(dispatch);
        let token_cell = Arc::new(Mutex::new(None));
        let cell = Arc::clone(&token_cell);

        let zero = ScheduleTiming {
            work_duration: Duration::ZERO,
            ready_duration: Duration::ZERO,
            earliest_vsync: Timestamp::ZERO,
        };
        let registration =
            VsyncCallbackRegistration::new(dispatch, "PredictedVsyncTracer", move |_| {
                let flips = counter.fetch_add(1, Ordering::Relaxed) + 1;
                trace!("predicted-vsync parity={}", flips % 2);
                if let (Some(dispatch), Some(token)) = (weak.upgrade(), *cell.lock()) {
                    dispatch.schedule(token, zero);
                }
            });
        *token_cell.lock() = Some(registration.token());
        registration.schedule(zero);

        Self {
            flips,
            _registration: registration,
        }
    }
}

/// The refresh-rate and vsync scheduling core.
pub struct Scheduler {
    // Timers are declared first: their threads must join before the state
    // their callbacks reach through is torn down.
    display_power_timer: Option<OneShotTimer>,
    touch_timer: Option<OneShotTimer>,
    idle_timer: Option<OneShotTimer>,

    config: SchedulerConfig,
    vsync_schedule: VsyncSchedule,
    layer_history: Arc<dyn LayerHistory>,
    policy: Arc<dyn RefreshRatePolicy>,
    callback: Arc<dyn SchedulerCallback>,

    connections: Mutex<HashMap<ConnectionHandle, Connection>>,
    next_connection_id: AtomicU64,

    features: Mutex<Features>,
    overrides: Mutex<OverrideState>,
    hw_vsync: Mutex<HwVsyncState>,
    vsync_timeline: Mutex<Option<VsyncPeriodChangeTimeline>>,

    last_resync_time: AtomicI64,
    display_idle: AtomicBool,
    handle_idle_timeout: AtomicBool,
    injector: Mutex<InjectorState>,
    predicted_tracer: Option<PredictedVsyncTracer>,
}

impl Scheduler {
    /// Creates a scheduler on the production clock. Hardware vsync starts
    /// disabled; configured timers start immediately.
    pub fn new(
        config: SchedulerConfig,
        policy: Arc<dyn RefreshRatePolicy>,
        layer_history: Arc<dyn LayerHistory>,
        callback: Arc<dyn SchedulerCallback>,
    ) -> Arc<Self> {
        Self::with_clock(
            config,
            policy,
            layer_history,
            callback,
            Arc::new(MonotonicClock::new()),
        )
    }

    /// Like [`new`](Self::new) with a substitutable clock.
    pub fn with_clock(
        config: SchedulerConfig,
        policy: Arc<dyn RefreshRatePolicy>,
        layer_history: Arc<dyn LayerHistory>,
        callback: Arc<dyn SchedulerCallback>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let tracker = Arc::new(Mutex::new(VsyncTracker::new(IDEAL_SEED_PERIOD)));
        let dispatch = Arc::new(VsyncDispatch::new(
            Arc::clone(&tracker),
            Arc::clone(&clock),
        ));
        let reactor = Mutex::new(VsyncReactor::new(
            Arc::clone(&tracker),
            config.support_kernel_timer,
        ));
        let predicted_tracer = config
            .show_predicted_vsync
            .then(|| PredictedVsyncTracer::new(&dispatch));

        let scheduler = Arc::new_cyclic(|weak: &Weak<Self>| {
            let idle_timer = (config.idle_timer_ms > 0).then(|| {
                let kernel = config.support_kernel_timer;
                let reset = timer_hook(weak, move |s| {
                    if kernel {
                        s.kernel_idle_timer_callback(TimerState::Reset);
                    } else {
                        s.idle_timer_callback(TimerState::Reset);
                    }
                });
                let expired = timer_hook(weak, move |s| {
                    if kernel {
                        s.kernel_idle_timer_callback(TimerState::Expired);
                    } else {
                        s.idle_timer_callback(TimerState::Expired);
                    }
                });
                OneShotTimer::new(
                    "IdleTimer",
                    StdDuration::from_millis(u64::from(config.idle_timer_ms)),
                    reset,
                    expired,
                )
            });
            let touch_timer = (config.touch_timer_ms > 0).then(|| {
                OneShotTimer::new(
                    "TouchTimer",
                    StdDuration::from_millis(u64::from(config.touch_timer_ms)),
                    timer_hook(weak, |s| s.touch_timer_callback(TimerState::Reset)),
                    timer_hook(weak, |s| s.touch_timer_callback(TimerState::Expired)),
                )
            });
            let display_power_timer = (config.display_power_timer_ms > 0).then(|| {
                OneShotTimer::new(
                    "DisplayPowerTimer",
                    StdDuration::from_millis(u64::from(config.display_power_timer_ms)),
                    timer_hook(weak, |s| s.display_power_timer_callback(TimerState::Reset)),
                    timer_hook(weak, |s| s.display_power_timer_callback(TimerState::Expired)),
                )
            });

            Self {
                display_power_timer,
                touch_timer,
                idle_timer,
                config,
                vsync_schedule: VsyncSchedule {
                    clock,
                    tracker,
                    dispatch,
                    reactor,
                },
                layer_history,
                policy,
                callback,
                connections: Mutex::new(HashMap::new()),
                next_connection_id: AtomicU64::new(0),
                features: Mutex::new(Features::default()),
                overrides: Mutex::new(OverrideState::default()),
                hw_vsync: Mutex::new(HwVsyncState {
                    enabled: false,
                    available: false,
                }),
                vsync_timeline: Mutex::new(None),
                last_resync_time: AtomicI64::new(0),
                display_idle: AtomicBool::new(false),
                handle_idle_timeout: AtomicBool::new(true),
                injector: Mutex::new(InjectorState::default()),
                predicted_tracer,
            }
        });

        scheduler.callback.set_vsync_enabled(false);
        if let Some(timer) = &scheduler.idle_timer {
            timer.start();
        }
        if let Some(timer) = &scheduler.touch_timer {
            timer.start();
        }
        if let Some(timer) = &scheduler.display_power_timer {
            timer.start();
        }
        scheduler
    }

    // ------------------------------------------------------------------
    // Connection registry
    // ------------------------------------------------------------------

    /// Builds an event stream backed by a dispatch source and registers it.
    /// The stream named "app" triggers repaints when its clients request
    /// vsyncs; every other stream only resyncs.
    pub fn create_connection(
        self: &Arc<Self>,
        name: &str,
        work_duration: Duration,
        ready_duration: Duration,
        intercept: Option<InterceptVsyncFn>,
    ) -> ConnectionHandle {
        let source = Box::new(DispatchVsyncSource::new(
            &self.vsync_schedule.dispatch,
            name,
            work_duration,
            ready_duration,
            true,
        ));
        let stream = EventStream::new(
            source,
            self.make_throttle_callback(),
            self.make_vsync_period_fn(),
            intercept,
        );
        // Refresh must only be triggered from the app stream; doing it from
        // the compositor's own stream would loop through request_next_vsync.
        let triggers_refresh = name == "app";
        self.register_stream(stream, triggers_refresh)
    }

    fn register_stream(
        self: &Arc<Self>,
        stream: EventStream,
        triggers_refresh: bool,
    ) -> ConnectionHandle {
        let handle = ConnectionHandle(self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1);
        let connection = stream.create_connection(0, Box::new(NoopSink), self.make_resync_fn(triggers_refresh));
        debug!("created connection handle {} for {}", handle.0, stream.name());
        self.connections
            .lock()
            .insert(handle, Connection { stream, connection });
        handle
    }

    fn make_resync_fn(self: &Arc<Self>, triggers_refresh: bool) -> ResyncFn {
        let weak = Arc::downgrade(self);
        if triggers_refresh {
            Box::new(move || {
                if let Some(s) = weak.upgrade() {
                    s.resync_and_refresh();
                }
            })
        } else {
            Box::new(move || {
                if let Some(s) = weak.upgrade() {
                    s.resync();
                }
            })
        }
    }

    fn make_throttle_callback(self: &Arc<Self>) -> Option<ThrottleVsyncFn> {
        if !self.policy.supports_frame_rate_override() {
            return None;
        }
        let weak = Arc::downgrade(self);
        Some(Box::new(move |expected_vsync, uid| {
            let Some(s) = weak.upgrade() else {
                return false;
            };
            !s.is_vsync_valid(expected_vsync, uid)
        }))
    }

    fn make_vsync_period_fn(self: &Arc<Self>) -> Option<VsyncPeriodFn> {
        let weak = Arc::downgrade(self);
        Some(Box::new(move |uid| {
            let Some(s) = weak.upgrade() else {
                return IDEAL_SEED_PERIOD;
            };
            let current = s.policy.current_refresh_rate();
            let base_period = current.vsync_period();
            let Some(fps) = s.frame_rate_override(uid) else {
                return base_period;
            };
            let divider = frame_rate_divider(current.fps, fps);
            if divider <= 1 {
                base_period
            } else {
                base_period * divider
            }
        }))
    }

    /// Adds a client connection to an existing stream.
    pub fn create_display_event_connection(
        self: &Arc<Self>,
        handle: ConnectionHandle,
        triggers_refresh: bool,
        uid: Uid,
        sink: Box<dyn EventSink>,
    ) -> Option<Arc<EventConnection>> {
        let stream = self.stream(handle)?;
        Some(stream.create_connection(uid, sink, self.make_resync_fn(triggers_refresh)))
    }

    /// The primary event connection of a stream.
    pub fn event_connection(&self, handle: ConnectionHandle) -> Option<Arc<EventConnection>> {
        let connections = self.connections.lock();
        match connections.get(&handle) {
            Some(c) => Some(Arc::clone(&c.connection)),
            None => {
                error!("invalid connection handle {}", handle.0);
                None
            }
        }
    }

    /// Number of client connections on a stream; 0 for an unknown handle.
    pub fn event_stream_connection_count(&self, handle: ConnectionHandle) -> usize {
        self.stream(handle).map_or(0, |s| s.connection_count())
    }

    /// Forwards display hot-plug to a stream.
    pub fn on_hotplug_received(
        &self,
        handle: ConnectionHandle,
        display_id: DisplayId,
        connected: bool,
    ) {
        if let Some(stream) = self.stream(handle) {
            stream.on_hotplug(display_id, connected);
        }
    }

    /// Resumes vsync delivery on a stream.
    pub fn on_screen_acquired(&self, handle: ConnectionHandle) {
        if let Some(stream) = self.stream(handle) {
            stream.on_screen_acquired();
        }
    }

    /// Pauses vsync delivery on a stream.
    pub fn on_screen_released(&self, handle: ConnectionHandle) {
        if let Some(stream) = self.stream(handle) {
            stream.on_screen_released();
        }
    }

    /// Fans the effective override set out on a stream.
    pub fn on_frame_rate_overrides_changed(&self, handle: ConnectionHandle, display_id: DisplayId) {
        let overrides = self.overrides.lock().merged();
        if let Some(stream) = self.stream(handle) {
            stream.on_frame_rate_overrides(display_id, &overrides);
        }
    }

    /// Records the host's mode-change notification for the primary display
    /// and fans it out. Content requirements are invalidated so they are
    /// re-derived at the new rate.
    pub fn on_primary_display_mode_changed(
        &self,
        handle: ConnectionHandle,
        display_id: DisplayId,
        mode_id: DisplayModeId,
        vsync_period: Duration,
    ) {
        {
            let mut features = self.features.lock();
            features.cached_mode_changed_params = Some(ModeChangeParams {
                handle,
                display_id,
                mode_id,
                vsync_period,
            });
            features.content_requirements.clear();
        }
        self.on_non_primary_display_mode_changed(handle, display_id, mode_id, vsync_period);
    }

    /// Fans a mode change out on a stream without touching decision state.
    pub fn on_non_primary_display_mode_changed(
        &self,
        handle: ConnectionHandle,
        display_id: DisplayId,
        mode_id: DisplayModeId,
        vsync_period: Duration,
    ) {
        if let Some(stream) = self.stream(handle) {
            stream.on_mode_changed(&ModeChangedEvent {
                display_id,
                mode_id,
                vsync_period,
            });
        }
    }

    /// Retargets a stream's dispatch lead times.
    pub fn set_duration(&self, handle: ConnectionHandle, work: Duration, ready: Duration) {
        if let Some(stream) = self.stream(handle) {
            stream.set_duration(work, ready);
        }
    }

    /// Dumps one stream's state; empty for an unknown handle.
    pub fn dump_connection(&self, handle: ConnectionHandle) -> String {
        self.stream(handle).map_or_else(String::new, |s| s.dump())
    }

    fn stream(&self, handle: ConnectionHandle) -> Option<EventStream> {
        let connections = self.connections.lock();
        match connections.get(&handle) {
            Some(c) => Some(c.stream.clone()),
            None => {
                error!("invalid connection handle {}", handle.0);
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Frame-rate overrides and throttling
    // ------------------------------------------------------------------

    /// The effective override for a uid, if overrides are supported.
    pub fn frame_rate_override(&self, uid: Uid) -> Option<Fps> {
        if !self.policy.supports_frame_rate_override() {
            return None;
        }
        self.overrides.lock().get(uid)
    }

    /// Installs or erases an administrative override.
    pub fn set_preferred_refresh_rate_for_uid(&self, request: FrameRateOverride) {
        self.overrides.lock().set_backdoor(request);
    }

    fn is_vsync_valid(&self, expected_vsync: Timestamp, uid: Uid) -> bool {
        match self.frame_rate_override(uid) {
            None => true,
            Some(fps) => self
                .vsync_schedule
                .tracker
                .lock()
                .is_vsync_in_phase(expected_vsync, fps),
        }
    }

    // ------------------------------------------------------------------
    // Mode selection
    // ------------------------------------------------------------------

    /// Re-evaluates the refresh rate against the latest content summary.
    pub fn choose_refresh_rate_for_content(&self) {
        if !self.policy.can_switch() {
            return;
        }
        let summary = self
            .layer_history
            .summarize(self.vsync_schedule.clock.now());
        let outcome = {
            let mut features = self.features.lock();
            features.content_requirements = summary;
            self.apply_refresh_rate_policy(&mut features)
        };
        self.emit_decision(outcome);
    }

    /// Compare-and-swaps one timer signal, and when it changed, runs the full
    /// decision pipeline. Returns whether the decision considered touch.
    fn handle_timer_state_changed(&self, update: impl FnOnce(&mut Features) -> bool) -> bool {
        let outcome = {
            let mut features = self.features.lock();
            if !update(&mut features) {
                return false;
            }
            self.apply_refresh_rate_policy(&mut features)
        };
        let touch = outcome.considered.touch;
        self.emit_decision(outcome);
        touch
    }

    /// The decision pipeline. Runs under the feature lock; everything it
    /// decides to emit is returned for dispatch after the lock is released.
    fn apply_refresh_rate_policy(&self, features: &mut Features) -> DecisionOutcome {
        let mut outcome = DecisionOutcome::default();
        let (chosen, considered) = self.calculate_refresh_rate(features);
        outcome.considered = considered;

        // The thermal cap replaces the choice before the last-mode
        // comparison, so a capped decision is not re-emitted every time.
        let chosen = match features.thermal {
            Some(cap) if chosen.fps.greater_than_with_margin(cap.fps) => {
                self.policy.refresh_rate_from_mode_id(cap.mode_id)
            }
            _ => chosen,
        };

        outcome.overrides_changed =
            self.update_frame_rate_overrides(features, considered, chosen.fps);

        if features.mode_id == Some(chosen.mode_id) {
            // Nothing to change, but an earlier idle-suppressed change may
            // still need to be replayed.
            if !considered.idle {
                outcome.replay = self.prepare_cached_mode_replay(features);
            }
        } else {
            features.mode_id = Some(chosen.mode_id);
            if let Some(params) = &mut features.cached_mode_changed_params {
                params.mode_id = chosen.mode_id;
                params.vsync_period = chosen.vsync_period();
            }
            let event = if considered.idle {
                ModeEvent::None
            } else {
                ModeEvent::Changed
            };
            outcome.emit = Some((chosen, event));
        }
        outcome
    }

    fn calculate_refresh_rate(&self, features: &Features) -> (RefreshRate, GlobalSignals) {
        // Outside normal display power operation (and during the grace window
        // after returning to it) the display runs at performance rate.
        if self.display_power_timer.is_some()
            && (!features.is_display_power_state_normal
                || features.display_power_timer == TimerState::Reset)
        {
            return (self.policy.max_refresh_rate_by_policy(), GlobalSignals::default());
        }

        let touch = self.touch_timer.is_some() && features.touch == TouchState::Active;
        let idle = self.idle_timer.is_some() && features.idle_timer == TimerState::Expired;
        self.policy
            .best_refresh_rate(&features.content_requirements, GlobalSignals { touch, idle })
    }

    fn update_frame_rate_overrides(
        &self,
        features: &Features,
        considered: GlobalSignals,
        display_fps: Fps,
    ) -> bool {
        if !self.policy.supports_frame_rate_override() {
            return false;
        }
        // While idle the content-derived map is left untouched.
        if considered.idle {
            return false;
        }
        let new = self.policy.frame_rate_overrides(
            &features.content_requirements,
            display_fps,
            considered.touch,
        );
        self.overrides.lock().replace_by_content(new)
    }

    fn prepare_cached_mode_replay(&self, features: &mut Features) -> Option<ModeChangeParams> {
        let Some(mode_id) = features.mode_id else {
            warn!("no chosen mode, not replaying cached mode event");
            return None;
        };
        let Some(params) = features.cached_mode_changed_params.as_mut() else {
            warn!("no cached mode params, not replaying cached mode event");
            return None;
        };
        // A differing current mode means a change is in flight; its own
        // notification will arrive when it lands.
        if self.policy.current_refresh_rate().mode_id != mode_id {
            return None;
        }
        let vsync_period = self
            .policy
            .refresh_rate_from_mode_id(mode_id)
            .vsync_period();
        if params.mode_id == mode_id && params.vsync_period == vsync_period {
            return None;
        }
        params.mode_id = mode_id;
        params.vsync_period = vsync_period;
        Some(*params)
    }

    fn emit_decision(&self, outcome: DecisionOutcome) {
        if let Some((rate, event)) = outcome.emit {
            self.callback.change_refresh_rate(rate, event);
        }
        if let Some(params) = outcome.replay {
            self.on_non_primary_display_mode_changed(
                params.handle,
                params.display_id,
                params.mode_id,
                params.vsync_period,
            );
        }
        if outcome.overrides_changed {
            self.callback.frame_rate_overrides_changed();
        }
    }

    /// Recomputes and returns the preferred mode under current signals, or
    /// `None` before the first decision.
    pub fn preferred_mode_id(&self) -> Option<DisplayModeId> {
        let mut features = self.features.lock();
        if features.mode_id.is_some() {
            let (chosen, _) = self.calculate_refresh_rate(&features);
            features.mode_id = Some(chosen.mode_id);
        }
        features.mode_id
    }

    /// Installs (or clears, with `fps <= 0`) the thermal cap. The cap's mode
    /// is resolved through the host now so the decision pipeline never calls
    /// out under its lock.
    pub fn update_thermal_fps(&self, fps: f32) {
        self.layer_history.update_thermal_fps(fps);
        let cap = if fps > 0.0 {
            let fps = Fps::from_hz(fps);
            match self.callback.mode_from_fps(fps) {
                Some(mode_id) => Some(ThermalCap { fps, mode_id }),
                None => {
                    warn!("no display mode for thermal cap {fps:?}");
                    None
                }
            }
        } else {
            None
        };
        self.features.lock().thermal = cap;
    }

    // ------------------------------------------------------------------
    // Timer callbacks
    // ------------------------------------------------------------------

    fn idle_timer_callback(&self, state: TimerState) {
        if !self.handle_idle_timeout.load(Ordering::Relaxed) {
            return;
        }
        self.handle_timer_state_changed(|f| {
            if f.idle_timer == state {
                false
            } else {
                f.idle_timer = state;
                true
            }
        });
        trace!("idle timer {state:?}");
    }

    fn kernel_idle_timer_callback(&self, state: TimerState) {
        let threshold = Fps::from_hz(KERNEL_TIMER_FPS_THRESHOLD);
        let rate = self.policy.current_refresh_rate();
        if state == TimerState::Reset && rate.fps.greater_than_with_margin(threshold) {
            // In performance mode the kernel cannot hold the rate through a
            // power collapse, so resync off hardware vsync.
            self.resync_to_hardware_vsync(true, rate.vsync_period(), false);
        } else if state == TimerState::Expired && rate.fps.less_than_or_equal_with_margin(threshold)
        {
            // Nothing is pushing frames; stop the interrupts.
            self.disable_hardware_vsync(false);
        }
        self.callback.kernel_timer_changed(state == TimerState::Expired);
    }

    fn touch_timer_callback(&self, state: TimerState) {
        let touch = if state == TimerState::Reset {
            TouchState::Active
        } else {
            TouchState::Inactive
        };
        let considered_touch = self.handle_timer_state_changed(|f| {
            if f.touch == touch {
                false
            } else {
                f.touch = touch;
                true
            }
        });
        // A touch boost invalidates measured rates; re-seed detection.
        if considered_touch {
            self.layer_history.clear();
        }
        trace!("touch {touch:?}");
    }

    fn display_power_timer_callback(&self, state: TimerState) {
        self.handle_timer_state_changed(|f| {
            if f.display_power_timer == state {
                false
            } else {
                f.display_power_timer = state;
                true
            }
        });
        trace!("display power timer {state:?}");
    }

    // ------------------------------------------------------------------
    // Hardware vsync control
    // ------------------------------------------------------------------

    /// Turns hardware vsync on, if it is off and available. Resets the
    /// timing model so stale samples do not survive the gap.
    pub fn enable_hardware_vsync(&self) {
        let enable = {
            let mut hw = self.hw_vsync.lock();
            if !hw.enabled && hw.available {
                self.vsync_schedule.tracker.lock().reset_model();
                hw.enabled = true;
                true
            } else {
                false
            }
        };
        if enable {
            self.callback.set_vsync_enabled(true);
        }
    }

    /// Turns hardware vsync off; optionally marks it unavailable so nothing
    /// short of a resync with `make_available` can turn it back on.
    pub fn disable_hardware_vsync(&self, make_unavailable: bool) {
        let disable = {
            let mut hw = self.hw_vsync.lock();
            let was_enabled = hw.enabled;
            hw.enabled = false;
            if make_unavailable {
                hw.available = false;
            }
            was_enabled
        };
        if disable {
            self.callback.set_vsync_enabled(false);
        }
    }

    /// Re-syncs the model to hardware vsync at `period`. No-op while
    /// hardware vsync is unavailable (unless `make_available`) or for a
    /// non-positive period.
    pub fn resync_to_hardware_vsync(&self, make_available: bool, period: Duration, force: bool) {
        {
            let mut hw = self.hw_vsync.lock();
            if make_available {
                hw.available = true;
            } else if !hw.available {
                return;
            }
        }
        if !period.is_positive() {
            return;
        }
        self.set_vsync_period(period, force);
    }

    fn set_vsync_period(&self, period: Duration, force: bool) {
        let enable = {
            let mut hw = self.hw_vsync.lock();
            self.vsync_schedule
                .reactor
                .lock()
                .start_period_transition(period);
            if !hw.enabled || force {
                self.vsync_schedule.tracker.lock().reset_model();
                hw.enabled = true;
                true
            } else {
                false
            }
        };
        if enable {
            self.callback.set_vsync_enabled(true);
        }
    }

    /// Requests a resync to the current policy period, collapsing requests
    /// that arrive within the ignore window.
    pub fn resync(&self) {
        let now = self.vsync_schedule.clock.now().nanos();
        let last = self.last_resync_time.swap(now, Ordering::Relaxed);
        if now - last > RESYNC_IGNORE_DELAY.nanos() {
            self.resync_to_hardware_vsync(
                false,
                self.policy.current_refresh_rate().vsync_period(),
                false,
            );
        }
    }

    /// Resync, and when the display had gone idle, wake it back up: repaint
    /// and force a hardware resync at the current period.
    pub fn resync_and_refresh(&self) {
        self.resync();
        if !self.display_idle.load(Ordering::Acquire) {
            return;
        }
        let rate = self.policy.current_refresh_rate();
        self.callback.repaint_everything();
        self.resync_to_hardware_vsync(true, rate.vsync_period(), true);
        self.display_idle.store(false, Ordering::Release);
    }

    /// Feeds a hardware vsync timestamp. Returns whether a pending period
    /// transition was flushed into the model.
    pub fn add_resync_sample(&self, timestamp: Timestamp, composer_period: Option<Duration>) -> bool {
        let (needs_hw_vsync, period_flushed) = {
            let hw = self.hw_vsync.lock();
            if hw.enabled {
                self.vsync_schedule
                    .reactor
                    .lock()
                    .add_hw_vsync_timestamp(timestamp, composer_period)
            } else {
                (false, false)
            }
        };
        if needs_hw_vsync {
            self.enable_hardware_vsync();
        } else {
            self.disable_hardware_vsync(false);
        }
        period_flushed
    }

    /// Feeds a presentation fence.
    pub fn add_present_fence(&self, fence: Arc<dyn PresentFence>) {
        let needs_hw_vsync = self.vsync_schedule.reactor.lock().add_present_fence(fence);
        if needs_hw_vsync {
            self.enable_hardware_vsync();
        } else {
            self.disable_hardware_vsync(false);
        }
    }

    /// Suppresses fence-based model validation.
    pub fn set_ignore_present_fences(&self, ignore: bool) {
        self.vsync_schedule
            .reactor
            .lock()
            .set_ignore_present_fences(ignore);
    }

    // ------------------------------------------------------------------
    // Vsync queries
    // ------------------------------------------------------------------

    /// The next predicted vsync at or after `now`, plus the current period.
    pub fn display_stat_info(&self, now: Timestamp) -> DisplayStatInfo {
        let tracker = self.vsync_schedule.tracker.lock();
        DisplayStatInfo {
            vsync_time: tracker.next_anticipated_vsync_from(now),
            vsync_period: tracker.current_period(),
        }
    }

    /// The vsync preceding an expected present time.
    pub fn previous_vsync_from(&self, expected_present: Timestamp) -> Timestamp {
        expected_present - self.vsync_schedule.tracker.lock().current_period()
    }

    // ------------------------------------------------------------------
    // Vsync injection
    // ------------------------------------------------------------------

    /// Toggles the synthetic vsync source, creating its stream on first use.
    /// Returns the injector's connection handle (the same one every time).
    pub fn enable_vsync_injection(self: &Arc<Self>, enable: bool) -> Option<ConnectionHandle> {
        let mut injector = self.injector.lock();
        if injector.enabled == enable {
            return injector.handle;
        }

        if injector.handle.is_none() {
            let (source, handle_to_source) = InjectVsyncSource::new("injected");
            let stream = EventStream::new(Box::new(source), None, None, None);
            // Streams only deliver vsyncs for a live display; the synthetic
            // stream is always "live".
            stream.on_hotplug(DisplayId(0), true);
            stream.on_screen_acquired();
            let handle = self.register_stream(stream, false);
            injector.handle = Some(handle);
            injector.injector = Some(handle_to_source);
        }

        injector.enabled = enable;
        debug!(
            "{} vsync injection",
            if enable { "enabling" } else { "disabling" }
        );
        injector.handle
    }

    /// Pushes one synthetic vsync event. No-op while injection is disabled.
    pub fn inject_vsync(
        &self,
        when: Timestamp,
        expected_vsync: Timestamp,
        deadline: Timestamp,
    ) -> bool {
        let injector = self.injector.lock();
        if !injector.enabled {
            return false;
        }
        injector
            .injector
            .as_ref()
            .is_some_and(|i| i.inject(when, expected_vsync, deadline))
    }

    // ------------------------------------------------------------------
    // Layer history plumbing
    // ------------------------------------------------------------------

    /// Registers a layer, choosing its vote from the surface kind and the
    /// content-detection setting. Registration happens even with content
    /// detection off; the history serves other consumers too.
    pub fn register_layer(&self, layer: LayerId, kind: SurfaceKind) {
        let vote = if !self.config.use_content_detection || kind == SurfaceKind::StatusBar {
            LayerVoteType::NoVote
        } else if kind == SurfaceKind::Wallpaper {
            // Wallpaper runs at min as part of content detection.
            LayerVoteType::Min
        } else {
            LayerVoteType::Heuristic
        };
        self.layer_history.register_layer(layer, vote);
    }

    /// Stops tracking a layer.
    pub fn deregister_layer(&self, layer: LayerId) {
        self.layer_history.deregister_layer(layer);
    }

    /// Records layer activity, when mode switching is possible at all.
    pub fn record_layer_history(
        &self,
        layer: LayerId,
        present_time: Timestamp,
        update: LayerUpdateType,
    ) {
        if self.policy.can_switch() {
            self.layer_history
                .record(layer, present_time, self.vsync_schedule.clock.now(), update);
        }
    }

    /// Tells the history a mode change is in flight.
    pub fn set_mode_change_pending(&self, pending: bool) {
        self.layer_history.set_mode_change_pending(pending);
    }

    /// Updates the display area used for coverage weighting.
    pub fn on_display_area_changed(&self, area: u32) {
        self.layer_history.set_display_area(area);
    }

    // ------------------------------------------------------------------
    // External signals
    // ------------------------------------------------------------------

    /// Restarts the idle window (e.g. on user activity).
    pub fn reset_idle_timer(&self) {
        if let Some(timer) = &self.idle_timer {
            timer.reset();
        }
    }

    /// Restarts the touch window; with the kernel timer variant the idle
    /// window restarts too.
    pub fn notify_touch_event(&self) {
        if let Some(timer) = &self.touch_timer {
            timer.reset();
            if self.config.support_kernel_timer {
                if let Some(idle) = &self.idle_timer {
                    idle.reset();
                }
            }
        }
    }

    /// Records the display power state. Power events boost to performance
    /// rate, so layer history re-seeds as well.
    pub fn set_display_power_state(&self, normal: bool) {
        self.features.lock().is_display_power_state_normal = normal;
        if let Some(timer) = &self.display_power_timer {
            timer.reset();
        }
        self.layer_history.clear();
    }

    /// Marks the display idle; the next app vsync request wakes it.
    pub fn set_idle_state(&self) {
        self.display_idle.store(true, Ordering::Release);
    }

    /// Gates the user-space idle timer callback.
    pub fn set_handle_idle_timeout(&self, handle: bool) {
        self.handle_idle_timeout.store(handle, Ordering::Relaxed);
    }

    /// Records the host-reported period-change timeline, repainting if one is
    /// required and clamping the applied time to a bounded lookahead.
    pub fn on_new_vsync_period_change_timeline(&self, timeline: VsyncPeriodChangeTimeline) {
        if timeline.refresh_required {
            self.callback.repaint_everything();
        }
        let mut timeline = timeline;
        let max_applied = self.vsync_schedule.clock.now() + MAX_VSYNC_APPLIED_LOOKAHEAD;
        if timeline.applied_time > max_applied {
            timeline.applied_time = max_applied;
        }
        *self.vsync_timeline.lock() = Some(timeline);
    }

    /// Ages the recorded timeline against an actual refresh: clears the
    /// refresh-required flag once satisfied, or asks for another repaint.
    pub fn on_display_refreshed(&self, timestamp: Timestamp) {
        let call_repaint = {
            let mut timeline = self.vsync_timeline.lock();
            match timeline.as_mut() {
                Some(t) if t.refresh_required => {
                    if t.refresh_time < timestamp {
                        t.refresh_required = false;
                        false
                    } else {
                        // The required refresh is still in the future.
                        true
                    }
                }
                _ => false,
            }
        };
        if call_repaint {
            self.callback.repaint_everything();
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Human-readable scheduler state.
    pub fn dump(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(
            out,
            "+  Idle timer: {}",
            self.idle_timer.as_ref().map_or_else(|| "off".into(), OneShotTimer::dump)
        );
        let _ = writeln!(
            out,
            "+  Touch timer: {}",
            self.touch_timer.as_ref().map_or_else(|| "off".into(), OneShotTimer::dump)
        );
        let _ = writeln!(
            out,
            "+  Content detection: {}",
            if self.config.use_content_detection {
                "on"
            } else {
                "off"
            }
        );
        self.overrides.lock().dump(&mut out);
        out
    }

    /// Human-readable vsync machinery state.
    pub fn dump_vsync(&self) -> String {
        format!(
            "VsyncReactor:\n  {}\nVsyncDispatch:\n{}",
            self.vsync_schedule.reactor.lock().dump(),
            self.vsync_schedule.dispatch.dump()
        )
    }
}

fn timer_hook(
    weak: &Weak<Scheduler>,
    hook: impl Fn(&Scheduler) + Send + Sync + 'static,
) -> impl Fn() + Send + Sync + 'static {
    let weak = weak.clone();
    move || {
        if let Some(scheduler) = weak.upgrade() {
            hook(&scheduler);
        }
    }
}
