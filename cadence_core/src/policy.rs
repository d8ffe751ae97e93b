// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Contracts for the external refresh-rate policy and layer history.
//!
//! The core does not decide *which* refresh rate fits a set of layers; it
//! feeds content summaries and global signals to a [`RefreshRatePolicy`] and
//! acts on the answer. Likewise the per-layer activity heuristic lives behind
//! [`LayerHistory`]; the core only shuttles its [`ContentSummary`] into the
//! policy, throttles how often that happens, and forwards lifecycle events.
//!
//! Implementations are expected to synchronize internally; every method takes
//! `&self` and may be called from multiple scheduler threads.

use crate::overrides::Uid;
use crate::rate::{DisplayModeId, Fps, RefreshRate};
use crate::time::Timestamp;

/// Global (non-content) inputs the policy considered for a decision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GlobalSignals {
    /// The user is interacting with the device.
    pub touch: bool,
    /// The display has been idle past the inactivity window.
    pub idle: bool,
}

/// How a layer participates in refresh-rate voting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerVoteType {
    /// The layer has no say (status-bar-like surfaces, or content detection
    /// disabled).
    NoVote,
    /// The layer is content that prefers the minimum rate (e.g. wallpaper).
    Min,
    /// The layer's rate is inferred from its update pattern.
    Heuristic,
}

/// Identifies a layer for history bookkeeping.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct LayerId(pub u64);

/// Coarse classification of a surface, used to pick its vote type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceKind {
    /// Persistent chrome that should not drive the refresh rate.
    StatusBar,
    /// Wallpaper-like background content.
    Wallpaper,
    /// Ordinary application content.
    Application,
}

/// What kind of layer activity a history record describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerUpdateType {
    /// A new buffer was queued.
    Buffer,
    /// An animation transaction touched the layer.
    Animation,
    /// The layer's explicit frame rate changed.
    FrameRate,
}

/// One layer's contribution to the content summary.
#[derive(Clone, Debug)]
pub struct LayerRequirement {
    /// Diagnostic layer name.
    pub name: String,
    /// Owning application.
    pub uid: Uid,
    /// How the layer votes.
    pub vote: LayerVoteType,
    /// The rate the layer wants, when it knows one.
    pub desired_refresh_rate: Option<Fps>,
    /// Relative weight among voting layers, 0.0 to 1.0.
    pub weight: f32,
}

/// Aggregated per-layer requirements produced by [`LayerHistory::summarize`].
pub type ContentSummary = Vec<LayerRequirement>;

/// Pure mapping from (content, signals, mode table) to a chosen mode.
pub trait RefreshRatePolicy: Send + Sync {
    /// The rate of the mode the display is currently running.
    fn current_refresh_rate(&self) -> RefreshRate;

    /// The rate belonging to a specific mode.
    fn refresh_rate_from_mode_id(&self, id: DisplayModeId) -> RefreshRate;

    /// The fastest rate the current policy allows.
    fn max_refresh_rate_by_policy(&self) -> RefreshRate;

    /// Chooses the best rate for the given content and signals, and reports
    /// which signals actually influenced the choice.
    fn best_refresh_rate(
        &self,
        content: &ContentSummary,
        signals: GlobalSignals,
    ) -> (RefreshRate, GlobalSignals);

    /// Derives per-application frame-rate caps from the content summary.
    fn frame_rate_overrides(
        &self,
        content: &ContentSummary,
        display_fps: Fps,
        touch: bool,
    ) -> Vec<(Uid, Fps)>;

    /// Whether per-application overrides are supported at all.
    fn supports_frame_rate_override(&self) -> bool;

    /// Whether the display has more than one selectable mode.
    fn can_switch(&self) -> bool;
}

/// The layer activity heuristic.
pub trait LayerHistory: Send + Sync {
    /// Starts tracking a layer with the given vote type.
    fn register_layer(&self, layer: LayerId, vote: LayerVoteType);

    /// Stops tracking a layer.
    fn deregister_layer(&self, layer: LayerId);

    /// Records one activity event for a layer.
    fn record(
        &self,
        layer: LayerId,
        present_time: Timestamp,
        now: Timestamp,
        update: LayerUpdateType,
    );

    /// Produces the current content summary.
    fn summarize(&self, now: Timestamp) -> ContentSummary;

    /// Tells the history a mode change is in flight, so rates measured across
    /// the switch are not trusted.
    fn set_mode_change_pending(&self, pending: bool);

    /// Updates the display area used to weigh layer coverage.
    fn set_display_area(&self, area: u32);

    /// Propagates the thermal cap into the heuristic.
    fn update_thermal_fps(&self, fps: f32);

    /// Drops all accumulated activity so rate detection re-seeds.
    fn clear(&self);
}
