// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Diagnostics for the cadence scheduling core.
//!
//! [`recorder`] captures the event stream of a connection into memory;
//! [`chrome`] exports a capture as Chrome Trace Event Format JSON for
//! `chrome://tracing` or Perfetto.

pub mod chrome;
pub mod recorder;

pub use recorder::{EventRecorder, RecordedEvent};
