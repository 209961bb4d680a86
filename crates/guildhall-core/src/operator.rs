//! Runtime control of the game loop.
//!
//! [`LoopControl`] is shared (behind an [`Arc`](std::sync::Arc)) between the
//! runner task and whoever drives it: the binary's signal handler, a test, or
//! a presentation layer. Pause, resume, and stop are lock-free atomics read
//! once per frame.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};

/// Reason why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopEndReason {
    /// Reached the configured `max_ticks` limit.
    MaxTicksReached,
    /// A stop was requested.
    OperatorStop,
}

/// Shared loop control state.
#[derive(Debug)]
pub struct LoopControl {
    /// Whether the loop is currently paused.
    paused: AtomicBool,

    /// Notification used to wake the loop when resumed.
    resume_notify: Notify,

    /// Whether a stop has been requested.
    stop_requested: AtomicBool,

    /// Notification used to interrupt a paused or sleeping loop on stop.
    stop_notify: Notify,

    /// Wall-clock time when the loop was created.
    started_at: DateTime<Utc>,

    /// Maximum number of ticks (0 = unlimited).
    max_ticks: u64,

    /// Reason the loop ended, if it has.
    end_reason: Mutex<Option<LoopEndReason>>,
}

impl LoopControl {
    /// Control state bounded to `max_ticks` (0 = unlimited).
    pub fn new(max_ticks: u64) -> Self {
        Self {
            paused: AtomicBool::new(false),
            resume_notify: Notify::new(),
            stop_requested: AtomicBool::new(false),
            stop_notify: Notify::new(),
            started_at: Utc::now(),
            max_ticks,
            end_reason: Mutex::new(None),
        }
    }

    // -----------------------------------------------------------------------
    // Pause / Resume
    // -----------------------------------------------------------------------

    /// Check whether the loop is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Pause the loop. It finishes the current frame, then sleeps.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Resume the loop and wake it.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.resume_notify.notify_one();
    }

    /// Wait until the loop is no longer paused or a stop is requested.
    pub async fn wait_if_paused(&self) {
        while self.is_paused() && !self.is_stop_requested() {
            tokio::select! {
                () = self.resume_notify.notified() => {}
                () = self.stop_notify.notified() => {}
            }
        }
    }

    // -----------------------------------------------------------------------
    // Stop
    // -----------------------------------------------------------------------

    /// Request a clean stop after the current frame.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.stop_notify.notify_one();
    }

    /// Check whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Record the reason the loop ended.
    pub async fn set_end_reason(&self, reason: LoopEndReason) {
        let mut guard = self.end_reason.lock().await;
        *guard = Some(reason);
    }

    /// Get the reason the loop ended, if it has.
    pub async fn end_reason(&self) -> Option<LoopEndReason> {
        *self.end_reason.lock().await
    }

    // -----------------------------------------------------------------------
    // Boundaries
    // -----------------------------------------------------------------------

    /// Returns `true` if `max_ticks > 0` and `current_tick >= max_ticks`.
    pub const fn tick_limit_reached(&self, current_tick: u64) -> bool {
        self.max_ticks > 0 && current_tick >= self.max_ticks
    }

    /// Get the configured max ticks.
    pub const fn max_ticks(&self) -> u64 {
        self.max_ticks
    }

    /// Return the wall-clock start time.
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Return elapsed seconds since the control was created.
    pub fn elapsed_seconds(&self) -> u64 {
        let elapsed = Utc::now()
            .signed_duration_since(self.started_at)
            .num_seconds();
        u64::try_from(elapsed.max(0)).unwrap_or(u64::MAX)
    }

    /// Snapshot of the control state for display.
    pub async fn status(&self, tick: u64, npcs: usize, state_version: u64) -> LoopStatus {
        LoopStatus {
            tick,
            paused: self.is_paused(),
            stop_requested: self.is_stop_requested(),
            elapsed_seconds: self.elapsed_seconds(),
            max_ticks: self.max_ticks,
            npcs,
            state_version,
            end_reason: self.end_reason().await,
            started_at: self.started_at.to_rfc3339(),
        }
    }
}

/// JSON-serializable status of the loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStatus {
    /// Current tick number.
    pub tick: u64,
    /// Whether the loop is paused.
    pub paused: bool,
    /// Whether a stop has been requested.
    pub stop_requested: bool,
    /// Elapsed wall-clock seconds since start.
    pub elapsed_seconds: u64,
    /// Configured maximum ticks (0 = unlimited).
    pub max_ticks: u64,
    /// NPCs in the committed state.
    pub npcs: usize,
    /// Committed state version.
    pub state_version: u64,
    /// The reason the loop ended, if applicable.
    pub end_reason: Option<LoopEndReason>,
    /// ISO 8601 timestamp of when the loop started.
    pub started_at: String,
}
