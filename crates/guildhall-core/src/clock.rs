//! Tick counter and fixed-timestep accumulator.
//!
//! The [`TickClock`] is the single source of truth for "what tick is it".
//! The [`FixedStep`] accumulator converts variable wall-clock frame deltas
//! into a whole number of fixed-length logic ticks.
//!
//! # Design Principles
//!
//! - All counter arithmetic is checked (no silent overflow).
//! - A single frame never runs more than `max_ticks_per_frame` ticks. Time
//!   beyond that bound is dropped rather than carried, so a long stall cannot
//!   snowball into ever-longer catch-up frames.

use std::time::Duration;

/// Errors that can occur during clock operations.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Tick counter would overflow.
    #[error("tick counter overflow: cannot advance beyond u64::MAX")]
    TickOverflow,

    /// The fixed step has zero length.
    #[error("fixed step must be longer than zero")]
    ZeroStep,
}

/// Monotonic tick counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickClock {
    /// Last tick started (0 before the first tick).
    tick: u64,
}

impl TickClock {
    /// A clock that has not ticked yet.
    pub const fn new() -> Self {
        Self { tick: 0 }
    }

    /// Resume counting from a known tick, e.g. after restoring a snapshot.
    pub const fn from_tick(tick: u64) -> Self {
        Self { tick }
    }

    /// Advance by one tick and return the new tick number.
    pub fn advance(&mut self) -> Result<u64, ClockError> {
        self.tick = self.tick.checked_add(1).ok_or(ClockError::TickOverflow)?;
        Ok(self.tick)
    }

    /// The current tick.
    pub const fn tick(&self) -> u64 {
        self.tick
    }
}

/// What one frame of wall time turned into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePlan {
    /// Logic ticks to run this frame.
    pub ticks: u32,
    /// Wall time discarded by the spiral-of-death guard.
    pub dropped: Duration,
    /// Leftover fraction of a step, in `[0, 1)`, for render interpolation.
    pub alpha: f64,
}

/// Fixed-timestep accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedStep {
    step: Duration,
    max_ticks_per_frame: u32,
    accumulator: Duration,
}

impl FixedStep {
    /// Create an accumulator for steps of `step`, capped at
    /// `max_ticks_per_frame` per frame.
    pub fn new(step: Duration, max_ticks_per_frame: u32) -> Result<Self, ClockError> {
        if step.is_zero() {
            return Err(ClockError::ZeroStep);
        }
        Ok(Self {
            step,
            max_ticks_per_frame: max_ticks_per_frame.max(1),
            accumulator: Duration::ZERO,
        })
    }

    /// Length of one logic tick.
    pub const fn step(&self) -> Duration {
        self.step
    }

    /// Time carried over towards the next tick.
    pub const fn accumulated(&self) -> Duration {
        self.accumulator
    }

    /// Add `wall_delta` and decide how many ticks this frame runs.
    pub fn accumulate(&mut self, wall_delta: Duration) -> FramePlan {
        self.accumulator = self.accumulator.saturating_add(wall_delta);

        let whole = self
            .accumulator
            .as_nanos()
            .checked_div(self.step.as_nanos())
            .unwrap_or(0);
        let cap = u128::from(self.max_ticks_per_frame);
        let run = whole.min(cap);
        let ticks = u32::try_from(run).unwrap_or(self.max_ticks_per_frame);

        self.accumulator = self
            .accumulator
            .saturating_sub(self.step.saturating_mul(ticks));

        let mut dropped = Duration::ZERO;
        if whole > cap {
            // Keep only the partial step; everything whole beyond the cap goes.
            let partial = duration_rem(self.accumulator, self.step);
            dropped = self.accumulator.saturating_sub(partial);
            self.accumulator = partial;
        }

        FramePlan {
            ticks,
            dropped,
            alpha: self.alpha(),
        }
    }

    /// Fraction of a step currently accumulated.
    pub fn alpha(&self) -> f64 {
        (self.accumulator.as_secs_f64() / self.step.as_secs_f64()).clamp(0.0, 1.0)
    }

    /// Forget any carried time.
    pub const fn reset(&mut self) {
        self.accumulator = Duration::ZERO;
    }
}

fn duration_rem(value: Duration, step: Duration) -> Duration {
    let rem = value.as_nanos().checked_rem(step.as_nanos()).unwrap_or(0);
    // The remainder is below `step`, which itself fits in a Duration.
    u64::try_from(rem).map_or(Duration::ZERO, Duration::from_nanos)
}
