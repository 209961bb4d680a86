//! Game loop runner with operator controls.
//!
//! [`run_loop`] drives [`GameLoop::advance`] from a tokio interval, feeding
//! it the measured wall time between frames, with support for:
//!
//! - **Bounded runs**: stop after `max_ticks`
//! - **Pause/resume**: time spent paused is not caught up afterwards
//! - **Clean shutdown**: stop after the current frame on request

use std::sync::Arc;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::operator::{LoopControl, LoopEndReason};
use crate::tick::{GameLoop, TickError, TickSummary};

/// Errors that can occur during a run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A tick execution failed.
    #[error("tick error: {source}")]
    Tick {
        /// The underlying tick error.
        #[from]
        source: TickError,
    },
}

/// Result of a run.
#[derive(Debug)]
pub struct RunResult {
    /// The reason the run ended.
    pub end_reason: LoopEndReason,
    /// The last tick summary, if any tick completed.
    pub final_summary: Option<TickSummary>,
    /// Total number of ticks executed by this run.
    pub total_ticks: u64,
}

/// Callback invoked after each tick completes.
///
/// Ticks of one frame run back to back; the callback for each of them sees
/// the loop as it stands at the end of that frame.
pub trait TickCallback: Send {
    /// Called after a tick completes successfully.
    fn on_tick(&mut self, summary: &TickSummary, game: &GameLoop);
}

/// A no-op tick callback.
pub struct NoOpCallback;

impl TickCallback for NoOpCallback {
    fn on_tick(&mut self, _summary: &TickSummary, _game: &GameLoop) {}
}

/// Run the loop until the tick limit is reached or a stop is requested.
///
/// # Errors
///
/// Returns [`RunnerError`] if a tick fails unrecoverably.
pub async fn run_loop(
    game: &mut GameLoop,
    control: &Arc<LoopControl>,
    callback: &mut dyn TickCallback,
) -> Result<RunResult, RunnerError> {
    let mut last_summary: Option<TickSummary> = None;
    let mut total_ticks: u64 = 0;
    let limit = (control.max_ticks() > 0).then(|| control.max_ticks());

    let step = game.step();
    let mut interval = tokio::time::interval(step);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_frame = Instant::now();

    info!(
        max_ticks = control.max_ticks(),
        step_ms = u64::try_from(step.as_millis()).unwrap_or(u64::MAX),
        start_tick = game.tick(),
        "Game loop starting"
    );

    loop {
        // --- Check pause ---
        if control.is_paused() {
            info!(tick = game.tick(), "Game loop paused, waiting for resume...");
            control.wait_if_paused().await;
            info!(tick = game.tick(), "Game loop resumed");
            last_frame = Instant::now();
            interval.reset();
        }

        // --- Check stop request (before frame) ---
        if control.is_stop_requested() {
            info!(tick = game.tick(), "Stop requested");
            return finish(control, LoopEndReason::OperatorStop, last_summary, total_ticks).await;
        }

        interval.tick().await;
        let now = Instant::now();
        let wall_delta = now.saturating_duration_since(last_frame);
        last_frame = now;

        // --- Execute frame ---
        let frame = game.advance_until(wall_delta, limit)?;
        for summary in frame.summaries {
            total_ticks = total_ticks.saturating_add(1);
            callback.on_tick(&summary, game);
            last_summary = Some(summary);
        }

        // --- Check tick limit (after frame) ---
        if control.tick_limit_reached(game.tick()) {
            info!(tick = game.tick(), max_ticks = control.max_ticks(), "Tick limit reached");
            return finish(control, LoopEndReason::MaxTicksReached, last_summary, total_ticks).await;
        }
    }
}

async fn finish(
    control: &LoopControl,
    reason: LoopEndReason,
    final_summary: Option<TickSummary>,
    total_ticks: u64,
) -> Result<RunResult, RunnerError> {
    control.set_end_reason(reason).await;
    Ok(RunResult {
        end_reason: reason,
        final_summary,
        total_ticks,
    })
}

/// Log the end of a run.
pub fn log_run_end(result: &RunResult) {
    info!(
        reason = ?result.end_reason,
        total_ticks = result.total_ticks,
        final_tick = result.final_summary.as_ref().map(|s| s.tick),
        "Game loop ended"
    );

    if let Some(ref summary) = result.final_summary {
        info!(
            tick = summary.tick,
            npcs = summary.npcs,
            state_version = summary.state_version,
            pending_decisions = summary.pending_decisions,
            "Final tick summary"
        );
    } else {
        warn!("Game loop ended with no ticks executed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use guildhall_ai::{AiConfig, AiEngine};
    use guildhall_state::StateManager;
    use tokio::runtime::Handle;

    use super::*;
    use crate::config::KernelConfig;

    fn fast_game() -> GameLoop {
        let config = KernelConfig::parse("loop:\n  tick_rate_hz: 200\n").unwrap();
        let ai = AiEngine::builder(AiConfig::default(), Handle::current()).build();
        GameLoop::new(&config, StateManager::with_default_validators(), ai).unwrap()
    }

    struct Counting(u64);

    impl TickCallback for Counting {
        fn on_tick(&mut self, summary: &TickSummary, _game: &GameLoop) {
            self.0 = summary.tick;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stops_exactly_at_tick_limit() {
        let mut game = fast_game();
        let control = Arc::new(LoopControl::new(7));
        let mut callback = Counting(0);

        let result = run_loop(&mut game, &control, &mut callback).await.unwrap();
        assert_eq!(result.end_reason, LoopEndReason::MaxTicksReached);
        assert_eq!(result.total_ticks, 7);
        assert_eq!(game.tick(), 7);
        assert_eq!(callback.0, 7);
        assert_eq!(control.end_reason().await, Some(LoopEndReason::MaxTicksReached));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_before_start_runs_nothing() {
        let mut game = fast_game();
        let control = Arc::new(LoopControl::new(0));
        control.request_stop();

        let result = run_loop(&mut game, &control, &mut NoOpCallback).await.unwrap();
        assert_eq!(result.end_reason, LoopEndReason::OperatorStop);
        assert_eq!(result.total_ticks, 0);
        assert!(result.final_summary.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_interrupts_an_unbounded_run() {
        let mut game = fast_game();
        let control = Arc::new(LoopControl::new(0));
        let stopper = Arc::clone(&control);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            stopper.request_stop();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run_loop(&mut game, &control, &mut NoOpCallback),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(result.end_reason, LoopEndReason::OperatorStop);
        assert!(result.total_ticks > 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn paused_loop_resumes() {
        let mut game = fast_game();
        let control = Arc::new(LoopControl::new(3));
        control.pause();
        let resumer = Arc::clone(&control);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            resumer.resume();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run_loop(&mut game, &control, &mut NoOpCallback),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(result.end_reason, LoopEndReason::MaxTicksReached);
        assert_eq!(result.total_ticks, 3);
    }
}
