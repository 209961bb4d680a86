//! Tick callback that logs periodic progress.

use guildhall_core::{GameLoop, TickCallback, TickSummary};
use tracing::{debug, info};

/// Running totals since the last report.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    /// Events dispatched.
    pub events: usize,
    /// Transactions committed.
    pub committed: usize,
    /// Transactions rejected.
    pub rejected: usize,
    /// Decisions put into force.
    pub decisions: usize,
    /// Decision effects that failed validation.
    pub effects_rejected: usize,
}

impl Totals {
    fn add(&mut self, summary: &TickSummary) {
        self.events = self.events.saturating_add(summary.events_dispatched);
        self.committed = self.committed.saturating_add(summary.transactions_committed);
        self.rejected = self.rejected.saturating_add(summary.transactions_rejected);
        self.decisions = self.decisions.saturating_add(summary.decisions_applied);
        self.effects_rejected = self.effects_rejected.saturating_add(summary.effects_rejected);
    }
}

/// Logs a progress line every `every` ticks.
#[derive(Debug)]
pub struct ProgressReport {
    every: u64,
    totals: Totals,
}

impl ProgressReport {
    /// Report every `every` ticks. Zero disables the periodic line.
    pub const fn new(every: u64) -> Self {
        Self {
            every,
            totals: Totals {
                events: 0,
                committed: 0,
                rejected: 0,
                decisions: 0,
                effects_rejected: 0,
            },
        }
    }

    /// Totals accumulated since the last report.
    pub const fn totals(&self) -> Totals {
        self.totals
    }
}

impl TickCallback for ProgressReport {
    fn on_tick(&mut self, summary: &TickSummary, game: &GameLoop) {
        self.totals.add(summary);
        debug!(
            tick = summary.tick,
            events = summary.events_dispatched,
            decisions = summary.decisions_applied,
            requested = summary.decisions_requested,
            "Tick complete"
        );

        let due = summary.tick.checked_rem(self.every).is_some_and(|r| r == 0);
        if !due {
            return;
        }

        let ai = game.ai().stats();
        let cache = game.ai().cache_stats();
        info!(
            tick = summary.tick,
            npcs = summary.npcs,
            state_version = summary.state_version,
            events = self.totals.events,
            committed = self.totals.committed,
            rejected = self.totals.rejected,
            decisions = self.totals.decisions,
            effects_rejected = self.totals.effects_rejected,
            pending = summary.pending_decisions,
            cache_hits = cache.hits,
            cache_misses = cache.misses,
            timeouts = ai.timeouts,
            fallbacks = ai.fallbacks,
            "Progress"
        );
        self.totals = Totals::default();
    }
}
