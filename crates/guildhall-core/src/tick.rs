//! Tick cycle: the fixed-order phases that drive the Guildhall kernel.
//!
//! Each tick runs through these phases, in this order:
//!
//! 1. **Clock** -- advance the tick counter.
//! 2. **Intake** -- turn queued [`InputCommand`]s into events.
//! 3. **Dispatch** -- drain one event batch and run its handlers.
//! 4. **Transactions** -- apply queued transactions in submission order;
//!    rejections are announced as `state.transaction.rejected` events.
//! 5. **Reconcile** -- poll outstanding AI decisions. Decisions first seen
//!    resolved on an earlier tick are folded into one transaction; stale
//!    results and results for removed NPCs are dropped. Each applied
//!    decision's effect then runs in its own transaction and its reward is
//!    reported back to the AI engine.
//! 6. **Request** -- ask the AI engine to decide for every NPC whose current
//!    action has lapsed.
//! 7. **Maintenance** -- periodic learning, cache sweep, and snapshot.
//!
//! Every committed transaction, whatever phase it came from, publishes one
//! `state.<entity>.<change>` event per entity-level change. Those events are
//! dispatched on the following tick.
//!
//! [`InputCommand`]: crate::queue::InputCommand

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use guildhall_ai::{AiEngine, DecisionHandle, Outcome};
use guildhall_events::{Event, EventPool, InvalidEventError, Priority};
use guildhall_state::{
    Snapshot, SnapshotError, SnapshotHistory, StateDiff, StateManager, StateOp, Transaction,
    TransactionError, TransactionResult,
};
use guildhall_types::{ActionKind, Decision, NpcId, clamp_confidence};

use crate::clock::{ClockError, FixedStep, TickClock};
use crate::config::KernelConfig;
use crate::queue::{InputQueue, TransactionQueue, install_transaction_translator};
use crate::resolve::{self, REJECTED_REWARD};
use crate::situation::SituationBuilder;

/// Event announcing a rejected transaction.
pub const TRANSACTION_REJECTED_EVENT: &str = "state.transaction.rejected";

/// Label of the per-tick transaction that assigns AI decisions.
pub const DECISION_APPLY_LABEL: &str = "ai.apply";

/// Label of an action-effect transaction.
pub const EFFECT_LABEL: &str = "ai.effect";

/// Errors that can occur during tick execution.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// A clock operation failed.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },

    /// The state manager refused a transaction outright.
    #[error("transaction error: {source}")]
    Transaction {
        /// The underlying transaction error.
        #[from]
        source: TransactionError,
    },

    /// A periodic snapshot could not be taken.
    #[error("snapshot error: {source}")]
    Snapshot {
        /// The underlying snapshot error.
        #[from]
        source: SnapshotError,
    },

    /// Wiring a built-in event handler failed.
    #[error("event error: {source}")]
    Events {
        /// The underlying event error.
        #[from]
        source: InvalidEventError,
    },
}

/// Summary of a single tick's execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// The tick number that was executed.
    pub tick: u64,
    /// Input commands accepted as events.
    pub inputs_accepted: usize,
    /// Input commands rejected as malformed.
    pub inputs_rejected: usize,
    /// Events dispatched this tick.
    pub events_dispatched: usize,
    /// Handlers that failed or panicked.
    pub handler_failures: usize,
    /// Queued transactions that committed.
    pub transactions_committed: usize,
    /// Queued transactions that were rejected.
    pub transactions_rejected: usize,
    /// AI decisions assigned to NPCs.
    pub decisions_applied: usize,
    /// AI decisions dropped as stale, expired, or orphaned.
    pub decisions_discarded: usize,
    /// Action effects whose preconditions failed or whose transaction was rejected.
    pub effects_rejected: usize,
    /// New decision requests issued.
    pub decisions_requested: usize,
    /// Decisions still outstanding at end of tick.
    pub pending_decisions: usize,
    /// NPCs alive at end of tick.
    pub npcs: usize,
    /// Committed state version at end of tick.
    pub state_version: u64,
    /// Whether a periodic snapshot was taken.
    pub snapshot_taken: bool,
    /// Whether a learning pass was started.
    pub learning_started: bool,
    /// Expired cache entries removed by the periodic sweep.
    pub cache_swept: usize,
}

/// What one [`GameLoop::advance`] call did.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    /// Ticks executed.
    pub ticks_run: u32,
    /// Leftover step fraction for render interpolation.
    pub alpha: f64,
    /// Wall time discarded because the frame exceeded its tick budget.
    pub dropped: Duration,
    /// One summary per executed tick.
    pub summaries: Vec<TickSummary>,
}

/// Interval settings read once from configuration.
#[derive(Debug, Clone, Copy)]
struct LoopSettings {
    event_batch_size: usize,
    learning_interval: u64,
    sweep_interval: u64,
    snapshot_interval: u64,
}

impl LoopSettings {
    const fn from_config(config: &KernelConfig) -> Self {
        Self {
            event_batch_size: config.events.batch_size,
            learning_interval: config.ai.learning_interval_ticks,
            sweep_interval: config.cache.sweep_interval_ticks,
            snapshot_interval: config.state.snapshot_interval_ticks,
        }
    }
}

#[derive(Debug)]
struct PendingDecision {
    handle: DecisionHandle,
    /// First tick the handle was seen resolved.
    observed_at: Option<u64>,
}

/// The fixed-timestep scheduler and owner of the tick thread's state.
pub struct GameLoop {
    clock: TickClock,
    stepper: FixedStep,
    events: EventPool,
    state: StateManager,
    ai: AiEngine,
    situations: SituationBuilder,
    transactions: TransactionQueue,
    inputs: InputQueue,
    pending: BTreeMap<NpcId, PendingDecision>,
    snapshots: SnapshotHistory,
    settings: LoopSettings,
}

impl std::fmt::Debug for GameLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameLoop")
            .field("tick", &self.clock.tick())
            .field("version", &self.state.version())
            .field("pending", &self.pending.len())
            .field("snapshots", &self.snapshots.len())
            .finish_non_exhaustive()
    }
}

impl GameLoop {
    /// Wire a loop around `state` and `ai`.
    ///
    /// Installs the `command.transaction.submit` translator and a diff
    /// subscriber that publishes state-change events.
    pub fn new(config: &KernelConfig, mut state: StateManager, ai: AiEngine) -> Result<Self, TickError> {
        let stepper = FixedStep::new(config.tick_duration(), config.game_loop.max_ticks_per_frame)?;
        let events = EventPool::new();
        let transactions = TransactionQueue::new();
        install_transaction_translator(&events, transactions.clone())?;

        let sink = events.clone();
        state.subscribe_diffs(move |diff| publish_diff(&sink, diff));

        Ok(Self {
            clock: TickClock::new(),
            stepper,
            events,
            state,
            ai,
            situations: SituationBuilder::default(),
            transactions,
            inputs: InputQueue::new(),
            pending: BTreeMap::new(),
            snapshots: SnapshotHistory::new(config.state.snapshot_retention),
            settings: LoopSettings::from_config(config),
        })
    }

    /// Replace the situation builder.
    #[must_use]
    pub const fn with_situations(mut self, situations: SituationBuilder) -> Self {
        self.situations = situations;
        self
    }

    // -----------------------------------------------------------------------
    // Driving
    // -----------------------------------------------------------------------

    /// Feed `wall_delta` of real time and run as many ticks as it covers,
    /// up to the per-frame cap.
    pub fn advance(&mut self, wall_delta: Duration) -> Result<FrameReport, TickError> {
        self.advance_until(wall_delta, None)
    }

    /// Like [`advance`](Self::advance), but never runs past `last_tick`.
    ///
    /// Planned ticks beyond the bound are skipped and their time discarded.
    pub fn advance_until(
        &mut self,
        wall_delta: Duration,
        last_tick: Option<u64>,
    ) -> Result<FrameReport, TickError> {
        let mut plan = self.stepper.accumulate(wall_delta);
        if let Some(last) = last_tick {
            let remaining = last.saturating_sub(self.clock.tick());
            plan.ticks = u32::try_from(remaining).map_or(plan.ticks, |r| plan.ticks.min(r));
        }
        if !plan.dropped.is_zero() {
            warn!(
                tick = self.clock.tick(),
                dropped = ?plan.dropped,
                ticks = plan.ticks,
                "Frame over budget, dropping time"
            );
        }
        let summaries = (0..plan.ticks)
            .map(|_| self.run_tick())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FrameReport {
            ticks_run: plan.ticks,
            alpha: plan.alpha,
            dropped: plan.dropped,
            summaries,
        })
    }

    /// Execute one tick.
    pub fn run_tick(&mut self) -> Result<TickSummary, TickError> {
        let tick = self.clock.advance()?;
        let mut summary = TickSummary {
            tick,
            ..TickSummary::default()
        };
        debug!(tick, "Tick started");

        self.phase_intake(&mut summary);
        self.phase_dispatch(&mut summary);
        self.phase_transactions(&mut summary);
        self.phase_reconcile(&mut summary)?;
        self.phase_request(&mut summary);
        self.phase_maintenance(&mut summary)?;

        summary.npcs = self.state.current().npcs.len();
        summary.state_version = self.state.version();
        summary.pending_decisions = self.pending.len();
        debug!(
            tick,
            events = summary.events_dispatched,
            committed = summary.transactions_committed,
            rejected = summary.transactions_rejected,
            applied = summary.decisions_applied,
            requested = summary.decisions_requested,
            pending = summary.pending_decisions,
            "Tick complete"
        );
        Ok(summary)
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    fn phase_intake(&self, summary: &mut TickSummary) {
        for command in self.inputs.drain() {
            let name = command.name.clone();
            match command.into_event().and_then(|event| self.events.publish(event)) {
                Ok(_) => summary.inputs_accepted = summary.inputs_accepted.saturating_add(1),
                Err(error) => {
                    summary.inputs_rejected = summary.inputs_rejected.saturating_add(1);
                    warn!(tick = summary.tick, name = %name, %error, "Input command rejected");
                }
            }
        }
    }

    fn phase_dispatch(&self, summary: &mut TickSummary) {
        let report = self.events.process_batch(self.settings.event_batch_size);
        summary.events_dispatched = report.events;
        summary.handler_failures = report.failures.len();
    }

    fn phase_transactions(&mut self, summary: &mut TickSummary) {
        for mut tx in self.transactions.drain() {
            match self.state.execute_transaction(&mut tx) {
                Ok(result) if result.success => {
                    summary.transactions_committed = summary.transactions_committed.saturating_add(1);
                }
                Ok(result) => {
                    summary.transactions_rejected = summary.transactions_rejected.saturating_add(1);
                    self.publish_rejection(&tx, &result);
                }
                Err(error) => {
                    summary.transactions_rejected = summary.transactions_rejected.saturating_add(1);
                    warn!(tick = summary.tick, %error, "Queued transaction refused");
                }
            }
        }
    }

    fn phase_reconcile(&mut self, summary: &mut TickSummary) -> Result<(), TickError> {
        let tick = summary.tick;
        let state = self.state.current();
        let ai = &self.ai;
        let mut discarded = 0_usize;
        let mut ready: Vec<(NpcId, Decision)> = Vec::new();

        self.pending.retain(|npc, pending| {
            if pending.handle.is_stale() || state.npc(*npc).is_none() {
                ai.cancel(*npc);
                discarded = discarded.saturating_add(1);
                return false;
            }
            match pending.observed_at {
                Some(seen) if seen < tick => {
                    match pending.handle.try_get() {
                        Some(decision) if decision.is_valid_at(tick) => ready.push((*npc, decision)),
                        _ => discarded = discarded.saturating_add(1),
                    }
                    false
                }
                Some(_) => true,
                None => {
                    if pending.handle.is_ready() {
                        pending.observed_at = Some(tick);
                    }
                    true
                }
            }
        });
        summary.decisions_discarded = discarded;
        if ready.is_empty() {
            return Ok(());
        }

        let ops = ready
            .iter()
            .map(|(npc, decision)| StateOp::AssignAction {
                npc: *npc,
                action: decision.action,
                confidence_pct: confidence_pct(decision.confidence),
                assigned_at: tick,
                valid_until: decision.valid_until,
            })
            .collect();
        let mut tx = Transaction::new(ops).with_label(DECISION_APPLY_LABEL);
        let result = self.state.execute_transaction(&mut tx)?;
        if !result.success {
            summary.decisions_discarded = summary.decisions_discarded.saturating_add(ready.len());
            self.publish_rejection(&tx, &result);
            return Ok(());
        }
        summary.decisions_applied = ready.len();

        for (npc, decision) in &ready {
            self.apply_effect(*npc, &decision.action, summary)?;
        }
        Ok(())
    }

    fn apply_effect(
        &mut self,
        npc: NpcId,
        action: &ActionKind,
        summary: &mut TickSummary,
    ) -> Result<(), TickError> {
        let current = self.state.current();
        let reward = match resolve::resolve(&current, npc, action) {
            None => {
                summary.effects_rejected = summary.effects_rejected.saturating_add(1);
                debug!(tick = summary.tick, npc = %npc, ?action, "Action no longer applicable");
                REJECTED_REWARD
            }
            Some(resolution) if resolution.ops.is_empty() => resolution.reward,
            Some(resolution) => {
                let mut tx = Transaction::new(resolution.ops).with_label(EFFECT_LABEL);
                let result = self.state.execute_transaction(&mut tx)?;
                if result.success {
                    resolution.reward
                } else {
                    summary.effects_rejected = summary.effects_rejected.saturating_add(1);
                    self.publish_rejection(&tx, &result);
                    REJECTED_REWARD
                }
            }
        };
        self.ai.record_outcome(
            npc,
            Outcome {
                reward,
                observed_at: summary.tick,
            },
        );
        Ok(())
    }

    fn phase_request(&mut self, summary: &mut TickSummary) {
        let tick = summary.tick;
        let state = self.state.current();
        for npc in state.npcs.values() {
            if !npc.needs_decision(tick) || self.pending.contains_key(&npc.id) {
                continue;
            }
            let Some(situation) = self.situations.build(&state, npc.id, tick) else {
                continue;
            };
            let handle = self.ai.request_decision(npc.id, situation);
            let observed_at = handle.is_ready().then_some(tick);
            self.pending.insert(npc.id, PendingDecision { handle, observed_at });
            summary.decisions_requested = summary.decisions_requested.saturating_add(1);
        }
    }

    fn phase_maintenance(&mut self, summary: &mut TickSummary) -> Result<(), TickError> {
        let tick = summary.tick;
        if every(tick, self.settings.learning_interval) {
            summary.learning_started = self.ai.spawn_learning().is_some();
        }
        if every(tick, self.settings.sweep_interval) {
            summary.cache_swept = self.ai.sweep_cache(tick);
        }
        if every(tick, self.settings.snapshot_interval) {
            let snapshot = self.state.create_snapshot()?;
            info!(
                tick,
                snapshot = %snapshot.id,
                version = snapshot.version,
                "Periodic snapshot taken"
            );
            self.snapshots.push(snapshot);
            summary.snapshot_taken = true;
        }
        Ok(())
    }

    fn publish_rejection(&self, tx: &Transaction, result: &TransactionResult) {
        warn!(
            tick = self.clock.tick(),
            transaction = %result.transaction_id,
            label = tx.label().unwrap_or_default(),
            summary = result.failure_summary().unwrap_or_default(),
            "Transaction rejected"
        );
        let payload = json!({
            "transaction_id": result.transaction_id,
            "label": tx.label(),
            "validators": result.failed_validators(),
            "summary": result.failure_summary(),
        });
        let published = Event::new(TRANSACTION_REJECTED_EVENT, payload)
            .and_then(|event| self.events.publish(event.with_priority(Priority::High)));
        if let Err(error) = published {
            warn!(%error, "Failed to publish rejection event");
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Take a snapshot of the current state outside the periodic schedule.
    pub fn snapshot_now(&mut self) -> Result<Snapshot, SnapshotError> {
        let snapshot = self.state.create_snapshot()?;
        self.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    /// Restore `snapshot` and drop every outstanding decision, which was
    /// computed against the state being replaced.
    pub fn restore_snapshot(&mut self, snapshot: &Snapshot) -> Result<StateDiff, SnapshotError> {
        let diff = self.state.restore_from_snapshot(snapshot)?;
        for npc in self.pending.keys() {
            self.ai.cancel(*npc);
        }
        self.pending.clear();
        info!(
            tick = self.clock.tick(),
            snapshot = %snapshot.id,
            changes = diff.len(),
            "State restored from snapshot"
        );
        Ok(diff)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The last tick executed.
    pub const fn tick(&self) -> u64 {
        self.clock.tick()
    }

    /// Length of one tick.
    pub const fn step(&self) -> Duration {
        self.stepper.step()
    }

    /// Leftover step fraction for render interpolation.
    pub fn alpha(&self) -> f64 {
        self.stepper.alpha()
    }

    /// Read access to the state manager.
    pub const fn state(&self) -> &StateManager {
        &self.state
    }

    /// The event pool, for subscriptions and direct publishing.
    pub const fn events(&self) -> &EventPool {
        &self.events
    }

    /// The AI engine.
    pub const fn ai(&self) -> &AiEngine {
        &self.ai
    }

    /// A handle for submitting transactions.
    pub fn transactions(&self) -> TransactionQueue {
        self.transactions.clone()
    }

    /// A handle for queueing input commands.
    pub fn inputs(&self) -> InputQueue {
        self.inputs.clone()
    }

    /// Periodic snapshots retained so far.
    pub const fn snapshots(&self) -> &SnapshotHistory {
        &self.snapshots
    }

    /// Decisions requested but not yet applied or discarded.
    pub fn pending_decisions(&self) -> usize {
        self.pending.len()
    }
}

/// Publish one event per entity-level change in `diff`.
fn publish_diff(pool: &EventPool, diff: &StateDiff) {
    for change in &diff.changes {
        let change_json = match serde_json::to_value(change) {
            Ok(value) => value,
            Err(error) => {
                warn!(%error, name = change.event_name(), "Failed to encode state change");
                continue;
            }
        };
        let payload = json!({ "version": diff.to_version, "change": change_json });
        let published =
            Event::new(change.event_name(), payload).and_then(|event| pool.publish(event));
        if let Err(error) = published {
            warn!(%error, name = change.event_name(), "Failed to publish state change");
        }
    }
}

const fn every(tick: u64, interval: u64) -> bool {
    matches!(tick.checked_rem(interval), Some(0))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn confidence_pct(confidence: f32) -> u8 {
    // Clamped to [0, 100] before the cast.
    (clamp_confidence(confidence) * 100.0).round() as u8
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use guildhall_ai::{AiConfig, BehaviorRegistry};
    use guildhall_types::{GameState, Npc};
    use serde_json::json;
    use tokio::runtime::Handle;

    use super::*;
    use crate::queue::{InputCommand, SUBMIT_TRANSACTION_EVENT};

    const ECONOMY_TREE: &str = r"
- id: economy
  class: economy
  root:
    kind: action
    action: rest
";

    fn engine() -> AiEngine {
        let mut registry = BehaviorRegistry::builder();
        registry.register_yaml(ECONOMY_TREE).unwrap();
        AiEngine::builder(AiConfig::default(), Handle::current())
            .behavior(registry.build())
            .build()
    }

    fn world(npcs: usize) -> (StateManager, Vec<NpcId>) {
        let mut state = GameState::new();
        let ids: Vec<NpcId> = (0..npcs).map(|_| NpcId::new()).collect();
        for (i, id) in ids.iter().enumerate() {
            state.npcs.insert(*id, Npc::new(*id, format!("npc-{i}")));
        }
        let mut manager = StateManager::with_state(state);
        manager.install_default_validators();
        (manager, ids)
    }

    fn new_game(config: &KernelConfig, npcs: usize) -> (GameLoop, Vec<NpcId>) {
        let (state, ids) = world(npcs);
        (GameLoop::new(config, state, engine()).unwrap(), ids)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn decisions_land_on_the_following_tick() {
        let (mut game, ids) = new_game(&KernelConfig::default(), 2);
        let first_npc = ids.first().copied().unwrap();

        let first = game.run_tick().unwrap();
        assert_eq!(first.tick, 1);
        assert_eq!(first.decisions_requested, 2);
        assert_eq!(first.decisions_applied, 0);
        assert!(ids.iter().all(|id| game.state().current().npc(*id).unwrap().current_action.is_none()));

        let second = game.run_tick().unwrap();
        assert_eq!(second.decisions_applied, 2);
        assert_eq!(second.decisions_requested, 0);
        let current = game.state().current();
        let assigned = current.npc(first_npc).unwrap().current_action.as_ref().unwrap();
        assert_eq!(assigned.action, ActionKind::Rest);
        assert_eq!(assigned.assigned_at, 2);
        assert_eq!(assigned.confidence_pct, 90);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn submitted_transactions_apply_in_the_same_tick() {
        let (mut game, _) = new_game(&KernelConfig::default(), 0);
        let npc = NpcId::new();
        game.inputs().push(InputCommand::new(
            SUBMIT_TRANSACTION_EVENT,
            json!({ "ops": [{ "op": "spawn_npc", "id": npc, "name": "Ada" }] }),
        ));

        let summary = game.run_tick().unwrap();
        assert_eq!(summary.inputs_accepted, 1);
        assert_eq!(summary.transactions_committed, 1);
        assert_eq!(summary.npcs, 1);
        assert!(game.state().current().npc(npc).is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejections_are_announced_next_tick() {
        let (mut game, ids) = new_game(&KernelConfig::default(), 1);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        game.events()
            .subscribe(TRANSACTION_REJECTED_EVENT, move |event| {
                assert!(event.payload["validators"].is_array());
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        game.transactions().submit(Transaction::new(vec![StateOp::Debit {
            account: guildhall_types::Account::Npc(ids.first().copied().unwrap()),
            resource: guildhall_types::Resource::Gold,
            amount: rust_decimal::Decimal::TEN,
        }]));
        let summary = game.run_tick().unwrap();
        assert_eq!(summary.transactions_rejected, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        game.run_tick().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn decisions_for_removed_npcs_are_discarded() {
        let (mut game, ids) = new_game(&KernelConfig::default(), 1);
        game.run_tick().unwrap();
        assert_eq!(game.pending_decisions(), 1);

        game.transactions().submit(Transaction::new(vec![StateOp::RemoveNpc { id: ids.first().copied().unwrap() }]));
        let summary = game.run_tick().unwrap();
        assert_eq!(summary.decisions_discarded, 1);
        assert_eq!(summary.decisions_applied, 0);
        assert_eq!(game.pending_decisions(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn state_changes_become_events() {
        let (mut game, _) = new_game(&KernelConfig::default(), 0);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        game.events()
            .subscribe("state.npc.*", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        game.transactions().submit(Transaction::new(vec![
            StateOp::SpawnNpc { id: NpcId::new(), name: "Ada".to_owned() },
            StateOp::SpawnNpc { id: NpcId::new(), name: "Bram".to_owned() },
        ]));
        game.run_tick().unwrap();
        game.run_tick().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn periodic_snapshots_are_retained() {
        let config = KernelConfig::parse("state:\n  snapshot_interval_ticks: 2\n  snapshot_retention: 2\n").unwrap();
        let (mut game, _) = new_game(&config, 1);
        let summaries: Vec<TickSummary> = (0..6).map(|_| game.run_tick().unwrap()).collect();
        let taken = summaries.iter().filter(|s| s.snapshot_taken).count();
        assert_eq!(taken, 3);
        assert_eq!(game.snapshots().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restore_drops_pending_decisions() {
        let (mut game, _) = new_game(&KernelConfig::default(), 2);
        let snapshot = game.snapshot_now().unwrap();
        game.run_tick().unwrap();
        assert_eq!(game.pending_decisions(), 2);

        game.restore_snapshot(&snapshot).unwrap();
        assert_eq!(game.pending_decisions(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn advance_runs_whole_steps_only() {
        let (mut game, _) = new_game(&KernelConfig::default(), 1);
        let frame = game.advance(Duration::from_millis(175)).unwrap();
        assert_eq!(frame.ticks_run, 3);
        assert_eq!(frame.summaries.len(), 3);
        assert_eq!(game.tick(), 3);
        assert!((frame.alpha - 0.5).abs() < 1e-9);

        let frame = game.advance(Duration::from_secs(10)).unwrap();
        assert_eq!(frame.ticks_run, 5);
        assert!(!frame.dropped.is_zero());
    }

    #[test]
    fn confidence_is_whole_percent() {
        assert_eq!(confidence_pct(0.904), 90);
        assert_eq!(confidence_pct(2.0), 100);
        assert_eq!(confidence_pct(f32::NAN), 0);
    }
}
