//! The [`StateManager`]: single authority over the current game state.
//!
//! The committed state lives behind an [`Arc`]. A transaction clones it into
//! a working copy, applies its operations, and runs every validator against
//! the result. Commit swaps the `Arc`; rollback drops the working copy, so
//! the committed state after a rejected transaction is exactly the state
//! before it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use guildhall_types::GameState;

use crate::diff::StateDiff;
use crate::ops::StateOp;
use crate::snapshot::{Snapshot, state_checksum};
use crate::transaction::{OperationFailure, Transaction, TransactionResult, TransactionStatus};
use crate::validators::{
    GuildCapacityValidator, HealthRangeValidator, NonNegativeBalanceValidator,
    ReferenceIntegrityValidator, SingleLeaderValidator, StateValidator,
};
use crate::{SnapshotError, TransactionError, ValidationError};

/// Callback invoked with every committed [`StateDiff`].
pub type DiffCallback = Arc<dyn Fn(&StateDiff) + Send + Sync>;

/// Owns the committed [`GameState`] and every path that changes it.
pub struct StateManager {
    current: Arc<GameState>,
    version: u64,
    validators: Vec<Box<dyn StateValidator>>,
    subscribers: Vec<DiffCallback>,
}

impl core::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StateManager")
            .field("version", &self.version)
            .field("validators", &self.validator_names())
            .field("subscribers", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    /// An empty state with no validators.
    pub fn new() -> Self {
        Self::with_state(GameState::new())
    }

    /// Start from `state` at version 0, with no validators.
    pub fn with_state(state: GameState) -> Self {
        Self {
            current: Arc::new(state),
            version: 0,
            validators: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    /// An empty state guarded by the built-in validator set.
    pub fn with_default_validators() -> Self {
        let mut manager = Self::new();
        manager.install_default_validators();
        manager
    }

    /// Register the built-in validators: guild capacity, non-negative
    /// balances, single leader, reference integrity, health range.
    pub fn install_default_validators(&mut self) {
        self.add_validator(GuildCapacityValidator);
        self.add_validator(NonNegativeBalanceValidator);
        self.add_validator(SingleLeaderValidator);
        self.add_validator(ReferenceIntegrityValidator);
        self.add_validator(HealthRangeValidator);
    }

    /// Register a validator. It runs after every subsequent transaction.
    pub fn add_validator(&mut self, validator: impl StateValidator + 'static) {
        self.validators.push(Box::new(validator));
    }

    /// Names of the registered validators, in registration order.
    pub fn validator_names(&self) -> Vec<&'static str> {
        self.validators.iter().map(|v| v.name()).collect()
    }

    /// Register a callback for every committed diff.
    ///
    /// Callbacks run synchronously on the committing thread. A panicking
    /// callback is logged and does not affect the commit or other callbacks.
    pub fn subscribe_diffs<F>(&mut self, callback: F)
    where
        F: Fn(&StateDiff) + Send + Sync + 'static,
    {
        self.subscribers.push(Arc::new(callback));
    }

    /// The latest committed state.
    pub fn current(&self) -> Arc<GameState> {
        Arc::clone(&self.current)
    }

    /// Number of commits and restores so far.
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Hex SHA-256 of the current state.
    pub fn checksum(&self) -> Result<String, SnapshotError> {
        state_checksum(&self.current)
    }

    /// Run every validator against `state` on the rayon pool.
    ///
    /// A validator that panics reports one error under its own name.
    pub fn validate_state(&self, state: &GameState) -> Vec<ValidationError> {
        self.validators
            .par_iter()
            .flat_map_iter(|v| {
                catch_unwind(AssertUnwindSafe(|| v.validate(state))).unwrap_or_else(|panic| {
                    let message = panic_message(panic.as_ref());
                    warn!(validator = v.name(), message, "Validator panicked");
                    vec![ValidationError::new(v.name(), format!("validator panicked: {message}"))]
                })
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Execute `tx` atomically.
    ///
    /// Returns [`TransactionError::Finalized`] if `tx` already committed or
    /// rolled back. Rejections are reported in the [`TransactionResult`].
    pub fn execute_transaction(
        &mut self,
        tx: &mut Transaction,
    ) -> Result<TransactionResult, TransactionError> {
        if tx.is_finalized() {
            return Err(TransactionError::Finalized {
                id: tx.id(),
                status: tx.status(),
            });
        }
        Ok(self.run(tx))
    }

    /// Wrap `ops` in a fresh transaction and execute it.
    pub fn apply_ops(&mut self, ops: Vec<StateOp>) -> TransactionResult {
        let mut tx = Transaction::new(ops);
        self.run(&mut tx)
    }

    fn run(&mut self, tx: &mut Transaction) -> TransactionResult {
        tx.begin(self.version);
        let mut working = GameState::clone(&self.current);

        let failure = tx.ops().iter().enumerate().find_map(|(index, op)| {
            op.apply(&mut working).err().map(|error| OperationFailure {
                index,
                kind: op.kind(),
                error,
            })
        });
        if let Some(failure) = failure {
            warn!(
                transaction = %tx.id(),
                label = tx.label().unwrap_or_default(),
                index = failure.index,
                op = failure.kind,
                error = %failure.error,
                "Transaction operation failed, rolling back"
            );
            return self.roll_back(tx, Vec::new(), Some(failure));
        }

        tx.set_status(TransactionStatus::Validating);
        let errors = self.validate_state(&working);
        if !errors.is_empty() {
            warn!(
                transaction = %tx.id(),
                label = tx.label().unwrap_or_default(),
                errors = errors.len(),
                first = %errors.first().map(ToString::to_string).unwrap_or_default(),
                "Transaction failed validation, rolling back"
            );
            return self.roll_back(tx, errors, None);
        }

        let diff = self.commit(working);
        tx.set_status(TransactionStatus::Committed);
        debug!(
            transaction = %tx.id(),
            version = self.version,
            ops = tx.ops().len(),
            changes = diff.len(),
            "Transaction committed"
        );

        TransactionResult {
            transaction_id: tx.id(),
            status: TransactionStatus::Committed,
            success: true,
            errors: Vec::new(),
            failed_operation: None,
            version: self.version,
            diff: Some(diff),
        }
    }

    fn roll_back(
        &self,
        tx: &mut Transaction,
        errors: Vec<ValidationError>,
        failed_operation: Option<OperationFailure>,
    ) -> TransactionResult {
        tx.set_status(TransactionStatus::RolledBack);
        TransactionResult {
            transaction_id: tx.id(),
            status: TransactionStatus::RolledBack,
            success: false,
            errors,
            failed_operation,
            version: self.version,
            diff: None,
        }
    }

    fn commit(&mut self, next: GameState) -> StateDiff {
        let next_version = self.version.saturating_add(1);
        let diff = StateDiff::between(&self.current, &next, self.version, next_version);
        self.current = Arc::new(next);
        self.version = next_version;
        self.notify(&diff);
        diff
    }

    fn notify(&self, diff: &StateDiff) {
        for (index, callback) in self.subscribers.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| callback(diff))).is_err() {
                warn!(subscriber = index, version = diff.to_version, "Diff subscriber panicked");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Capture the current state.
    pub fn create_snapshot(&self) -> Result<Snapshot, SnapshotError> {
        let snapshot = Snapshot::capture(&self.current, self.version)?;
        debug!(snapshot = %snapshot.id, version = self.version, "Snapshot created");
        Ok(snapshot)
    }

    /// Replace the current state with `snapshot`'s.
    ///
    /// The checksum is verified first, then every validator runs against the
    /// snapshot state. On any error the current state is left untouched.
    /// A successful restore counts as a new version and emits a diff.
    pub fn restore_from_snapshot(&mut self, snapshot: &Snapshot) -> Result<StateDiff, SnapshotError> {
        snapshot.verify()?;

        let errors = self.validate_state(&snapshot.state);
        if !errors.is_empty() {
            warn!(snapshot = %snapshot.id, errors = errors.len(), "Snapshot failed validation");
            return Err(SnapshotError::Invalid {
                id: snapshot.id,
                errors,
            });
        }

        let diff = self.commit(snapshot.state.clone());
        info!(
            snapshot = %snapshot.id,
            snapshot_version = snapshot.version,
            version = self.version,
            changes = diff.len(),
            "State restored from snapshot"
        );
        Ok(diff)
    }
}

/// Best-effort extraction of a panic payload's message.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "no message".to_owned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rust_decimal::Decimal;

    use guildhall_types::{Account, GuildId, GuildRole, NpcId, Resource};

    use super::*;

    struct World {
        manager: StateManager,
        guild: GuildId,
        leader: NpcId,
        recruit: NpcId,
    }

    /// A one-seat guild that is already full, plus an unaffiliated NPC.
    fn full_guild() -> World {
        let mut manager = StateManager::with_default_validators();
        let guild = GuildId::new();
        let leader = NpcId::new();
        let recruit = NpcId::new();
        let result = manager.apply_ops(vec![
            StateOp::SpawnNpc { id: leader, name: "Leader".into() },
            StateOp::SpawnNpc { id: recruit, name: "Recruit".into() },
            StateOp::CreateGuild { id: guild, name: "Ravens".into(), member_limit: 1, leader },
            StateOp::Credit {
                account: Account::Guild(guild),
                resource: Resource::Gold,
                amount: Decimal::new(50, 0),
            },
        ]);
        assert!(result.success, "{:?}", result.failure_summary());
        World { manager, guild, leader, recruit }
    }

    #[test]
    fn committed_transaction_bumps_version_and_reports_diff() {
        let world = full_guild();
        assert_eq!(world.manager.version(), 1);
        let state = world.manager.current();
        assert_eq!(state.guild(world.guild).unwrap().member_count(), 1);
        assert_eq!(state.npc(world.leader).unwrap().guild, Some(world.guild));
    }

    #[test]
    fn capacity_violation_rolls_back_exactly() {
        let mut world = full_guild();
        let before = world.manager.current();
        let checksum = world.manager.checksum().unwrap();

        let mut tx = Transaction::new(vec![
            StateOp::Debit {
                account: Account::Guild(world.guild),
                resource: Resource::Gold,
                amount: Decimal::new(10, 0),
            },
            StateOp::AddMember { guild: world.guild, npc: world.recruit, role: GuildRole::Member },
        ]);
        let result = world.manager.execute_transaction(&mut tx).unwrap();

        assert!(!result.success);
        assert_eq!(result.status, TransactionStatus::RolledBack);
        assert_eq!(result.failed_validators(), vec!["guild_capacity"]);
        assert_eq!(tx.status(), TransactionStatus::RolledBack);

        let after = world.manager.current();
        assert_eq!(*after, *before);
        assert_eq!(after.guild(world.guild).unwrap().member_count(), 1);
        assert_eq!(world.manager.checksum().unwrap(), checksum);
        assert_eq!(world.manager.version(), 1);
    }

    #[test]
    fn failed_operation_short_circuits() {
        let mut world = full_guild();
        let before = world.manager.current();
        let ghost = NpcId::new();
        let result = world.manager.apply_ops(vec![
            StateOp::SetNpcHealth { id: world.leader, health: 20 },
            StateOp::SetNpcHealth { id: ghost, health: 20 },
            StateOp::SetNpcHealth { id: world.recruit, health: 20 },
        ]);
        assert!(!result.success);
        let failure = result.failed_operation.unwrap();
        assert_eq!(failure.index, 1);
        assert_eq!(failure.kind, "set_npc_health");
        assert!(result.errors.is_empty());
        assert_eq!(*world.manager.current(), *before);
    }

    #[test]
    fn overdraft_is_rejected_by_balance_validator() {
        let mut world = full_guild();
        let result = world.manager.apply_ops(vec![StateOp::Transfer {
            from: Account::Guild(world.guild),
            to: Account::Npc(world.recruit),
            resource: Resource::Gold,
            amount: Decimal::new(80, 0),
        }]);
        assert_eq!(result.failed_validators(), vec!["non_negative_balance"]);
        assert_eq!(
            world.manager.current().balance(Account::Guild(world.guild), Resource::Gold),
            Decimal::new(50, 0)
        );
    }

    #[test]
    fn finalized_transaction_cannot_run_twice() {
        let mut world = full_guild();
        let mut tx = Transaction::new(vec![StateOp::SetNpcHealth { id: world.leader, health: 90 }]);
        assert!(world.manager.execute_transaction(&mut tx).unwrap().success);
        let again = world.manager.execute_transaction(&mut tx);
        assert_eq!(
            again,
            Err(TransactionError::Finalized { id: tx.id(), status: TransactionStatus::Committed })
        );
        assert_eq!(world.manager.version(), 2);
    }

    #[test]
    fn snapshot_then_restore_preserves_checksum() {
        let mut world = full_guild();
        let checksum = world.manager.checksum().unwrap();
        let snapshot = world.manager.create_snapshot().unwrap();
        let diff = world.manager.restore_from_snapshot(&snapshot).unwrap();
        assert!(diff.is_empty());
        assert_eq!(world.manager.checksum().unwrap(), checksum);
        assert_eq!(world.manager.version(), 2);
    }

    #[test]
    fn restore_rewinds_later_changes() {
        let mut world = full_guild();
        let snapshot = world.manager.create_snapshot().unwrap();
        let result = world.manager.apply_ops(vec![StateOp::RemoveNpc { id: world.recruit }]);
        assert!(result.success);
        assert!(world.manager.current().npc(world.recruit).is_none());

        let diff = world.manager.restore_from_snapshot(&snapshot).unwrap();
        assert_eq!(diff.changes, vec![crate::StateChange::NpcAdded { id: world.recruit }]);
        assert!(world.manager.current().npc(world.recruit).is_some());
    }

    #[test]
    fn tampered_snapshot_is_rejected_and_state_unchanged() {
        let mut world = full_guild();
        let mut snapshot = world.manager.create_snapshot().unwrap();
        snapshot.state.npcs.get_mut(&world.leader).unwrap().health = 1;

        let before = world.manager.current();
        let err = world.manager.restore_from_snapshot(&snapshot).unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupted { .. }));
        assert_eq!(*world.manager.current(), *before);
        assert_eq!(world.manager.version(), 1);
    }

    #[test]
    fn invalid_snapshot_is_rejected() {
        let mut world = full_guild();
        let mut state = GameState::clone(&world.manager.current());
        state.guilds.get_mut(&world.guild).unwrap().member_limit = 0;
        let snapshot = Snapshot::capture(&state, 9).unwrap();

        let err = world.manager.restore_from_snapshot(&snapshot).unwrap_err();
        match err {
            SnapshotError::Invalid { errors, .. } => {
                assert_eq!(errors.first().unwrap().validator, "guild_capacity");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn panicking_validator_rolls_back_instead_of_unwinding() {
        let mut world = full_guild();
        world
            .manager
            .add_validator(crate::FnValidator::new("buggy", |_| panic!("validator bug")));
        let before = world.manager.current();

        let result = world.manager.apply_ops(vec![StateOp::SpawnNpc { id: NpcId::new(), name: "Cato".to_owned() }]);
        assert!(!result.success);
        assert_eq!(result.failed_validators(), vec!["buggy"]);
        assert!(result.errors.first().unwrap().message.contains("validator bug"));
        assert_eq!(*world.manager.current(), *before);
        assert_eq!(world.manager.version(), 1);
    }

    #[test]
    fn diff_subscribers_are_isolated() {
        let mut world = full_guild();
        let seen = Arc::new(AtomicUsize::new(0));
        world.manager.subscribe_diffs(|_| panic!("subscriber bug"));
        let counter = Arc::clone(&seen);
        world.manager.subscribe_diffs(move |diff| {
            counter.fetch_add(diff.len(), Ordering::SeqCst);
        });

        let result = world.manager.apply_ops(vec![StateOp::SetNpcHealth { id: world.leader, health: 40 }]);
        assert!(result.success);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(world.manager.version(), 2);
    }
}
