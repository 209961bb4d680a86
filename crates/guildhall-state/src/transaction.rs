//! Transaction lifecycle.
//!
//! A [`Transaction`] is an ordered list of [`StateOp`]s. The
//! [`StateManager`](crate::StateManager) drives it through
//!
//! ```text
//! Pending -> Applying -> Validating -> Committed
//!               |            |
//!               +------------+------> RolledBack
//! ```
//!
//! `Committed` and `RolledBack` are terminal. A finalized transaction cannot
//! be executed again.

use serde::{Deserialize, Serialize};

use guildhall_types::TransactionId;

use crate::diff::StateDiff;
use crate::ops::StateOp;
use crate::{OperationError, ValidationError};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Where a [`Transaction`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Built but not yet executed.
    Pending,
    /// Operations are being applied to the working copy.
    Applying,
    /// Validators are running against the working copy.
    Validating,
    /// The working copy replaced the current state.
    Committed,
    /// The working copy was discarded.
    RolledBack,
}

impl TransactionStatus {
    /// Whether this status is terminal.
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }

    /// Lowercase label for logs and event payloads.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applying => "applying",
            Self::Validating => "validating",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl core::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// An atomic batch of state operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    id: TransactionId,
    ops: Vec<StateOp>,
    status: TransactionStatus,
    checkpoint: Option<u64>,
    label: Option<String>,
}

impl Transaction {
    /// Create a pending transaction over `ops`.
    pub fn new(ops: Vec<StateOp>) -> Self {
        Self {
            id: TransactionId::new(),
            ops,
            status: TransactionStatus::Pending,
            checkpoint: None,
            label: None,
        }
    }

    /// Attach a short label used in logs.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Append an operation. Has no effect on a transaction that already ran.
    pub fn push(&mut self, op: StateOp) {
        if self.status == TransactionStatus::Pending {
            self.ops.push(op);
        }
    }

    /// The transaction ID.
    pub const fn id(&self) -> TransactionId {
        self.id
    }

    /// The operations, in application order.
    pub fn ops(&self) -> &[StateOp] {
        &self.ops
    }

    /// Current lifecycle status.
    pub const fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Whether the transaction reached a terminal status.
    pub const fn is_finalized(&self) -> bool {
        self.status.is_final()
    }

    /// State version the transaction was applied on top of, once started.
    pub const fn checkpoint(&self) -> Option<u64> {
        self.checkpoint
    }

    /// Label set with [`Transaction::with_label`].
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub(crate) const fn begin(&mut self, version: u64) {
        self.checkpoint = Some(version);
        self.status = TransactionStatus::Applying;
    }

    pub(crate) const fn set_status(&mut self, status: TransactionStatus) {
        self.status = status;
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// The operation that stopped a transaction during `Applying`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationFailure {
    /// Zero-based position of the operation in the transaction.
    pub index: usize,
    /// [`StateOp::kind`] of the operation.
    pub kind: &'static str,
    /// Why it failed.
    pub error: OperationError,
}

/// Outcome of executing a [`Transaction`].
///
/// A rejected transaction is reported here, never as a panic or an `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResult {
    /// The transaction.
    pub transaction_id: TransactionId,
    /// Terminal status reached.
    pub status: TransactionStatus,
    /// `true` iff the transaction committed.
    pub success: bool,
    /// Validator violations that caused a rollback.
    pub errors: Vec<ValidationError>,
    /// Structural failure that caused a rollback.
    pub failed_operation: Option<OperationFailure>,
    /// Current state version after the call.
    pub version: u64,
    /// Changes made by a committed transaction.
    pub diff: Option<StateDiff>,
}

impl TransactionResult {
    /// Distinct names of the validators that rejected the transaction.
    pub fn failed_validators(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.errors.iter().map(|e| e.validator.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// One-line description of why the transaction rolled back.
    pub fn failure_summary(&self) -> Option<String> {
        if self.success {
            return None;
        }
        if let Some(failure) = &self.failed_operation {
            return Some(format!(
                "operation #{} ({}) failed: {}",
                failure.index, failure.kind, failure.error
            ));
        }
        Some(format!(
            "rejected by {}",
            self.failed_validators().join(", ")
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use guildhall_types::NpcId;

    use super::*;

    #[test]
    fn new_transaction_is_pending() {
        let tx = Transaction::new(Vec::new()).with_label("empty");
        assert_eq!(tx.status(), TransactionStatus::Pending);
        assert!(!tx.is_finalized());
        assert_eq!(tx.checkpoint(), None);
        assert_eq!(tx.label(), Some("empty"));
    }

    #[test]
    fn push_is_ignored_once_started() {
        let mut tx = Transaction::new(Vec::new());
        tx.push(StateOp::SpawnNpc { id: NpcId::new(), name: "a".into() });
        tx.begin(3);
        tx.push(StateOp::SpawnNpc { id: NpcId::new(), name: "b".into() });
        assert_eq!(tx.ops().len(), 1);
        assert_eq!(tx.checkpoint(), Some(3));
    }

    #[test]
    fn summary_names_each_validator_once() {
        let result = TransactionResult {
            transaction_id: TransactionId::new(),
            status: TransactionStatus::RolledBack,
            success: false,
            errors: vec![
                ValidationError::new("single_leader", "x"),
                ValidationError::new("guild_capacity", "y"),
                ValidationError::new("guild_capacity", "z"),
            ],
            failed_operation: None,
            version: 0,
            diff: None,
        };
        assert_eq!(result.failed_validators(), vec!["guild_capacity", "single_leader"]);
        assert_eq!(
            result.failure_summary().unwrap(),
            "rejected by guild_capacity, single_leader"
        );
    }
}
