//! Transactional game-state store for the Guildhall simulation kernel.
//!
//! The [`StateManager`] is the single authority over the mutable
//! [`GameState`](guildhall_types::GameState). Nothing else ever mutates it:
//! every change is a [`Transaction`] of [`StateOp`]s that is applied to a
//! working copy, checked by every registered [`StateValidator`], and then
//! either committed (the working copy becomes current) or discarded.
//!
//! # Architecture
//!
//! - [`ops`] -- The closed [`StateOp`] vocabulary and its structural checks.
//! - [`transaction`] -- [`Transaction`] lifecycle and [`TransactionResult`].
//! - [`validators`] -- Pure business-rule predicates run after every transaction.
//! - [`diff`] -- Entity-level [`StateDiff`] between two committed states.
//! - [`snapshot`] -- Checksummed [`Snapshot`]s and bounded [`SnapshotHistory`].
//! - [`manager`] -- The [`StateManager`] tying it all together.
//!
//! # Rollback
//!
//! For every transaction `T`, if any validator reports an error, the
//! committed state after `execute_transaction(T)` is identical to the state
//! before the call. The manager never partially commits.
//!
//! # Usage
//!
//! ```
//! use guildhall_state::{StateManager, StateOp, Transaction};
//! use guildhall_types::{GuildId, NpcId};
//!
//! let mut manager = StateManager::with_default_validators();
//! let leader = NpcId::new();
//! let guild = GuildId::new();
//!
//! let mut tx = Transaction::new(vec![
//!     StateOp::SpawnNpc { id: leader, name: "Ada".to_owned() },
//!     StateOp::CreateGuild { id: guild, name: "Ravens".to_owned(), member_limit: 1, leader },
//! ]);
//! let result = manager.execute_transaction(&mut tx)?;
//! assert!(result.success);
//! assert_eq!(manager.version(), 1);
//! # Ok::<(), guildhall_state::TransactionError>(())
//! ```

pub mod diff;
pub mod manager;
pub mod ops;
pub mod snapshot;
pub mod transaction;
pub mod validators;

// Re-export primary types at crate root.
pub use diff::{StateChange, StateDiff};
pub use manager::{DiffCallback, StateManager};
pub use ops::StateOp;
pub use snapshot::{Snapshot, SnapshotHistory, state_checksum};
pub use transaction::{OperationFailure, Transaction, TransactionResult, TransactionStatus};
pub use validators::{
    FnValidator, GuildCapacityValidator, HealthRangeValidator, NonNegativeBalanceValidator,
    ReferenceIntegrityValidator, SingleLeaderValidator, StateValidator,
};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use guildhall_types::{Account, CombatId, GuildId, NpcId, TransactionId};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Structural failure of a single [`StateOp`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    /// An NPC with this ID already exists.
    #[error("npc {0} already exists")]
    DuplicateNpc(NpcId),

    /// No NPC with this ID exists.
    #[error("unknown npc {0}")]
    UnknownNpc(NpcId),

    /// A guild with this ID already exists.
    #[error("guild {0} already exists")]
    DuplicateGuild(GuildId),

    /// No guild with this ID exists.
    #[error("unknown guild {0}")]
    UnknownGuild(GuildId),

    /// The NPC is already on the guild roster.
    #[error("npc {npc} is already a member of guild {guild}")]
    AlreadyMember {
        /// The guild.
        guild: GuildId,
        /// The NPC.
        npc: NpcId,
    },

    /// The NPC is not on the guild roster.
    #[error("npc {npc} is not a member of guild {guild}")]
    NotMember {
        /// The guild.
        guild: GuildId,
        /// The NPC.
        npc: NpcId,
    },

    /// A combat session with this ID already exists.
    #[error("combat {0} already exists")]
    DuplicateCombat(CombatId),

    /// No combat session with this ID exists.
    #[error("unknown combat {0}")]
    UnknownCombat(CombatId),

    /// A counter or balance overflowed.
    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),

    /// Ledger amounts must be strictly positive.
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    /// The ledger account's owner does not exist.
    #[error("unknown ledger account {0}")]
    UnknownAccount(Account),
}

/// One business-rule violation reported by a [`StateValidator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Name of the validator that reported the violation.
    pub validator: String,
    /// Human-readable description.
    pub message: String,
    /// The entity the violation is about, when there is one.
    pub subject: Option<String>,
}

impl ValidationError {
    /// Create a violation with no subject.
    pub fn new(validator: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            validator: validator.into(),
            message: message.into(),
            subject: None,
        }
    }

    /// Attach the ID of the offending entity.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

impl core::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[{}] {}", self.validator, self.message)
    }
}

/// Misuse of the transaction lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    /// The transaction already reached a terminal status.
    #[error("transaction {id} is already {status}")]
    Finalized {
        /// The transaction.
        id: TransactionId,
        /// Its terminal status.
        status: TransactionStatus,
    },
}

/// Errors from restoring a [`Snapshot`]. The live state is untouched.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The stored checksum does not match the snapshot contents.
    #[error("snapshot {id} is corrupted: expected checksum {expected}, computed {actual}")]
    Corrupted {
        /// The snapshot.
        id: guildhall_types::SnapshotId,
        /// Checksum recorded in the snapshot.
        expected: String,
        /// Checksum computed from its contents.
        actual: String,
    },

    /// The snapshot contents violate one or more validators.
    #[error("snapshot {id} failed validation with {} error(s)", errors.len())]
    Invalid {
        /// The snapshot.
        id: guildhall_types::SnapshotId,
        /// Every violation found.
        errors: Vec<ValidationError>,
    },

    /// The state could not be serialized for checksumming.
    #[error("snapshot serialization failed: {source}")]
    Serialization {
        /// The underlying serializer error.
        #[from]
        source: serde_json::Error,
    },
}
