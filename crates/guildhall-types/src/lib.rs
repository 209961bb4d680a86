//! Shared type definitions for the Guildhall simulation kernel.
//!
//! This crate is the single source of truth for the values that cross
//! component boundaries: identifiers, the closed action vocabulary, decision
//! inputs and outputs, and the [`GameState`] model. Types flow downstream to
//! `TypeScript` via `ts-rs` for the presentation layer.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for all entity identifiers
//! - [`enums`] -- Resources, guild roles, situation classes
//! - [`decision`] -- [`ActionKind`] vocabulary and the [`Decision`] value object
//! - [`situation`] -- Decision inputs and their cache [`Fingerprint`]
//! - [`state`] -- The [`GameState`] aggregate

pub mod decision;
pub mod enums;
pub mod ids;
pub mod situation;
pub mod state;

// Re-export all public types at crate root for convenience.
pub use decision::{
    ACTION_SCHEMA_VERSION, ActionKind, ActionTag, Decision, DecisionOrigin, clamp_confidence,
};
pub use enums::{GuildRole, Resource, SituationClass};
pub use ids::{CombatId, CorrelationId, GuildId, NpcId, SnapshotId, TransactionId};
pub use situation::{Fingerprint, Situation};
pub use state::{
    Account, AssignedAction, Balances, CombatSession, EconomyLedger, GameState, Guild,
    MAX_HEALTH, Npc,
};
