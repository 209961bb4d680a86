//! The [`GameState`] aggregate and its entity records.
//!
//! Every registry is a [`BTreeMap`] keyed by a stable ID, so iteration order
//! (and therefore serialization, checksums, and diffs) is deterministic.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::decision::ActionKind;
use crate::enums::{GuildRole, Resource};
use crate::ids::{CombatId, GuildId, NpcId};

/// Highest health value an NPC can have.
pub const MAX_HEALTH: u32 = 100;

/// Per-resource balances of one ledger account.
pub type Balances = BTreeMap<Resource, Decimal>;

/// The single root aggregate of mutable game state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GameState {
    /// Guild registry.
    pub guilds: BTreeMap<GuildId, Guild>,
    /// Active combat sessions.
    pub combats: BTreeMap<CombatId, CombatSession>,
    /// Resource balances of guilds and NPCs.
    pub economy: EconomyLedger,
    /// NPC registry.
    pub npcs: BTreeMap<NpcId, Npc>,
}

impl GameState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an NPC.
    pub fn npc(&self, id: NpcId) -> Option<&Npc> {
        self.npcs.get(&id)
    }

    /// Look up a guild.
    pub fn guild(&self, id: GuildId) -> Option<&Guild> {
        self.guilds.get(&id)
    }

    /// The combat session `npc` is fighting in, if any.
    pub fn combat_of(&self, npc: NpcId) -> Option<&CombatSession> {
        self.combats.values().find(|c| c.participants.contains(&npc))
    }

    /// Balance of `resource` held by `account` (zero when absent).
    pub fn balance(&self, account: Account, resource: Resource) -> Decimal {
        self.economy.balance(account, resource)
    }
}

/// A guild and its roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Guild {
    /// Guild identifier.
    pub id: GuildId,
    /// Display name.
    pub name: String,
    /// Maximum number of members, leader included.
    pub member_limit: u32,
    /// Members and their roles.
    pub members: BTreeMap<NpcId, GuildRole>,
}

impl Guild {
    /// Number of members on the roster.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// IDs of all members holding [`GuildRole::Leader`].
    pub fn leaders(&self) -> impl Iterator<Item = NpcId> + '_ {
        self.members
            .iter()
            .filter(|(_, role)| **role == GuildRole::Leader)
            .map(|(id, _)| *id)
    }
}

/// A non-player character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Npc {
    /// NPC identifier.
    pub id: NpcId,
    /// Display name.
    pub name: String,
    /// Guild membership, mirrored by the guild's roster.
    pub guild: Option<GuildId>,
    /// Health in `0..=MAX_HEALTH`.
    pub health: u32,
    /// The action the NPC is currently carrying out.
    pub current_action: Option<AssignedAction>,
}

impl Npc {
    /// Create an unaffiliated NPC at full health.
    pub fn new(id: NpcId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            guild: None,
            health: MAX_HEALTH,
            current_action: None,
        }
    }

    /// Whether the NPC has no action or its action expired before `tick`.
    pub fn needs_decision(&self, tick: u64) -> bool {
        self.current_action
            .as_ref()
            .is_none_or(|assigned| assigned.valid_until < tick)
    }
}

/// A decision that has been applied to an NPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct AssignedAction {
    /// The action being carried out.
    pub action: ActionKind,
    /// Decision confidence in whole percent (`0..=100`).
    pub confidence_pct: u8,
    /// Tick at which the action was assigned.
    pub assigned_at: u64,
    /// Last tick the action stays in force.
    pub valid_until: u64,
}

/// An active fight between NPCs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CombatSession {
    /// Session identifier.
    pub id: CombatId,
    /// NPCs taking part.
    pub participants: BTreeSet<NpcId>,
    /// Tick the session began.
    pub started_at: u64,
    /// Number of completed rounds.
    pub round: u32,
}

/// A ledger account: either a guild treasury or an NPC purse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Account {
    /// A guild treasury.
    Guild(GuildId),
    /// An NPC purse.
    Npc(NpcId),
}

impl core::fmt::Display for Account {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Guild(id) => write!(f, "guild:{id}"),
            Self::Npc(id) => write!(f, "npc:{id}"),
        }
    }
}

/// Resource balances per account.
///
/// Guild and NPC accounts are stored in separate maps so that every map key
/// serializes as a plain string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EconomyLedger {
    /// Guild treasuries.
    #[ts(as = "BTreeMap<GuildId, BTreeMap<Resource, String>>")]
    pub guilds: BTreeMap<GuildId, Balances>,
    /// NPC purses.
    #[ts(as = "BTreeMap<NpcId, BTreeMap<Resource, String>>")]
    pub npcs: BTreeMap<NpcId, Balances>,
}

impl EconomyLedger {
    /// Balances of `account`, if it has ever held anything.
    pub fn account(&self, account: Account) -> Option<&Balances> {
        match account {
            Account::Guild(id) => self.guilds.get(&id),
            Account::Npc(id) => self.npcs.get(&id),
        }
    }

    /// Mutable balances of `account`, created empty on first use.
    pub fn account_mut(&mut self, account: Account) -> &mut Balances {
        match account {
            Account::Guild(id) => self.guilds.entry(id).or_default(),
            Account::Npc(id) => self.npcs.entry(id).or_default(),
        }
    }

    /// Drop an account and everything it holds.
    pub fn close(&mut self, account: Account) -> Option<Balances> {
        match account {
            Account::Guild(id) => self.guilds.remove(&id),
            Account::Npc(id) => self.npcs.remove(&id),
        }
    }

    /// Balance of `resource` held by `account` (zero when absent).
    pub fn balance(&self, account: Account, resource: Resource) -> Decimal {
        self.account(account)
            .and_then(|b| b.get(&resource))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Every account with its balances, guilds first.
    pub fn accounts(&self) -> impl Iterator<Item = (Account, &Balances)> + '_ {
        self.guilds
            .iter()
            .map(|(id, b)| (Account::Guild(*id), b))
            .chain(self.npcs.iter().map(|(id, b)| (Account::Npc(*id), b)))
    }
}
