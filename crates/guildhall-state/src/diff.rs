//! Entity-level differences between two committed states.
//!
//! A [`StateDiff`] is what presentation and other observers receive after
//! every commit or restore. Each [`StateChange`] maps to one
//! `state.<entity>.<change>` event name.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use guildhall_types::{Account, Balances, CombatId, GameState, GuildId, NpcId, Resource};

/// One entity-level change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum StateChange {
    /// A new NPC was registered.
    NpcAdded {
        /// The NPC.
        id: NpcId,
    },
    /// An NPC was removed.
    NpcRemoved {
        /// The NPC.
        id: NpcId,
    },
    /// An existing NPC record changed.
    NpcUpdated {
        /// The NPC.
        id: NpcId,
    },
    /// A guild was founded.
    GuildAdded {
        /// The guild.
        id: GuildId,
    },
    /// A guild was disbanded.
    GuildRemoved {
        /// The guild.
        id: GuildId,
    },
    /// A guild's name, limit, or roster changed.
    GuildUpdated {
        /// The guild.
        id: GuildId,
    },
    /// A combat session opened.
    CombatStarted {
        /// The combat.
        id: CombatId,
    },
    /// A combat session closed.
    CombatEnded {
        /// The combat.
        id: CombatId,
    },
    /// A combat session's round or participants changed.
    CombatUpdated {
        /// The combat.
        id: CombatId,
    },
    /// An account balance changed. Missing balances count as zero.
    BalanceChanged {
        /// The account.
        account: Account,
        /// The resource.
        resource: Resource,
        /// Balance before.
        before: Decimal,
        /// Balance after.
        after: Decimal,
    },
}

impl StateChange {
    /// The `state.<entity>.<change>` event name for this change.
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::NpcAdded { .. } => "state.npc.added",
            Self::NpcRemoved { .. } => "state.npc.removed",
            Self::NpcUpdated { .. } => "state.npc.updated",
            Self::GuildAdded { .. } => "state.guild.added",
            Self::GuildRemoved { .. } => "state.guild.removed",
            Self::GuildUpdated { .. } => "state.guild.updated",
            Self::CombatStarted { .. } => "state.combat.started",
            Self::CombatEnded { .. } => "state.combat.ended",
            Self::CombatUpdated { .. } => "state.combat.updated",
            Self::BalanceChanged { .. } => "state.economy.balance_changed",
        }
    }
}

/// All changes between two consecutive state versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDiff {
    /// Version before the change.
    pub from_version: u64,
    /// Version after the change.
    pub to_version: u64,
    /// Changes in registry order: NPCs, guilds, combats, balances.
    pub changes: Vec<StateChange>,
}

impl StateDiff {
    /// Compare `before` and `after`.
    pub fn between(before: &GameState, after: &GameState, from_version: u64, to_version: u64) -> Self {
        let mut changes = Vec::new();

        diff_registry(
            &before.npcs,
            &after.npcs,
            &mut changes,
            |id| StateChange::NpcAdded { id },
            |id| StateChange::NpcRemoved { id },
            |id| StateChange::NpcUpdated { id },
        );
        diff_registry(
            &before.guilds,
            &after.guilds,
            &mut changes,
            |id| StateChange::GuildAdded { id },
            |id| StateChange::GuildRemoved { id },
            |id| StateChange::GuildUpdated { id },
        );
        diff_registry(
            &before.combats,
            &after.combats,
            &mut changes,
            |id| StateChange::CombatStarted { id },
            |id| StateChange::CombatEnded { id },
            |id| StateChange::CombatUpdated { id },
        );

        let empty = Balances::new();
        let accounts: BTreeSet<Account> = before
            .economy
            .accounts()
            .chain(after.economy.accounts())
            .map(|(account, _)| account)
            .collect();
        for account in accounts {
            let old = before.economy.account(account).unwrap_or(&empty);
            let new = after.economy.account(account).unwrap_or(&empty);
            let resources: BTreeSet<Resource> = old.keys().chain(new.keys()).copied().collect();
            for resource in resources {
                let before_amount = old.get(&resource).copied().unwrap_or(Decimal::ZERO);
                let after_amount = new.get(&resource).copied().unwrap_or(Decimal::ZERO);
                if before_amount != after_amount {
                    changes.push(StateChange::BalanceChanged {
                        account,
                        resource,
                        before: before_amount,
                        after: after_amount,
                    });
                }
            }
        }

        Self {
            from_version,
            to_version,
            changes,
        }
    }

    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

fn diff_registry<K, V>(
    before: &BTreeMap<K, V>,
    after: &BTreeMap<K, V>,
    changes: &mut Vec<StateChange>,
    added: impl Fn(K) -> StateChange,
    removed: impl Fn(K) -> StateChange,
    updated: impl Fn(K) -> StateChange,
) where
    K: Ord + Copy,
    V: PartialEq,
{
    for (id, old) in before {
        match after.get(id) {
            None => changes.push(removed(*id)),
            Some(new) if new != old => changes.push(updated(*id)),
            Some(_) => {}
        }
    }
    for id in after.keys() {
        if !before.contains_key(id) {
            changes.push(added(*id));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use guildhall_types::Npc;

    use super::*;

    #[test]
    fn identical_states_produce_no_changes() {
        let mut state = GameState::new();
        let id = NpcId::new();
        state.npcs.insert(id, Npc::new(id, "Ada"));
        let diff = StateDiff::between(&state, &state.clone(), 4, 5);
        assert!(diff.is_empty());
        assert_eq!(diff.to_version, 5);
    }

    #[test]
    fn reports_added_removed_and_updated_entities() {
        let kept = NpcId::new();
        let gone = NpcId::new();
        let fresh = NpcId::new();
        let mut before = GameState::new();
        before.npcs.insert(kept, Npc::new(kept, "Kept"));
        before.npcs.insert(gone, Npc::new(gone, "Gone"));

        let mut after = before.clone();
        after.npcs.remove(&gone);
        after.npcs.insert(fresh, Npc::new(fresh, "Fresh"));
        after.npcs.get_mut(&kept).unwrap().health = 10;

        let diff = StateDiff::between(&before, &after, 0, 1);
        assert_eq!(diff.len(), 3);
        assert!(diff.changes.contains(&StateChange::NpcRemoved { id: gone }));
        assert!(diff.changes.contains(&StateChange::NpcAdded { id: fresh }));
        assert!(diff.changes.contains(&StateChange::NpcUpdated { id: kept }));
    }

    #[test]
    fn balance_changes_treat_missing_as_zero() {
        let npc = NpcId::new();
        let before = GameState::new();
        let mut after = GameState::new();
        after
            .economy
            .account_mut(Account::Npc(npc))
            .insert(Resource::Gold, Decimal::new(7, 0));
        let diff = StateDiff::between(&before, &after, 0, 1);
        let change = diff.changes.first().unwrap();
        assert_eq!(change.event_name(), "state.economy.balance_changed");
        assert_eq!(
            *change,
            StateChange::BalanceChanged {
                account: Account::Npc(npc),
                resource: Resource::Gold,
                before: Decimal::ZERO,
                after: Decimal::new(7, 0),
            }
        );
    }
}
