//! State operations and their application to a working copy.
//!
//! A [`StateOp`] only fails for *structural* reasons: an ID that does not
//! exist, an ID that already exists, or an arithmetic overflow. Business
//! rules (guild capacity, non-negative balances, one leader per guild,
//! cross-registry integrity) are deliberately not checked here; they are the
//! validators' job and run against the complete result of a transaction.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use guildhall_types::{
    Account, ActionKind, AssignedAction, CombatId, CombatSession, GameState, Guild, GuildId,
    GuildRole, MAX_HEALTH, Npc, NpcId, Resource,
};

use crate::OperationError;

/// One mutation of the game state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StateOp {
    /// Register a new NPC at full health.
    SpawnNpc {
        /// New NPC ID.
        id: NpcId,
        /// Display name.
        name: String,
    },
    /// Remove an NPC, detaching it from its guild, combats, and purse.
    RemoveNpc {
        /// The NPC to remove.
        id: NpcId,
    },
    /// Set an NPC's health.
    SetNpcHealth {
        /// The NPC.
        id: NpcId,
        /// New health value.
        health: u32,
    },
    /// Found a guild with `leader` as its first member.
    CreateGuild {
        /// New guild ID.
        id: GuildId,
        /// Display name.
        name: String,
        /// Roster capacity.
        member_limit: u32,
        /// Founding leader.
        leader: NpcId,
    },
    /// Dissolve a guild and close its treasury.
    DisbandGuild {
        /// The guild.
        id: GuildId,
    },
    /// Add an NPC to a guild roster.
    AddMember {
        /// The guild.
        guild: GuildId,
        /// The NPC joining.
        npc: NpcId,
        /// Role on joining.
        role: GuildRole,
    },
    /// Remove an NPC from a guild roster.
    RemoveMember {
        /// The guild.
        guild: GuildId,
        /// The NPC leaving.
        npc: NpcId,
    },
    /// Change a member's role.
    SetRole {
        /// The guild.
        guild: GuildId,
        /// The member.
        npc: NpcId,
        /// New role.
        role: GuildRole,
    },
    /// Open a combat session.
    StartCombat {
        /// New combat ID.
        id: CombatId,
        /// Fighting NPCs.
        participants: BTreeSet<NpcId>,
        /// Tick the fight begins.
        tick: u64,
    },
    /// Close a combat session.
    EndCombat {
        /// The combat.
        id: CombatId,
    },
    /// Count one more completed round.
    AdvanceCombatRound {
        /// The combat.
        id: CombatId,
    },
    /// Add resources to an account.
    Credit {
        /// Receiving account.
        account: Account,
        /// Resource.
        resource: Resource,
        /// Positive amount.
        amount: Decimal,
    },
    /// Remove resources from an account. May leave a negative balance,
    /// which the balance validator then rejects.
    Debit {
        /// Paying account.
        account: Account,
        /// Resource.
        resource: Resource,
        /// Positive amount.
        amount: Decimal,
    },
    /// Move resources between accounts.
    Transfer {
        /// Paying account.
        from: Account,
        /// Receiving account.
        to: Account,
        /// Resource.
        resource: Resource,
        /// Positive amount.
        amount: Decimal,
    },
    /// Put a decided action into force for an NPC.
    AssignAction {
        /// The NPC.
        npc: NpcId,
        /// The action.
        action: ActionKind,
        /// Confidence in whole percent.
        confidence_pct: u8,
        /// Tick of assignment.
        assigned_at: u64,
        /// Last tick the action applies.
        valid_until: u64,
    },
    /// Drop an NPC's current action.
    ClearAction {
        /// The NPC.
        npc: NpcId,
    },
}

impl StateOp {
    /// Short stable name, used in logs and failure reports.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SpawnNpc { .. } => "spawn_npc",
            Self::RemoveNpc { .. } => "remove_npc",
            Self::SetNpcHealth { .. } => "set_npc_health",
            Self::CreateGuild { .. } => "create_guild",
            Self::DisbandGuild { .. } => "disband_guild",
            Self::AddMember { .. } => "add_member",
            Self::RemoveMember { .. } => "remove_member",
            Self::SetRole { .. } => "set_role",
            Self::StartCombat { .. } => "start_combat",
            Self::EndCombat { .. } => "end_combat",
            Self::AdvanceCombatRound { .. } => "advance_combat_round",
            Self::Credit { .. } => "credit",
            Self::Debit { .. } => "debit",
            Self::Transfer { .. } => "transfer",
            Self::AssignAction { .. } => "assign_action",
            Self::ClearAction { .. } => "clear_action",
        }
    }

    /// Apply this operation to `state`.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError`] on unknown or duplicate IDs, non-positive
    /// amounts, or overflow. `state` may be partially modified on error;
    /// callers apply operations to a working copy only.
    pub fn apply(&self, state: &mut GameState) -> Result<(), OperationError> {
        match self {
            Self::SpawnNpc { id, name } => {
                if state.npcs.contains_key(id) {
                    return Err(OperationError::DuplicateNpc(*id));
                }
                state.npcs.insert(*id, Npc::new(*id, name.clone()));
            }
            Self::RemoveNpc { id } => remove_npc(state, *id)?,
            Self::SetNpcHealth { id, health } => {
                npc_mut(state, *id)?.health = (*health).min(MAX_HEALTH);
            }
            Self::CreateGuild {
                id,
                name,
                member_limit,
                leader,
            } => {
                if state.guilds.contains_key(id) {
                    return Err(OperationError::DuplicateGuild(*id));
                }
                npc_mut(state, *leader)?.guild = Some(*id);
                let mut guild = Guild {
                    id: *id,
                    name: name.clone(),
                    member_limit: *member_limit,
                    members: std::collections::BTreeMap::new(),
                };
                guild.members.insert(*leader, GuildRole::Leader);
                state.guilds.insert(*id, guild);
            }
            Self::DisbandGuild { id } => {
                let guild = state
                    .guilds
                    .remove(id)
                    .ok_or(OperationError::UnknownGuild(*id))?;
                for member in guild.members.keys() {
                    if let Some(npc) = state.npcs.get_mut(member) {
                        if npc.guild == Some(*id) {
                            npc.guild = None;
                        }
                    }
                }
                state.economy.close(Account::Guild(*id));
            }
            Self::AddMember { guild, npc, role } => {
                npc_mut(state, *npc)?.guild = Some(*guild);
                let roster = &mut guild_mut(state, *guild)?.members;
                if roster.contains_key(npc) {
                    return Err(OperationError::AlreadyMember {
                        guild: *guild,
                        npc: *npc,
                    });
                }
                roster.insert(*npc, *role);
            }
            Self::RemoveMember { guild, npc } => {
                guild_mut(state, *guild)?
                    .members
                    .remove(npc)
                    .ok_or(OperationError::NotMember {
                        guild: *guild,
                        npc: *npc,
                    })?;
                if let Some(record) = state.npcs.get_mut(npc) {
                    if record.guild == Some(*guild) {
                        record.guild = None;
                    }
                }
            }
            Self::SetRole { guild, npc, role } => {
                let slot = guild_mut(state, *guild)?
                    .members
                    .get_mut(npc)
                    .ok_or(OperationError::NotMember {
                        guild: *guild,
                        npc: *npc,
                    })?;
                *slot = *role;
            }
            Self::StartCombat {
                id,
                participants,
                tick,
            } => {
                if state.combats.contains_key(id) {
                    return Err(OperationError::DuplicateCombat(*id));
                }
                if let Some(missing) = participants.iter().find(|p| !state.npcs.contains_key(p)) {
                    return Err(OperationError::UnknownNpc(*missing));
                }
                state.combats.insert(
                    *id,
                    CombatSession {
                        id: *id,
                        participants: participants.clone(),
                        started_at: *tick,
                        round: 0,
                    },
                );
            }
            Self::EndCombat { id } => {
                state
                    .combats
                    .remove(id)
                    .ok_or(OperationError::UnknownCombat(*id))?;
            }
            Self::AdvanceCombatRound { id } => {
                let combat = state
                    .combats
                    .get_mut(id)
                    .ok_or(OperationError::UnknownCombat(*id))?;
                combat.round = combat
                    .round
                    .checked_add(1)
                    .ok_or(OperationError::Overflow("combat round"))?;
            }
            Self::Credit {
                account,
                resource,
                amount,
            } => {
                ensure_positive(*amount)?;
                ensure_account(state, *account)?;
                adjust(state, *account, *resource, *amount)?;
            }
            Self::Debit {
                account,
                resource,
                amount,
            } => {
                ensure_positive(*amount)?;
                ensure_account(state, *account)?;
                adjust(state, *account, *resource, -*amount)?;
            }
            Self::Transfer {
                from,
                to,
                resource,
                amount,
            } => {
                ensure_positive(*amount)?;
                ensure_account(state, *from)?;
                ensure_account(state, *to)?;
                adjust(state, *from, *resource, -*amount)?;
                adjust(state, *to, *resource, *amount)?;
            }
            Self::AssignAction {
                npc,
                action,
                confidence_pct,
                assigned_at,
                valid_until,
            } => {
                npc_mut(state, *npc)?.current_action = Some(AssignedAction {
                    action: *action,
                    confidence_pct: (*confidence_pct).min(100),
                    assigned_at: *assigned_at,
                    valid_until: *valid_until,
                });
            }
            Self::ClearAction { npc } => {
                npc_mut(state, *npc)?.current_action = None;
            }
        }
        Ok(())
    }
}

fn npc_mut(state: &mut GameState, id: NpcId) -> Result<&mut Npc, OperationError> {
    state.npcs.get_mut(&id).ok_or(OperationError::UnknownNpc(id))
}

fn guild_mut(state: &mut GameState, id: GuildId) -> Result<&mut Guild, OperationError> {
    state
        .guilds
        .get_mut(&id)
        .ok_or(OperationError::UnknownGuild(id))
}

fn remove_npc(state: &mut GameState, id: NpcId) -> Result<(), OperationError> {
    let npc = state.npcs.remove(&id).ok_or(OperationError::UnknownNpc(id))?;
    if let Some(guild) = npc.guild.and_then(|g| state.guilds.get_mut(&g)) {
        guild.members.remove(&id);
    }
    for combat in state.combats.values_mut() {
        combat.participants.remove(&id);
    }
    state.combats.retain(|_, c| !c.participants.is_empty());
    state.economy.close(Account::Npc(id));
    Ok(())
}

fn ensure_positive(amount: Decimal) -> Result<(), OperationError> {
    if amount <= Decimal::ZERO {
        return Err(OperationError::NonPositiveAmount(amount));
    }
    Ok(())
}

fn ensure_account(state: &GameState, account: Account) -> Result<(), OperationError> {
    let exists = match account {
        Account::Guild(id) => state.guilds.contains_key(&id),
        Account::Npc(id) => state.npcs.contains_key(&id),
    };
    if exists {
        Ok(())
    } else {
        Err(OperationError::UnknownAccount(account))
    }
}

fn adjust(
    state: &mut GameState,
    account: Account,
    resource: Resource,
    delta: Decimal,
) -> Result<(), OperationError> {
    let slot = state
        .economy
        .account_mut(account)
        .entry(resource)
        .or_insert(Decimal::ZERO);
    *slot = slot
        .checked_add(delta)
        .ok_or(OperationError::Overflow("ledger balance"))?;
    Ok(())
}
