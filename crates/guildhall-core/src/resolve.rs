//! Action resolution: what an applied decision does to the world.
//!
//! Once a decision has been assigned to an NPC, its effect is expressed as a
//! small list of [`StateOp`]s executed in a transaction of its own, so one
//! NPC's rejected effect never rolls back another's. The reward reported to
//! the AI engine depends on whether that transaction commits.

use rust_decimal::Decimal;

use guildhall_state::StateOp;
use guildhall_types::{Account, ActionKind, GameState, GuildRole, MAX_HEALTH, NpcId};

use crate::situation::recruiting_guild;

/// Health restored by one `rest`.
pub const REST_HEAL: u32 = 10;

/// Damage dealt by one `attack`.
pub const ATTACK_DAMAGE: u32 = 15;

/// Reward for an action whose preconditions no longer hold or whose effect
/// transaction was rejected.
pub const REJECTED_REWARD: f32 = -1.0;

/// The effect of one action.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Operations to execute; may be empty.
    pub ops: Vec<StateOp>,
    /// Reward if the operations commit.
    pub reward: f32,
}

impl Resolution {
    const fn new(ops: Vec<StateOp>, reward: f32) -> Self {
        Self { ops, reward }
    }

    const fn nothing(reward: f32) -> Self {
        Self::new(Vec::new(), reward)
    }
}

/// Resolve `action` for `npc` against `state`.
///
/// Returns `None` when the action cannot apply at all, e.g. attacking an NPC
/// that is not in the same fight.
pub fn resolve(state: &GameState, npc: NpcId, action: &ActionKind) -> Option<Resolution> {
    let me = state.npc(npc)?;
    let resolution = match action {
        ActionKind::Idle => Resolution::nothing(0.0),
        ActionKind::Patrol => Resolution::nothing(0.25),
        ActionKind::Rest => {
            let health = me.health.saturating_add(REST_HEAL).min(MAX_HEALTH);
            let reward = if me.health < MAX_HEALTH { 0.5 } else { 0.0 };
            Resolution::new(vec![StateOp::SetNpcHealth { id: npc, health }], reward)
        }
        ActionKind::Gather { resource } => {
            let account = me.guild.map_or(Account::Npc(npc), Account::Guild);
            Resolution::new(
                vec![StateOp::Credit {
                    account,
                    resource: *resource,
                    amount: Decimal::ONE,
                }],
                0.5,
            )
        }
        ActionKind::Attack { target } => {
            let combat = state.combat_of(npc)?;
            if !combat.participants.contains(target) {
                return None;
            }
            let health = state.npc(*target)?.health.saturating_sub(ATTACK_DAMAGE);
            let mut ops = vec![
                StateOp::SetNpcHealth { id: *target, health },
                StateOp::AdvanceCombatRound { id: combat.id },
            ];
            if health == 0 {
                ops.push(StateOp::EndCombat { id: combat.id });
            }
            Resolution::new(ops, 1.0)
        }
        ActionKind::Defend => match state.combat_of(npc) {
            Some(combat) => Resolution::new(vec![StateOp::AdvanceCombatRound { id: combat.id }], 0.25),
            None => Resolution::nothing(0.0),
        },
        ActionKind::Flee => {
            let combat = state.combat_of(npc)?;
            Resolution::new(vec![StateOp::EndCombat { id: combat.id }], 0.25)
        }
        ActionKind::JoinGuild { guild } => {
            if me.guild.is_some() || state.guild(*guild).is_none() {
                return None;
            }
            Resolution::new(
                vec![StateOp::AddMember {
                    guild: *guild,
                    npc,
                    role: GuildRole::Member,
                }],
                1.0,
            )
        }
        ActionKind::LeaveGuild => {
            let guild = me.guild?;
            Resolution::new(vec![StateOp::RemoveMember { guild, npc }], 0.0)
        }
        ActionKind::Recruit { target } => {
            let guild = recruiting_guild(state, npc)?;
            if state.npc(*target)?.guild.is_some() {
                return None;
            }
            Resolution::new(
                vec![StateOp::AddMember {
                    guild,
                    npc: *target,
                    role: GuildRole::Member,
                }],
                1.0,
            )
        }
    };
    Some(resolution)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use guildhall_types::{CombatId, CombatSession, Guild, GuildId, Npc, Resource};

    use super::*;

    fn world() -> (GameState, NpcId, NpcId, GuildId) {
        let mut state = GameState::new();
        let leader = NpcId::new();
        let loner = NpcId::new();
        let guild = GuildId::new();
        let mut l = Npc::new(leader, "Ada");
        l.guild = Some(guild);
        state.npcs.insert(leader, l);
        state.npcs.insert(loner, Npc::new(loner, "Bram"));
        state.guilds.insert(
            guild,
            Guild {
                id: guild,
                name: "Ravens".to_owned(),
                member_limit: 4,
                members: [(leader, GuildRole::Leader)].into_iter().collect(),
            },
        );
        (state, leader, loner, guild)
    }

    #[test]
    fn gather_credits_the_guild_treasury() {
        let (state, leader, loner, guild) = world();
        let r = resolve(&state, leader, &ActionKind::Gather { resource: Resource::Wood }).unwrap();
        assert_eq!(
            r.ops,
            vec![StateOp::Credit {
                account: Account::Guild(guild),
                resource: Resource::Wood,
                amount: Decimal::ONE
            }]
        );

        let r = resolve(&state, loner, &ActionKind::Gather { resource: Resource::Gold }).unwrap();
        assert!(matches!(r.ops.first(), Some(StateOp::Credit { account: Account::Npc(id), .. }) if *id == loner));
    }

    #[test]
    fn attack_requires_a_shared_fight() {
        let (mut state, leader, loner, _) = world();
        assert!(resolve(&state, leader, &ActionKind::Attack { target: loner }).is_none());

        let id = CombatId::new();
        state.combats.insert(
            id,
            CombatSession {
                id,
                participants: BTreeSet::from([leader, loner]),
                started_at: 1,
                round: 0,
            },
        );
        if let Some(n) = state.npcs.get_mut(&loner) {
            n.health = 10;
        }
        let r = resolve(&state, leader, &ActionKind::Attack { target: loner }).unwrap();
        assert_eq!(r.ops.len(), 3);
        assert_eq!(r.ops.last(), Some(&StateOp::EndCombat { id }));
    }

    #[test]
    fn recruit_needs_an_unaffiliated_target() {
        let (state, leader, loner, guild) = world();
        let r = resolve(&state, leader, &ActionKind::Recruit { target: loner }).unwrap();
        assert_eq!(
            r.ops,
            vec![StateOp::AddMember {
                guild,
                npc: loner,
                role: GuildRole::Member
            }]
        );
        assert!(resolve(&state, loner, &ActionKind::Recruit { target: leader }).is_none());
    }

    #[test]
    fn join_and_leave_follow_membership() {
        let (state, leader, loner, guild) = world();
        assert!(resolve(&state, leader, &ActionKind::JoinGuild { guild }).is_none());
        assert!(resolve(&state, loner, &ActionKind::JoinGuild { guild }).is_some());
        assert!(resolve(&state, loner, &ActionKind::LeaveGuild).is_none());
    }

    #[test]
    fn rest_caps_at_max_health() {
        let (state, leader, _, _) = world();
        let r = resolve(&state, leader, &ActionKind::Rest).unwrap();
        assert_eq!(r.ops, vec![StateOp::SetNpcHealth { id: leader, health: MAX_HEALTH }]);
        assert!(r.reward.abs() < f32::EPSILON);
    }
}
