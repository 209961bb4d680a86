//! Situation assembly: the slice of game state one decision request sees.
//!
//! Each NPC that needs a decision gets a [`Situation`] built from the latest
//! committed [`GameState`]. Stable, coarse inputs (health bands, roles, open
//! seats) are fingerprinted facts so that similar NPCs in similar spots share
//! cached decisions. Exact values the adapter needs are volatile facts.
//!
//! | Class     | When                                   |
//! |-----------|----------------------------------------|
//! | `combat`  | the NPC is a participant in a fight    |
//! | `idle`    | not fighting, health below the wounded threshold |
//! | `guild`   | a guild member                         |
//! | `economy` | unaffiliated                           |

use rust_decimal::prelude::ToPrimitive;

use guildhall_ai::adapt::HEALTH_FACT;
use guildhall_types::{
    Account, ActionKind, GameState, Guild, GuildId, GuildRole, Npc, NpcId, Resource, Situation,
    SituationClass,
};

/// Health below which an NPC outside combat stops to recover.
pub const DEFAULT_WOUNDED_BELOW: u32 = 30;

/// Width of one health band.
const HEALTH_BAND: u32 = 10;

/// Width of one treasury band, in gold.
const GOLD_BAND: u32 = 25;

/// Treasury bands above this are reported as this.
const MAX_GOLD_BAND: i64 = 8;

/// Builds [`Situation`]s from committed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SituationBuilder {
    wounded_below: u32,
}

impl Default for SituationBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_WOUNDED_BELOW)
    }
}

impl SituationBuilder {
    /// Builder that treats health below `wounded_below` as wounded.
    pub const fn new(wounded_below: u32) -> Self {
        Self { wounded_below }
    }

    /// The situation `npc` faces at `tick`, or `None` if it does not exist.
    pub fn build(&self, state: &GameState, npc: NpcId, tick: u64) -> Option<Situation> {
        let me = state.npc(npc)?;
        let wounded = me.health < self.wounded_below;

        let situation = if let Some(combat) = state.combat_of(npc) {
            let opponents: Vec<&Npc> = combat
                .participants
                .iter()
                .filter(|id| **id != npc)
                .filter_map(|id| state.npc(*id))
                .collect();
            let mut s = Situation::new(npc, SituationClass::Combat, tick)
                .with_fact("health_band", band(me.health, HEALTH_BAND))
                .with_fact("opponents", count(opponents.len()));
            // Weakest opponent first, ties broken by ID.
            if let Some(target) = opponents.iter().min_by_key(|o| (o.health, o.id)) {
                s = s
                    .with_flag("enemy_visible")
                    .with_fact("target_health_band", band(target.health, HEALTH_BAND))
                    .with_option(ActionKind::Attack { target: target.id });
            }
            s.with_option(ActionKind::Defend).with_option(ActionKind::Flee)
        } else if wounded {
            Situation::new(npc, SituationClass::Idle, tick)
                .with_fact("health_band", band(me.health, HEALTH_BAND))
                .with_option(ActionKind::Rest)
                .with_option(ActionKind::Idle)
        } else if let Some(guild) = me.guild.and_then(|g| state.guild(g)) {
            guild_situation(state, me, guild, tick)
        } else {
            economy_situation(state, me, tick)
        };

        let situation = if wounded {
            situation.with_flag("wounded")
        } else {
            situation
        };
        Some(situation.with_volatile(HEALTH_FACT, i64::from(me.health)))
    }
}

fn guild_situation(state: &GameState, me: &Npc, guild: &Guild, tick: u64) -> Situation {
    let role = guild.members.get(&me.id).copied().unwrap_or(GuildRole::Member);
    let seats = open_seats(guild);
    let treasury = gold_band(state, Account::Guild(guild.id));

    let mut s = Situation::new(me.id, SituationClass::Guild, tick)
        .with_fact("health_band", band(me.health, HEALTH_BAND))
        .with_fact("role", role_rank(role))
        .with_fact("open_seats", count(seats))
        .with_fact("treasury_band", treasury)
        .with_option(ActionKind::Gather { resource: Resource::Gold })
        .with_option(ActionKind::Gather { resource: Resource::Food })
        .with_option(ActionKind::Gather { resource: Resource::Wood })
        .with_option(ActionKind::Patrol)
        .with_option(ActionKind::Rest);

    match role {
        GuildRole::Leader => s = s.with_flag("leader"),
        GuildRole::Officer => s = s.with_flag("officer"),
        GuildRole::Member => s = s.with_option(ActionKind::LeaveGuild),
    }

    let may_recruit = matches!(role, GuildRole::Leader | GuildRole::Officer) && seats > 0;
    if let Some(recruit) = may_recruit.then(|| first_unaffiliated(state, me.id)).flatten() {
        s = s
            .with_flag("can_recruit")
            .with_option(ActionKind::Recruit { target: recruit });
    }
    s
}

fn economy_situation(state: &GameState, me: &Npc, tick: u64) -> Situation {
    let open: Vec<&Guild> = state.guilds.values().filter(|g| open_seats(g) > 0).collect();
    let mut s = Situation::new(me.id, SituationClass::Economy, tick)
        .with_fact("health_band", band(me.health, HEALTH_BAND))
        .with_fact("purse_band", gold_band(state, Account::Npc(me.id)))
        .with_fact("open_guilds", count(open.len()))
        .with_option(ActionKind::Gather { resource: Resource::Gold })
        .with_option(ActionKind::Gather { resource: Resource::Stone })
        .with_option(ActionKind::Gather { resource: Resource::Iron })
        .with_option(ActionKind::Rest);

    // Most open seats first, ties broken by ID.
    if let Some(best) = open
        .iter()
        .max_by_key(|g| (open_seats(g), std::cmp::Reverse(g.id)))
    {
        s = s
            .with_flag("guild_available")
            .with_option(ActionKind::JoinGuild { guild: best.id });
    }
    s
}

fn first_unaffiliated(state: &GameState, except: NpcId) -> Option<NpcId> {
    state
        .npcs
        .values()
        .find(|n| n.id != except && n.guild.is_none() && state.combat_of(n.id).is_none())
        .map(|n| n.id)
}

/// Seats left before the roster is full.
pub fn open_seats(guild: &Guild) -> usize {
    usize::try_from(guild.member_limit)
        .unwrap_or(usize::MAX)
        .saturating_sub(guild.member_count())
}

fn gold_band(state: &GameState, account: Account) -> i64 {
    let gold = state
        .balance(account, Resource::Gold)
        .floor()
        .to_u32()
        .unwrap_or(0);
    band(gold, GOLD_BAND).min(MAX_GOLD_BAND)
}

const fn role_rank(role: GuildRole) -> i64 {
    match role {
        GuildRole::Leader => 0,
        GuildRole::Officer => 1,
        GuildRole::Member => 2,
    }
}

fn band(value: u32, width: u32) -> i64 {
    i64::from(value.checked_div(width).unwrap_or(0))
}

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// The guild an NPC could be recruited into by `recruiter`, if any.
pub fn recruiting_guild(state: &GameState, recruiter: NpcId) -> Option<GuildId> {
    let guild = state.npc(recruiter)?.guild?;
    let role = state.guild(guild)?.members.get(&recruiter).copied()?;
    matches!(role, GuildRole::Leader | GuildRole::Officer).then_some(guild)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use guildhall_types::{CombatId, CombatSession};

    use super::*;

    fn npc(state: &mut GameState, name: &str, health: u32) -> NpcId {
        let id = NpcId::new();
        let mut n = Npc::new(id, name);
        n.health = health;
        state.npcs.insert(id, n);
        id
    }

    fn guild(state: &mut GameState, leader: NpcId, limit: u32) -> GuildId {
        let id = GuildId::new();
        state.guilds.insert(
            id,
            Guild {
                id,
                name: "Ravens".to_owned(),
                member_limit: limit,
                members: [(leader, GuildRole::Leader)].into_iter().collect(),
            },
        );
        if let Some(n) = state.npcs.get_mut(&leader) {
            n.guild = Some(id);
        }
        id
    }

    #[test]
    fn unknown_npc_has_no_situation() {
        assert!(SituationBuilder::default().build(&GameState::new(), NpcId::new(), 1).is_none());
    }

    #[test]
    fn fighters_get_combat_options() {
        let mut state = GameState::new();
        let a = npc(&mut state, "Ada", 80);
        let b = npc(&mut state, "Bram", 40);
        let id = CombatId::new();
        state.combats.insert(
            id,
            CombatSession {
                id,
                participants: BTreeSet::from([a, b]),
                started_at: 1,
                round: 0,
            },
        );

        let s = SituationBuilder::default().build(&state, a, 5).unwrap();
        assert_eq!(s.class, SituationClass::Combat);
        assert!(s.has_flag("enemy_visible"));
        assert_eq!(s.fact("health_band"), Some(8));
        assert_eq!(s.options.first(), Some(&ActionKind::Attack { target: b }));
        assert_eq!(s.volatile.get(HEALTH_FACT), Some(&80));
    }

    #[test]
    fn wounded_npcs_rest_outside_combat() {
        let mut state = GameState::new();
        let a = npc(&mut state, "Ada", 12);
        let s = SituationBuilder::default().build(&state, a, 1).unwrap();
        assert_eq!(s.class, SituationClass::Idle);
        assert!(s.has_flag("wounded"));
        assert_eq!(s.options, vec![ActionKind::Rest, ActionKind::Idle]);
    }

    #[test]
    fn leaders_can_recruit_unaffiliated_npcs() {
        let mut state = GameState::new();
        let leader = npc(&mut state, "Ada", 100);
        let loner = npc(&mut state, "Bram", 100);
        let g = guild(&mut state, leader, 3);

        let s = SituationBuilder::default().build(&state, leader, 1).unwrap();
        assert_eq!(s.class, SituationClass::Guild);
        assert!(s.has_flag("leader"));
        assert!(s.options.contains(&ActionKind::Recruit { target: loner }));
        assert!(!s.options.contains(&ActionKind::LeaveGuild));
        assert_eq!(s.fact("open_seats"), Some(2));
        assert_eq!(recruiting_guild(&state, leader), Some(g));

        let s = SituationBuilder::default().build(&state, loner, 1).unwrap();
        assert_eq!(s.class, SituationClass::Economy);
        assert!(s.options.contains(&ActionKind::JoinGuild { guild: g }));
    }

    #[test]
    fn full_guilds_are_not_offered() {
        let mut state = GameState::new();
        let leader = npc(&mut state, "Ada", 100);
        let loner = npc(&mut state, "Bram", 100);
        guild(&mut state, leader, 1);

        let s = SituationBuilder::default().build(&state, loner, 1).unwrap();
        assert!(!s.has_flag("guild_available"));
        assert!(!s.options.iter().any(|o| matches!(o, ActionKind::JoinGuild { .. })));
    }

    #[test]
    fn similar_npcs_share_a_fingerprint() {
        let mut state = GameState::new();
        let a = npc(&mut state, "Ada", 91);
        let b = npc(&mut state, "Bram", 97);
        let builder = SituationBuilder::default();
        let sa = builder.build(&state, a, 4).unwrap();
        let sb = builder.build(&state, b, 4).unwrap();
        assert_eq!(sa.fingerprint(), sb.fingerprint());
    }
}
