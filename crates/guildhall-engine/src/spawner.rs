//! Demo world seeding.
//!
//! At startup the spawner creates a handful of NPCs with random names,
//! founds guilds led by the first few, hands out the rest round-robin until
//! rosters are half full, funds each treasury, and opens one skirmish between
//! two unaffiliated NPCs. Everything goes through one [`StateManager`]
//! transaction so the default validators see the finished world.

use std::collections::BTreeSet;

use rand::Rng;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use guildhall_state::{StateManager, StateOp};
use guildhall_types::{Account, CombatId, GuildId, GuildRole, NpcId, Resource};

use crate::error::EngineError;

// -----------------------------------------------------------------------
// Configuration
// -----------------------------------------------------------------------

/// Demo world shape, read from the `world` section of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorldConfig {
    /// NPCs to spawn.
    #[serde(default = "default_npc_count")]
    pub npc_count: u32,

    /// Guilds to found. Each takes one NPC as its leader.
    #[serde(default = "default_guild_count")]
    pub guild_count: u32,

    /// Roster capacity of every guild.
    #[serde(default = "default_member_limit")]
    pub member_limit: u32,

    /// Gold credited to each treasury.
    #[serde(default = "default_starting_gold")]
    pub starting_gold: u32,

    /// Whether to open a fight between two unaffiliated NPCs.
    #[serde(default = "default_skirmish")]
    pub skirmish: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            npc_count: default_npc_count(),
            guild_count: default_guild_count(),
            member_limit: default_member_limit(),
            starting_gold: default_starting_gold(),
            skirmish: default_skirmish(),
        }
    }
}

const fn default_npc_count() -> u32 {
    12
}

const fn default_guild_count() -> u32 {
    2
}

const fn default_member_limit() -> u32 {
    6
}

const fn default_starting_gold() -> u32 {
    20
}

const fn default_skirmish() -> bool {
    true
}

// -----------------------------------------------------------------------
// Name pools
// -----------------------------------------------------------------------

/// NPC names. Picked without replacement.
const NPC_NAMES: &[&str] = &[
    "Alder", "Birch", "Cedar", "Dusk", "Ember", "Fern", "Grove", "Haze",
    "Iris", "Juniper", "Kestrel", "Lark", "Moss", "Nettle", "Oak", "Pine",
    "Quill", "Reed", "Sage", "Thorn", "Umber", "Vale", "Wren", "Yarrow",
];

/// Guild names. Picked without replacement.
const GUILD_NAMES: &[&str] = &[
    "Ravens", "Ironhands", "Lantern Court", "Saltwardens", "Gilded Oar", "Ashen Vow",
];

// -----------------------------------------------------------------------
// Seeding
// -----------------------------------------------------------------------

/// What the spawner created.
#[derive(Debug)]
pub struct SeedWorld {
    /// Every spawned NPC, in spawn order.
    pub npcs: Vec<NpcId>,
    /// Every founded guild.
    pub guilds: Vec<GuildId>,
    /// The opening skirmish, if any.
    pub skirmish: Option<CombatId>,
}

/// Build the demo world's ops without applying them.
pub fn seed_ops(config: &WorldConfig, rng: &mut impl Rng) -> Result<(SeedWorld, Vec<StateOp>), EngineError> {
    let npc_count = usize::try_from(config.npc_count).unwrap_or(usize::MAX);
    let guild_count = usize::try_from(config.guild_count).unwrap_or(usize::MAX);

    if npc_count > NPC_NAMES.len() {
        return Err(EngineError::Spawner {
            message: format!(
                "requested {npc_count} NPCs but the name pool only has {} entries",
                NPC_NAMES.len()
            ),
        });
    }
    if guild_count > GUILD_NAMES.len() || guild_count > npc_count {
        return Err(EngineError::Spawner {
            message: format!("cannot found {guild_count} guilds with {npc_count} NPCs"),
        });
    }
    if guild_count > 0 && config.member_limit == 0 {
        return Err(EngineError::Spawner {
            message: String::from("member_limit must be at least 1"),
        });
    }

    let names = pick_unique(rng, NPC_NAMES, npc_count);
    let guild_names = pick_unique(rng, GUILD_NAMES, guild_count);

    let mut ops = Vec::new();
    let npcs: Vec<NpcId> = names
        .into_iter()
        .map(|name| {
            let id = NpcId::new();
            info!(npc = %id, name, "Spawned NPC");
            ops.push(StateOp::SpawnNpc { id, name: name.to_owned() });
            id
        })
        .collect();

    let (leaders, rest) = npcs.split_at(guild_count);
    let mut guilds = Vec::with_capacity(guild_count);
    for (leader, name) in leaders.iter().zip(guild_names) {
        let id = GuildId::new();
        ops.push(StateOp::CreateGuild {
            id,
            name: name.to_owned(),
            member_limit: config.member_limit,
            leader: *leader,
        });
        if config.starting_gold > 0 {
            ops.push(StateOp::Credit {
                account: Account::Guild(id),
                resource: Resource::Gold,
                amount: Decimal::from(config.starting_gold),
            });
        }
        info!(guild = %id, name, leader = %leader, "Founded guild");
        guilds.push(id);
    }

    // Fill rosters to half capacity, round-robin.
    let seats_each = usize::try_from(config.member_limit / 2).unwrap_or(0).saturating_sub(1);
    let to_place = seats_each.saturating_mul(guild_count).min(rest.len());
    let (members, unaffiliated) = rest.split_at(to_place);
    for (i, npc) in members.iter().enumerate() {
        let slot = i.checked_rem(guild_count).unwrap_or(0);
        if let Some(guild) = guilds.get(slot) {
            ops.push(StateOp::AddMember {
                guild: *guild,
                npc: *npc,
                role: GuildRole::Member,
            });
        }
    }

    let skirmish = match unaffiliated {
        [a, b, ..] if config.skirmish => {
            let id = CombatId::new();
            ops.push(StateOp::StartCombat {
                id,
                participants: BTreeSet::from([*a, *b]),
                tick: 0,
            });
            info!(combat = %id, "Opened skirmish");
            Some(id)
        }
        _ => None,
    };

    Ok((SeedWorld { npcs, guilds, skirmish }, ops))
}

/// Seed `state` with the demo world in one transaction.
pub fn seed_world(config: &WorldConfig, state: &mut StateManager) -> Result<SeedWorld, EngineError> {
    let (world, ops) = seed_ops(config, &mut rand::rng())?;
    let result = state.apply_ops(ops);
    if !result.success {
        return Err(EngineError::Spawner {
            message: result
                .failure_summary()
                .unwrap_or_else(|| String::from("seed transaction rejected")),
        });
    }
    info!(
        npcs = world.npcs.len(),
        guilds = world.guilds.len(),
        version = result.version,
        "Demo world seeded"
    );
    Ok(world)
}

/// Partial Fisher-Yates: the first `count` of a shuffled copy of `pool`.
fn pick_unique<'a>(rng: &mut impl Rng, pool: &[&'a str], count: usize) -> Vec<&'a str> {
    let mut names = pool.to_vec();
    let len = names.len();
    for i in 0..count.min(len) {
        let j = rng.random_range(i..len);
        names.swap(i, j);
    }
    names.truncate(count);
    names
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn seeded(config: &WorldConfig) -> (SeedWorld, StateManager) {
        let mut state = StateManager::with_default_validators();
        let world = seed_world(config, &mut state).unwrap();
        (world, state)
    }

    #[test]
    fn default_world_passes_validation() {
        let (world, state) = seeded(&WorldConfig::default());
        let current = state.current();
        assert_eq!(world.npcs.len(), 12);
        assert_eq!(current.npcs.len(), 12);
        assert_eq!(current.guilds.len(), 2);
        assert!(world.skirmish.is_some());
        assert_eq!(current.combats.len(), 1);
        assert_eq!(state.version(), 1);
    }

    #[test]
    fn rosters_are_half_full() {
        let (world, state) = seeded(&WorldConfig::default());
        let current = state.current();
        for guild in &world.guilds {
            assert_eq!(current.guild(*guild).unwrap().member_count(), 3);
            assert_eq!(
                current.balance(Account::Guild(*guild), Resource::Gold),
                Decimal::from(20)
            );
        }
    }

    #[test]
    fn names_are_unique() {
        let (_, state) = seeded(&WorldConfig::default());
        let names: BTreeSet<_> = state.current().npcs.values().map(|n| n.name.clone()).collect();
        assert_eq!(names.len(), 12);
    }

    #[test]
    fn no_skirmish_without_two_loners() {
        let config = WorldConfig {
            npc_count: 3,
            guild_count: 2,
            ..WorldConfig::default()
        };
        let (world, state) = seeded(&config);
        assert!(world.skirmish.is_none());
        assert!(state.current().combats.is_empty());
    }

    #[test]
    fn too_many_npcs_is_rejected() {
        let config = WorldConfig {
            npc_count: 100,
            ..WorldConfig::default()
        };
        let err = seed_ops(&config, &mut rand::rng()).unwrap_err();
        assert!(matches!(err, EngineError::Spawner { .. }));
    }

    #[test]
    fn more_guilds_than_npcs_is_rejected() {
        let config = WorldConfig {
            npc_count: 1,
            guild_count: 2,
            ..WorldConfig::default()
        };
        assert!(seed_ops(&config, &mut rand::rng()).is_err());
    }

    #[test]
    fn empty_world_is_fine() {
        let config = WorldConfig {
            npc_count: 0,
            guild_count: 0,
            ..WorldConfig::default()
        };
        let (world, _ops) = seed_ops(&config, &mut rand::rng()).unwrap();
        assert!(world.npcs.is_empty());
        assert!(world.guilds.is_empty());
    }
}
