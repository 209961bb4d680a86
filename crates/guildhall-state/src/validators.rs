//! Pure validators run against the complete result of a transaction.
//!
//! Every validator is a side-effect-free predicate over a whole
//! [`GameState`]. Validators must be cheap (linear in state size, no I/O)
//! because they run on the tick thread, though the [`StateManager`] fans
//! them out across the rayon pool.
//!
//! [`StateManager`]: crate::manager::StateManager

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use guildhall_types::{Account, GameState, GuildId, MAX_HEALTH, NpcId};

use crate::ValidationError;

/// A pure predicate over a complete [`GameState`].
pub trait StateValidator: Send + Sync {
    /// Stable name reported in [`ValidationError::validator`].
    fn name(&self) -> &'static str;

    /// Return every violation found; empty means valid.
    fn validate(&self, state: &GameState) -> Vec<ValidationError>;
}

/// Adapter turning a closure into a [`StateValidator`].
pub struct FnValidator<F> {
    name: &'static str,
    check: F,
}

impl<F> FnValidator<F>
where
    F: Fn(&GameState) -> Vec<String> + Send + Sync,
{
    /// Wrap `check`; each returned string becomes one [`ValidationError`].
    pub const fn new(name: &'static str, check: F) -> Self {
        Self { name, check }
    }
}

impl<F> StateValidator for FnValidator<F>
where
    F: Fn(&GameState) -> Vec<String> + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn validate(&self, state: &GameState) -> Vec<ValidationError> {
        (self.check)(state)
            .into_iter()
            .map(|message| ValidationError::new(self.name, message))
            .collect()
    }
}

/// No guild roster exceeds its `member_limit`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuildCapacityValidator;

impl StateValidator for GuildCapacityValidator {
    fn name(&self) -> &'static str {
        "guild_capacity"
    }

    fn validate(&self, state: &GameState) -> Vec<ValidationError> {
        state
            .guilds
            .values()
            .filter(|g| g.member_count() > g.member_limit as usize)
            .map(|g| {
                ValidationError::new(
                    self.name(),
                    format!(
                        "guild {} has {} members, limit is {}",
                        g.name,
                        g.member_count(),
                        g.member_limit
                    ),
                )
                .with_subject(g.id.to_string())
            })
            .collect()
    }
}

/// No account holds a negative amount of any resource.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonNegativeBalanceValidator;

impl StateValidator for NonNegativeBalanceValidator {
    fn name(&self) -> &'static str {
        "non_negative_balance"
    }

    fn validate(&self, state: &GameState) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for (account, balances) in state.economy.accounts() {
            for (resource, amount) in balances {
                if *amount < Decimal::ZERO {
                    errors.push(
                        ValidationError::new(
                            self.name(),
                            format!("{account} holds {amount} {}", resource.as_str()),
                        )
                        .with_subject(account.to_string()),
                    );
                }
            }
        }
        errors
    }
}

/// Every guild has exactly one leader.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleLeaderValidator;

impl StateValidator for SingleLeaderValidator {
    fn name(&self) -> &'static str {
        "single_leader"
    }

    fn validate(&self, state: &GameState) -> Vec<ValidationError> {
        state
            .guilds
            .values()
            .filter_map(|g| {
                let leaders = g.leaders().count();
                (leaders != 1).then(|| {
                    ValidationError::new(
                        self.name(),
                        format!("guild {} has {leaders} leaders", g.name),
                    )
                    .with_subject(g.id.to_string())
                })
            })
            .collect()
    }
}

/// Cross-registry references resolve and agree with each other.
///
/// - every roster member exists and points back at the guild;
/// - every NPC's guild exists and lists the NPC;
/// - every combat participant exists, and no NPC fights in two sessions;
/// - every ledger account belongs to an existing guild or NPC.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceIntegrityValidator;

impl StateValidator for ReferenceIntegrityValidator {
    fn name(&self) -> &'static str {
        "reference_integrity"
    }

    fn validate(&self, state: &GameState) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut push = |subject: String, message: String| {
            errors.push(ValidationError::new(self.name(), message).with_subject(subject));
        };

        for guild in state.guilds.values() {
            for member in guild.members.keys() {
                match state.npcs.get(member) {
                    None => push(
                        guild.id.to_string(),
                        format!("guild {} lists unknown npc {member}", guild.name),
                    ),
                    Some(npc) if npc.guild != Some(guild.id) => push(
                        member.to_string(),
                        format!("npc {} is on the roster of {} but not a member", npc.name, guild.name),
                    ),
                    Some(_) => {}
                }
            }
        }

        for npc in state.npcs.values() {
            if let Some(guild_id) = npc.guild {
                let listed = state
                    .guilds
                    .get(&guild_id)
                    .is_some_and(|g| g.members.contains_key(&npc.id));
                if !listed {
                    push(
                        npc.id.to_string(),
                        format!("npc {} claims guild {guild_id} which does not list it", npc.name),
                    );
                }
            }
        }

        let mut fighting: BTreeMap<NpcId, usize> = BTreeMap::new();
        for combat in state.combats.values() {
            for participant in &combat.participants {
                if !state.npcs.contains_key(participant) {
                    push(
                        combat.id.to_string(),
                        format!("combat {} includes unknown npc {participant}", combat.id),
                    );
                }
                let count = fighting.entry(*participant).or_insert(0);
                *count = count.saturating_add(1);
            }
        }
        for (npc, sessions) in fighting {
            if sessions > 1 {
                push(npc.to_string(), format!("npc {npc} is in {sessions} combats"));
            }
        }

        for (account, _) in state.economy.accounts() {
            let exists = match account {
                Account::Guild(id) => state.guilds.contains_key(&id),
                Account::Npc(id) => state.npcs.contains_key(&id),
            };
            if !exists {
                push(account.to_string(), format!("ledger account {account} has no owner"));
            }
        }

        errors
    }
}

/// NPC health stays within `0..=MAX_HEALTH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthRangeValidator;

impl StateValidator for HealthRangeValidator {
    fn name(&self) -> &'static str {
        "health_range"
    }

    fn validate(&self, state: &GameState) -> Vec<ValidationError> {
        state
            .npcs
            .values()
            .filter(|n| n.health > MAX_HEALTH)
            .map(|n| {
                ValidationError::new(self.name(), format!("npc {} has health {}", n.name, n.health))
                    .with_subject(n.id.to_string())
            })
            .collect()
    }
}

/// Guild IDs whose roster is over capacity. Used by tests and tooling.
pub fn over_capacity(state: &GameState) -> Vec<GuildId> {
    state
        .guilds
        .values()
        .filter(|g| g.member_count() > g.member_limit as usize)
        .map(|g| g.id)
        .collect()
}
