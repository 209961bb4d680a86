//! Enumeration types shared across the kernel.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Economy
// ---------------------------------------------------------------------------

/// A resource tracked by the economy ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    /// Minted currency.
    Gold,
    /// Rations consumed by guild members.
    Food,
    /// Timber for construction.
    Wood,
    /// Quarried stone for construction.
    Stone,
    /// Smelted iron for arms and tools.
    Iron,
}

impl Resource {
    /// Every resource, in ledger order.
    pub const ALL: [Self; 5] = [Self::Gold, Self::Food, Self::Wood, Self::Stone, Self::Iron];

    /// Stable lowercase name used in event names and facts.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gold => "gold",
            Self::Food => "food",
            Self::Wood => "wood",
            Self::Stone => "stone",
            Self::Iron => "iron",
        }
    }
}

// ---------------------------------------------------------------------------
// Guilds
// ---------------------------------------------------------------------------

/// Role an NPC holds inside its guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum GuildRole {
    /// The single leader of the guild.
    Leader,
    /// A trusted member with recruiting rights.
    Officer,
    /// A regular member.
    Member,
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Coarse category of a decision request.
///
/// The AI engine coalesces in-flight requests per `(entity, class)` and maps
/// each class to at most one behavior tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum SituationClass {
    /// The entity is a participant in an active combat session.
    Combat,
    /// The entity belongs to a guild and is not fighting.
    Guild,
    /// The entity is unaffiliated and trading or gathering.
    Economy,
    /// Nothing pressing; ambient behavior.
    Idle,
}

impl SituationClass {
    /// Stable lowercase name, used as the config key for tree bindings.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Combat => "combat",
            Self::Guild => "guild",
            Self::Economy => "economy",
            Self::Idle => "idle",
        }
    }
}

impl core::fmt::Display for SituationClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for SituationClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "combat" => Ok(Self::Combat),
            "guild" => Ok(Self::Guild),
            "economy" => Ok(Self::Economy),
            "idle" => Ok(Self::Idle),
            other => Err(format!("unknown situation class: {other}")),
        }
    }
}
