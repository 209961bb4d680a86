//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Every registry in [`GameState`] is keyed by one of these IDs. Relations
//! between entities (guild membership, combat participants, ledger accounts)
//! are stored as ID references, never as pointers, so the state tree has no
//! cycles and can be deep-copied and checksummed directly.
//!
//! [`GameState`]: crate::state::GameState

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for a non-player character.
    NpcId
}

define_id! {
    /// Unique identifier for a guild.
    GuildId
}

define_id! {
    /// Unique identifier for a combat session.
    CombatId
}

define_id! {
    /// Unique identifier for a state snapshot.
    SnapshotId
}

define_id! {
    /// Unique identifier for a state transaction.
    TransactionId
}

define_id! {
    /// Correlation identifier linking related events across ticks.
    CorrelationId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let npc = NpcId::new();
        let guild = GuildId::new();
        assert_ne!(npc.into_inner(), Uuid::nil());
        assert_ne!(guild.into_inner(), Uuid::nil());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = NpcId::new();
        let json = serde_json::to_string(&id).ok();
        assert_eq!(json, Some(format!("\"{}\"", id.into_inner())));
    }

    #[test]
    fn id_display_matches_uuid() {
        let id = GuildId::new();
        assert_eq!(id.to_string(), id.into_inner().to_string());
    }
}
