//! Decision inputs: the [`Situation`] snapshot and its [`Fingerprint`].
//!
//! A situation is split into two parts:
//!
//! - **Fingerprinted** inputs (`class`, `facts`, `flags`, `options`) decide
//!   what the right action is. Two situations with equal fingerprinted
//!   inputs share a cache entry, even across entities and ticks.
//! - **Volatile** inputs (`volatile`) drift tick to tick without changing
//!   the right action, but may change how confident we should be. They are
//!   excluded from the fingerprint and only consulted by the caller's
//!   adaptation policy on a cache hit.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ts_rs::TS;

use crate::decision::ActionKind;
use crate::enums::SituationClass;
use crate::ids::NpcId;

/// Deterministic 64-bit digest of the fingerprinted part of a [`Situation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub u64);

impl core::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Snapshot of the state relevant to one decision request.
///
/// Owned by the requester. The AI engine only ever reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Situation {
    /// The entity the decision is for.
    pub entity: NpcId,
    /// Coarse category used for coalescing and tree routing.
    pub class: SituationClass,
    /// Tick at which the situation was observed.
    pub tick: u64,
    /// Numeric facts that determine the decision.
    pub facts: BTreeMap<String, i64>,
    /// Boolean facts that are set when present.
    pub flags: BTreeSet<String>,
    /// Candidate actions the entity may choose from.
    pub options: Vec<ActionKind>,
    /// Numeric facts excluded from the fingerprint.
    pub volatile: BTreeMap<String, i64>,
}

impl Situation {
    /// Start an empty situation for `entity`.
    pub const fn new(entity: NpcId, class: SituationClass, tick: u64) -> Self {
        Self {
            entity,
            class,
            tick,
            facts: BTreeMap::new(),
            flags: BTreeSet::new(),
            options: Vec::new(),
            volatile: BTreeMap::new(),
        }
    }

    /// Set a fingerprinted numeric fact.
    #[must_use]
    pub fn with_fact(mut self, key: &str, value: i64) -> Self {
        self.facts.insert(key.to_owned(), value);
        self
    }

    /// Set a fingerprinted flag.
    #[must_use]
    pub fn with_flag(mut self, flag: &str) -> Self {
        self.flags.insert(flag.to_owned());
        self
    }

    /// Add a candidate action.
    #[must_use]
    pub fn with_option(mut self, action: ActionKind) -> Self {
        self.options.push(action);
        self
    }

    /// Set a volatile numeric fact.
    #[must_use]
    pub fn with_volatile(mut self, key: &str, value: i64) -> Self {
        self.volatile.insert(key.to_owned(), value);
        self
    }

    /// Look up a numeric fact, falling back to the volatile facts.
    pub fn fact(&self, key: &str) -> Option<i64> {
        self.facts.get(key).or_else(|| self.volatile.get(key)).copied()
    }

    /// Whether a flag is set.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    /// Compute the cache key for this situation.
    ///
    /// Covers `class`, `facts`, `flags`, and `options`. Entity, tick, and
    /// volatile facts are excluded. Every field is length-prefixed so that
    /// adjacent values cannot alias.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        feed(&mut hasher, self.class.as_str().as_bytes());

        feed(&mut hasher, &(self.facts.len() as u64).to_be_bytes());
        for (key, value) in &self.facts {
            feed(&mut hasher, key.as_bytes());
            feed(&mut hasher, &value.to_be_bytes());
        }

        feed(&mut hasher, &(self.flags.len() as u64).to_be_bytes());
        for flag in &self.flags {
            feed(&mut hasher, flag.as_bytes());
        }

        feed(&mut hasher, &(self.options.len() as u64).to_be_bytes());
        for option in &self.options {
            let encoded = serde_json::to_vec(option).unwrap_or_default();
            feed(&mut hasher, &encoded);
        }

        let digest = hasher.finalize();
        let head = digest.first_chunk::<8>().copied().unwrap_or([0; 8]);
        Fingerprint(u64::from_be_bytes(head))
    }
}

/// Feed one length-prefixed field into the hasher.
fn feed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::Resource;

    fn base(entity: NpcId, tick: u64) -> Situation {
        Situation::new(entity, SituationClass::Economy, tick)
            .with_fact("gold", 12)
            .with_flag("at_market")
            .with_option(ActionKind::Gather { resource: Resource::Wood })
            .with_option(ActionKind::Rest)
    }

    #[test]
    fn fingerprint_ignores_entity_tick_and_volatile() {
        let a = base(NpcId::new(), 1).with_volatile("health", 90);
        let b = base(NpcId::new(), 40).with_volatile("health", 15);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_facts() {
        let id = NpcId::new();
        let a = base(id, 1);
        let b = base(id, 1).with_fact("gold", 13);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_depends_on_option_order() {
        let id = NpcId::new();
        let a = Situation::new(id, SituationClass::Idle, 0)
            .with_option(ActionKind::Rest)
            .with_option(ActionKind::Patrol);
        let b = Situation::new(id, SituationClass::Idle, 0)
            .with_option(ActionKind::Patrol)
            .with_option(ActionKind::Rest);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fact_lookup_falls_back_to_volatile() {
        let s = base(NpcId::new(), 0).with_volatile("health", 40);
        assert_eq!(s.fact("gold"), Some(12));
        assert_eq!(s.fact("health"), Some(40));
        assert_eq!(s.fact("missing"), None);
    }
}
