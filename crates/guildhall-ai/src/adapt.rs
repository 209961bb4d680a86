//! Re-targeting cached decisions at the situation that asked for them.
//!
//! A cache entry is keyed by the fingerprinted part of a situation, so a hit
//! can come from a different tick, a different NPC, or different volatile
//! facts. An adapter turns the stored decision into one that fits the
//! requester. Adapters only read the situation; they never touch the cache.

use guildhall_types::{ActionKind, Decision, DecisionOrigin, Situation};

/// Volatile fact consulted by [`RetimingAdapter`] for its flee guard.
pub const HEALTH_FACT: &str = "health";

/// Policy for reusing a cached decision.
pub trait DecisionAdapter: Send + Sync {
    /// Produce the decision to hand to the requester of `situation`.
    fn adapt(&self, cached: &Decision, situation: &Situation) -> Decision;
}

/// Default adapter.
///
/// Re-anchors `valid_until` at the requester's tick, marks the origin as
/// [`DecisionOrigin::Cache`], and, when configured, swaps a cached attack for
/// a retreat if the requester's volatile health is below a threshold.
#[derive(Debug, Clone, Copy)]
pub struct RetimingAdapter {
    validity_ticks: u64,
    flee_below_health: Option<i64>,
}

impl RetimingAdapter {
    /// Decisions stay valid for `validity_ticks` after the request tick.
    pub const fn new(validity_ticks: u64) -> Self {
        Self {
            validity_ticks,
            flee_below_health: None,
        }
    }

    /// Replace cached attacks with [`ActionKind::Flee`] when the requester's
    /// volatile `health` fact is below `threshold`.
    #[must_use]
    pub const fn with_flee_guard(mut self, threshold: i64) -> Self {
        self.flee_below_health = Some(threshold);
        self
    }
}

impl DecisionAdapter for RetimingAdapter {
    fn adapt(&self, cached: &Decision, situation: &Situation) -> Decision {
        let mut decision = cached.clone();
        decision.origin = DecisionOrigin::Cache;
        decision.valid_until = situation.tick.saturating_add(self.validity_ticks);

        let wounded = self
            .flee_below_health
            .zip(situation.volatile.get(HEALTH_FACT).copied())
            .is_some_and(|(threshold, health)| health < threshold);
        if wounded && matches!(decision.action, ActionKind::Attack { .. }) {
            decision.action = ActionKind::Flee;
            decision = decision.with_reason("cached attack replaced: health below threshold");
        }
        decision
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use guildhall_types::{NpcId, SituationClass};

    use super::*;

    #[test]
    fn retimes_to_requesting_tick() {
        let cached = Decision::new(ActionKind::Patrol, 0.7, 12, DecisionOrigin::Model);
        let situation = Situation::new(NpcId::new(), SituationClass::Idle, 40);
        let adapted = RetimingAdapter::new(5).adapt(&cached, &situation);
        assert_eq!(adapted.valid_until, 45);
        assert_eq!(adapted.origin, DecisionOrigin::Cache);
        assert_eq!(adapted.action, ActionKind::Patrol);
    }

    #[test]
    fn wounded_requester_flees_instead_of_attacking() {
        let target = NpcId::new();
        let cached = Decision::new(ActionKind::Attack { target }, 0.9, 3, DecisionOrigin::Model);
        let adapter = RetimingAdapter::new(5).with_flee_guard(25);

        let healthy = Situation::new(NpcId::new(), SituationClass::Combat, 1).with_volatile(HEALTH_FACT, 80);
        assert_eq!(adapter.adapt(&cached, &healthy).action, ActionKind::Attack { target });

        let wounded = Situation::new(NpcId::new(), SituationClass::Combat, 1).with_volatile(HEALTH_FACT, 10);
        let adapted = adapter.adapt(&cached, &wounded);
        assert_eq!(adapted.action, ActionKind::Flee);
        assert!(adapted.reasoning.is_some());
    }
}
