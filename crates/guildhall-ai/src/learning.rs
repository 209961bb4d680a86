//! Policy weights learned from experience.
//!
//! Each [`ActionTag`] carries a bias equal to an exponential moving average
//! of the rewards its decisions earned. Learning never holds a lock while it
//! computes: it reads the current weights, builds a new set, and swaps it in.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use guildhall_types::ActionTag;

use crate::experience::Experience;

/// Per-action bias used by inference models.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyWeights {
    biases: BTreeMap<ActionTag, f32>,
    samples: u64,
}

impl PolicyWeights {
    /// All biases at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bias of `tag`; zero when never rewarded.
    pub fn weight(&self, tag: ActionTag) -> f32 {
        self.biases.get(&tag).copied().unwrap_or(0.0)
    }

    /// Override one bias.
    #[must_use]
    pub fn with_weight(mut self, tag: ActionTag, weight: f32) -> Self {
        self.biases.insert(tag, weight);
        self
    }

    /// Number of experiences folded in so far.
    pub const fn samples(&self) -> u64 {
        self.samples
    }

    /// Every bias that has been set.
    pub fn iter(&self) -> impl Iterator<Item = (ActionTag, f32)> + '_ {
        self.biases.iter().map(|(tag, w)| (*tag, *w))
    }

    /// Fold `batch` into a new set of weights with smoothing factor `alpha`.
    ///
    /// For each experience with an outcome, in batch order:
    /// `w <- w + alpha * (reward - w)`. `alpha` is clamped to `0.0..=1.0`;
    /// non-finite rewards are skipped.
    pub fn updated(&self, batch: &[Experience], alpha: f32) -> Self {
        let alpha = if alpha.is_finite() { alpha.clamp(0.0, 1.0) } else { 0.0 };
        let mut next = self.clone();
        for experience in batch {
            let Some(outcome) = experience.outcome else {
                continue;
            };
            if !outcome.reward.is_finite() {
                continue;
            }
            let tag = experience.decision.action.tag();
            let current = next.weight(tag);
            next.biases
                .insert(tag, alpha.mul_add(outcome.reward - current, current));
            next.samples = next.samples.saturating_add(1);
        }
        next
    }
}

/// Summary of one learning pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LearningReport {
    /// Experiences folded in.
    pub sampled: usize,
    /// Total experiences folded in since start.
    pub total_samples: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use guildhall_types::{ActionKind, Decision, DecisionOrigin, NpcId, Situation, SituationClass};

    use super::*;
    use crate::experience::Outcome;

    fn experience(action: ActionKind, reward: Option<f32>) -> Experience {
        let entity = NpcId::new();
        Experience {
            id: 0,
            entity,
            situation: Arc::new(Situation::new(entity, SituationClass::Idle, 0)),
            decision: Decision::new(action, 0.5, 1, DecisionOrigin::Model),
            outcome: reward.map(|reward| Outcome { reward, observed_at: 1 }),
            tick: 0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn ema_moves_toward_reward() {
        let weights = PolicyWeights::new();
        let batch = vec![experience(ActionKind::Patrol, Some(1.0))];
        let next = weights.updated(&batch, 0.5);
        assert!((next.weight(ActionTag::Patrol) - 0.5).abs() < 1e-6);
        let next = next.updated(&batch, 0.5);
        assert!((next.weight(ActionTag::Patrol) - 0.75).abs() < 1e-6);
        assert_eq!(next.samples(), 2);
        assert!(weights.weight(ActionTag::Patrol).abs() < f32::EPSILON);
    }

    #[test]
    fn entries_without_usable_outcome_are_skipped() {
        let batch = vec![
            experience(ActionKind::Rest, None),
            experience(ActionKind::Rest, Some(f32::NAN)),
        ];
        let next = PolicyWeights::new().updated(&batch, 0.3);
        assert_eq!(next.samples(), 0);
        assert_eq!(next.iter().count(), 0);
    }
}
