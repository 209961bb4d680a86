//! Inference models run on the worker pool.
//!
//! A model is synchronous and CPU-bound. The engine calls it from a blocking
//! worker thread with an immutable situation and a snapshot of the current
//! [`PolicyWeights`]; it must not touch shared state.

use guildhall_types::{ActionKind, Decision, DecisionOrigin, Situation};

use crate::learning::PolicyWeights;

/// A decision model.
pub trait InferenceModel: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str {
        "model"
    }

    /// Decide for `situation`.
    fn infer(&self, situation: &Situation, weights: &PolicyWeights) -> Decision;
}

/// Picks the offered option with the highest learned bias.
///
/// Ties go to the earliest option. With no options the NPC idles.
/// Confidence maps the winning bias from `-1.0..=1.0` onto `0.0..=1.0`.
#[derive(Debug, Clone, Copy)]
pub struct WeightedPolicyModel {
    validity_ticks: u64,
}

impl WeightedPolicyModel {
    /// Decisions stay valid for `validity_ticks` after the situation's tick.
    pub const fn new(validity_ticks: u64) -> Self {
        Self { validity_ticks }
    }
}

impl InferenceModel for WeightedPolicyModel {
    fn name(&self) -> &'static str {
        "weighted_policy"
    }

    fn infer(&self, situation: &Situation, weights: &PolicyWeights) -> Decision {
        let valid_until = situation.tick.saturating_add(self.validity_ticks);
        let mut best: Option<(ActionKind, f32)> = None;
        for option in &situation.options {
            let weight = weights.weight(option.tag());
            if best.is_none_or(|(_, w)| weight > w) {
                best = Some((*option, weight));
            }
        }

        match best {
            Some((action, weight)) => {
                Decision::new(action, 0.5f32.mul_add(weight, 0.5), valid_until, DecisionOrigin::Model)
                    .with_reason(format!("{:?} bias {weight:.3}", action.tag()))
            }
            None => Decision::new(ActionKind::Idle, 0.5, valid_until, DecisionOrigin::Model)
                .with_reason("no options offered"),
        }
    }
}
