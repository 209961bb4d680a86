//! The closed action vocabulary and the [`Decision`] value object.
//!
//! Adding a new [`ActionKind`] variant is a wire-visible change: bump
//! [`ACTION_SCHEMA_VERSION`] so that events carrying actions advertise the
//! new vocabulary through their `schema_version` field.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::Resource;
use crate::ids::{GuildId, NpcId};

/// Version of the [`ActionKind`] vocabulary.
pub const ACTION_SCHEMA_VERSION: u32 = 1;

/// An action an NPC can be assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// Do nothing this cycle.
    Idle,
    /// Recover health.
    Rest,
    /// Walk the guild's territory.
    Patrol,
    /// Collect a resource.
    Gather {
        /// The resource to collect.
        resource: Resource,
    },
    /// Attack another NPC.
    Attack {
        /// The NPC being attacked.
        target: NpcId,
    },
    /// Hold position and defend.
    Defend,
    /// Leave the current combat.
    Flee,
    /// Ask to join a guild.
    JoinGuild {
        /// The guild to join.
        guild: GuildId,
    },
    /// Leave the current guild.
    LeaveGuild,
    /// Invite another NPC into the actor's guild.
    Recruit {
        /// The NPC being recruited.
        target: NpcId,
    },
}

impl ActionKind {
    /// The payload-free tag of this action.
    pub const fn tag(&self) -> ActionTag {
        match self {
            Self::Idle => ActionTag::Idle,
            Self::Rest => ActionTag::Rest,
            Self::Patrol => ActionTag::Patrol,
            Self::Gather { .. } => ActionTag::Gather,
            Self::Attack { .. } => ActionTag::Attack,
            Self::Defend => ActionTag::Defend,
            Self::Flee => ActionTag::Flee,
            Self::JoinGuild { .. } => ActionTag::JoinGuild,
            Self::LeaveGuild => ActionTag::LeaveGuild,
            Self::Recruit { .. } => ActionTag::Recruit,
        }
    }
}

/// Payload-free discriminant of [`ActionKind`].
///
/// Learned policy weights are keyed by tag so that targets and resources do
/// not fragment the statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum ActionTag {
    /// See [`ActionKind::Idle`].
    Idle,
    /// See [`ActionKind::Rest`].
    Rest,
    /// See [`ActionKind::Patrol`].
    Patrol,
    /// See [`ActionKind::Gather`].
    Gather,
    /// See [`ActionKind::Attack`].
    Attack,
    /// See [`ActionKind::Defend`].
    Defend,
    /// See [`ActionKind::Flee`].
    Flee,
    /// See [`ActionKind::JoinGuild`].
    JoinGuild,
    /// See [`ActionKind::LeaveGuild`].
    LeaveGuild,
    /// See [`ActionKind::Recruit`].
    Recruit,
}

/// Which path of the AI engine produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum DecisionOrigin {
    /// Served from the decision cache (after adaptation).
    Cache,
    /// Evaluated synchronously by a behavior tree.
    BehaviorTree,
    /// Computed by an inference model on the worker pool.
    Model,
    /// The documented fallback, used on timeout or when no policy applies.
    Fallback,
}

/// An immutable decision for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Decision {
    /// The chosen action.
    pub action: ActionKind,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f32,
    /// Optional human-readable trace of how the decision was reached.
    pub reasoning: Option<Vec<String>>,
    /// Last tick (inclusive) at which the decision may still be applied.
    pub valid_until: u64,
    /// Which engine path produced it.
    pub origin: DecisionOrigin,
}

impl Decision {
    /// Build a decision, clamping `confidence` into `[0.0, 1.0]`.
    pub fn new(action: ActionKind, confidence: f32, valid_until: u64, origin: DecisionOrigin) -> Self {
        Self {
            action,
            confidence: clamp_confidence(confidence),
            reasoning: None,
            valid_until,
            origin,
        }
    }

    /// The documented fallback decision: `action` at zero confidence.
    pub fn fallback(action: ActionKind, valid_until: u64, reason: &str) -> Self {
        Self {
            action,
            confidence: 0.0,
            reasoning: Some(vec![reason.to_owned()]),
            valid_until,
            origin: DecisionOrigin::Fallback,
        }
    }

    /// Append one line to the reasoning trace.
    #[must_use]
    pub fn with_reason(mut self, line: impl Into<String>) -> Self {
        self.reasoning.get_or_insert_with(Vec::new).push(line.into());
        self
    }

    /// Whether the decision may still be applied at `tick`.
    pub const fn is_valid_at(&self, tick: u64) -> bool {
        tick <= self.valid_until
    }
}

/// Clamp a confidence value into `[0.0, 1.0]`, mapping NaN to 0.
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_clamped() {
        let d = Decision::new(ActionKind::Rest, 1.7, 10, DecisionOrigin::Model);
        assert!((d.confidence - 1.0).abs() < f32::EPSILON);
        let d = Decision::new(ActionKind::Rest, f32::NAN, 10, DecisionOrigin::Model);
        assert!(d.confidence.abs() < f32::EPSILON);
    }

    #[test]
    fn fallback_carries_reason() {
        let d = Decision::fallback(ActionKind::Idle, 5, "deadline exceeded");
        assert_eq!(d.origin, DecisionOrigin::Fallback);
        assert_eq!(d.reasoning.as_deref(), Some(&["deadline exceeded".to_owned()][..]));
    }

    #[test]
    fn validity_window_is_inclusive() {
        let d = Decision::new(ActionKind::Patrol, 0.5, 7, DecisionOrigin::BehaviorTree);
        assert!(d.is_valid_at(7));
        assert!(!d.is_valid_at(8));
    }

    #[test]
    fn action_kind_uses_internal_tag() {
        let json = serde_json::to_value(ActionKind::Gather { resource: Resource::Wood }).unwrap();
        assert_eq!(json["type"], "gather");
        assert_eq!(json["resource"], "wood");
        assert_eq!(ActionKind::Gather { resource: Resource::Wood }.tag(), ActionTag::Gather);
    }
}
