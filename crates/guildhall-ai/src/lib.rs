//! Decision making for the Guildhall simulation kernel.
//!
//! This crate owns everything between "an NPC needs a decision" and "here
//! is a [`Decision`](guildhall_types::Decision)". It is the only part of the
//! kernel that runs work off the tick thread.
//!
//! # Modules
//!
//! - [`cache`] -- TTL- and capacity-bounded [`DecisionCache`]
//! - [`adapt`] -- [`DecisionAdapter`] policies for reusing cached decisions
//! - [`predicate`] -- Data-driven condition [`Predicate`]s
//! - [`behavior`] -- Behavior tree definitions, registry, and evaluator
//! - [`experience`] -- Bounded [`ExperienceLog`] of decisions and outcomes
//! - [`learning`] -- [`PolicyWeights`] updated from experience
//! - [`model`] -- The [`InferenceModel`] trait and [`WeightedPolicyModel`]
//! - [`engine`] -- The [`AiEngine`] tying it all together
//!
//! # Threading
//!
//! The engine is `Clone + Send + Sync`. Requests are made from the tick
//! thread; model computations run on tokio's blocking pool, bounded by a
//! semaphore sized to `worker_threads`. Results come back through
//! [`DecisionHandle`]s that the tick thread polls without blocking.

pub mod adapt;
pub mod behavior;
pub mod cache;
pub mod engine;
pub mod experience;
pub mod learning;
pub mod model;
pub mod predicate;

pub use adapt::{DecisionAdapter, RetimingAdapter};
pub use behavior::{
    BehaviorError, BehaviorEvaluator, BehaviorNode, BehaviorRegistry, BehaviorRegistryBuilder,
    BehaviorResult, BehaviorTree, NodePath, NodeSpec, TreeBuildError, TreeId, TreeSpec,
};
pub use cache::{CacheStats, DecisionCache};
pub use engine::{AiConfig, AiEngine, AiEngineBuilder, AiStats, ComputationError, DecisionHandle};
pub use experience::{Experience, ExperienceLog, Outcome};
pub use learning::{LearningReport, PolicyWeights};
pub use model::{InferenceModel, WeightedPolicyModel};
pub use predicate::Predicate;
