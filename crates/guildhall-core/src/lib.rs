//! Fixed-timestep game loop, configuration, and orchestration for the
//! Guildhall simulation kernel.
//!
//! This crate owns the tick cycle that ties the event pool, the state manager,
//! and the AI engine together: input intake, event dispatch, transactions,
//! AI reconciliation, decision requests, and periodic maintenance.
//!
//! # Modules
//!
//! - [`clock`] -- Tick counter and the fixed-step accumulator.
//! - [`config`] -- Configuration loading from `guildhall-config.yaml` into
//!   strongly-typed structs.
//! - [`situation`] -- Per-NPC [`Situation`](guildhall_types::Situation)
//!   assembly from committed state.
//! - [`resolve`] -- What an applied decision does to the world.
//! - [`queue`] -- Input and transaction hand-off queues.
//! - [`tick`] -- The [`GameLoop`] and its tick phases.
//! - [`operator`] -- Pause, resume, stop, and tick bounds.
//! - [`runner`] -- The async loop driven by a tokio interval.

pub mod clock;
pub mod config;
pub mod operator;
pub mod queue;
pub mod resolve;
pub mod runner;
pub mod situation;
pub mod tick;

pub use clock::{ClockError, FixedStep, FramePlan, TickClock};
pub use config::{ConfigError, KernelConfig};
pub use operator::{LoopControl, LoopEndReason, LoopStatus};
pub use queue::{InputCommand, InputQueue, SubmitTransaction, TransactionQueue};
pub use runner::{NoOpCallback, RunResult, RunnerError, TickCallback, log_run_end, run_loop};
pub use situation::SituationBuilder;
pub use tick::{FrameReport, GameLoop, TickError, TickSummary};
