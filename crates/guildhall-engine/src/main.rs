//! Engine binary for the Guildhall simulation kernel.
//!
//! Wires configuration, behavior trees, the AI engine, a seeded demo world,
//! and the fixed-step game loop, then runs until the tick limit or Ctrl-C.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `guildhall-config.yaml` (defaults if absent)
//! 2. Initialize structured logging (tracing)
//! 3. Compile behavior trees (built-in set or `ai.behavior_trees`)
//! 4. Build the AI engine on the current runtime
//! 5. Seed the demo world
//! 6. Assemble the game loop and its control handle
//! 7. Run the loop and log the result

mod error;
mod report;
mod spawner;

use std::path::Path;
use std::sync::Arc;

use guildhall_ai::{AiEngine, BehaviorRegistry, RetimingAdapter, WeightedPolicyModel};
use guildhall_core::situation::DEFAULT_WOUNDED_BELOW;
use guildhall_core::{GameLoop, KernelConfig, LoopControl, log_run_end, run_loop};
use guildhall_state::StateManager;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::report::ProgressReport;
use crate::spawner::WorldConfig;

/// Config file looked up in the working directory.
const CONFIG_PATH: &str = "guildhall-config.yaml";

/// Tree definitions used when `ai.behavior_trees` is unset.
const BUILTIN_TREES: &str = include_str!("../trees/default.yaml");

/// Seconds of simulated time between progress lines.
const REPORT_EVERY_SECONDS: u64 = 5;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any initialization step or the run fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config = load_config()?;

    // 2. Initialize structured logging. RUST_LOG wins over the config.
    init_logging(&config);
    info!(
        tick_rate_hz = config.game_loop.tick_rate_hz,
        max_ticks = config.game_loop.max_ticks,
        worker_threads = config.ai.worker_threads,
        decision_timeout_ms = config.ai.decision_timeout_ms,
        "guildhall-engine starting"
    );

    // 3. Compile behavior trees.
    let registry = load_trees(config.ai.behavior_trees.as_deref())?;
    info!(trees = registry.len(), "Behavior trees compiled");

    // 4. Build the AI engine.
    let validity = config.ai.decision_validity_ticks;
    let ai = AiEngine::builder(config.to_ai_config(), Handle::current())
        .behavior(registry)
        .model(WeightedPolicyModel::new(validity))
        .adapter(RetimingAdapter::new(validity).with_flee_guard(i64::from(DEFAULT_WOUNDED_BELOW)))
        .build();

    // 5. Seed the demo world.
    let mut state = StateManager::with_default_validators();
    let world = spawner::seed_world(&load_world_config()?, &mut state)?;
    info!(
        npcs = world.npcs.len(),
        guilds = world.guilds.len(),
        skirmish = world.skirmish.is_some(),
        "World ready"
    );

    // 6. Assemble the loop and its control handle.
    let mut game = GameLoop::new(&config, state, ai).map_err(EngineError::from)?;
    let control = Arc::new(LoopControl::new(config.game_loop.max_ticks));
    {
        let control = Arc::clone(&control);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, stopping after the current frame");
                control.request_stop();
            }
        });
    }

    // 7. Run.
    let every = u64::from(config.game_loop.tick_rate_hz).saturating_mul(REPORT_EVERY_SECONDS);
    let mut progress = ProgressReport::new(every);
    let result = run_loop(&mut game, &control, &mut progress)
        .await
        .map_err(EngineError::from)?;
    log_run_end(&result);

    match game.state().checksum() {
        Ok(checksum) => info!(
            version = game.state().version(),
            checksum = %checksum,
            "guildhall-engine shutdown complete"
        ),
        Err(error) => warn!(%error, "Could not checksum final state"),
    }

    Ok(())
}

/// Install the global subscriber.
fn init_logging(config: &KernelConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Load the kernel configuration from [`CONFIG_PATH`].
fn load_config() -> Result<KernelConfig, EngineError> {
    let config_path = Path::new(CONFIG_PATH);
    if config_path.exists() {
        Ok(KernelConfig::from_file(config_path)?)
    } else {
        let mut config = KernelConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

/// Read the `world` section of [`CONFIG_PATH`], or defaults.
fn load_world_config() -> Result<WorldConfig, EngineError> {
    let config_path = Path::new(CONFIG_PATH);
    if !config_path.exists() {
        return Ok(WorldConfig::default());
    }
    let contents = std::fs::read_to_string(config_path).map_err(|source| EngineError::Io {
        path: CONFIG_PATH.to_owned(),
        source,
    })?;
    let raw: serde_yml::Value = serde_yml::from_str(&contents).map_err(|e| EngineError::Spawner {
        message: format!("failed to parse config YAML: {e}"),
    })?;
    match raw.get("world") {
        Some(world) => serde_yml::from_value(world.clone()).map_err(|e| EngineError::Spawner {
            message: format!("failed to parse world config: {e}"),
        }),
        None => Ok(WorldConfig::default()),
    }
}

/// Compile trees from `path`, or the built-in set.
fn load_trees(path: Option<&str>) -> Result<Arc<BehaviorRegistry>, EngineError> {
    let source = match path {
        Some(path) => std::fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.to_owned(),
            source,
        })?,
        None => BUILTIN_TREES.to_owned(),
    };
    let mut builder = BehaviorRegistry::builder();
    builder.register_yaml(&source)?;
    Ok(builder.build())
}
