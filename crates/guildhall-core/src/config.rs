//! Configuration loading and typed config structures for the Guildhall kernel.
//!
//! The canonical configuration lives in `guildhall-config.yaml` at the project
//! root. Every field has a default, so an empty file (or no file at all) is a
//! valid configuration. When loading from a file, a handful of knobs can be
//! overridden from the environment without editing it:
//!
//! - `GUILDHALL_TICK_RATE_HZ` overrides `loop.tick_rate_hz`
//! - `GUILDHALL_LOG_LEVEL` overrides `logging.level`
//! - `GUILDHALL_DECISION_TIMEOUT_MS` overrides `ai.decision_timeout_ms`

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use guildhall_ai::AiConfig;
use guildhall_types::ActionKind;

/// Environment variable overriding `loop.tick_rate_hz`.
pub const ENV_TICK_RATE_HZ: &str = "GUILDHALL_TICK_RATE_HZ";
/// Environment variable overriding `logging.level`.
pub const ENV_LOG_LEVEL: &str = "GUILDHALL_LOG_LEVEL";
/// Environment variable overriding `ai.decision_timeout_ms`.
pub const ENV_DECISION_TIMEOUT_MS: &str = "GUILDHALL_DECISION_TIMEOUT_MS";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is outside its allowed range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level kernel configuration.
///
/// Mirrors the structure of `guildhall-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct KernelConfig {
    /// Fixed-timestep scheduling.
    #[serde(default, rename = "loop")]
    pub game_loop: LoopConfig,

    /// Event pool draining.
    #[serde(default)]
    pub events: EventsConfig,

    /// Decision cache sizing and expiry.
    #[serde(default)]
    pub cache: CacheConfig,

    /// AI computation engine.
    #[serde(default)]
    pub ai: AiSection,

    /// State manager snapshots.
    #[serde(default)]
    pub state: StateConfig,

    /// Logging output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl KernelConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment overrides are applied after parsing, then the result is
    /// validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_with_overrides(&contents, |key| std::env::var(key).ok())
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// The process environment is not consulted.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Self::parse_with_overrides(yaml, |_| None)
    }

    /// Parse configuration, apply overrides from `lookup`, then validate.
    pub fn parse_with_overrides(yaml: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Values that fail to parse are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup(ENV_TICK_RATE_HZ) {
            match val.trim().parse() {
                Ok(hz) => self.game_loop.tick_rate_hz = hz,
                Err(error) => warn!(key = ENV_TICK_RATE_HZ, value = %val, %error, "Ignoring override"),
            }
        }
        if let Some(val) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = val;
        }
        if let Some(val) = lookup(ENV_DECISION_TIMEOUT_MS) {
            match val.trim().parse() {
                Ok(ms) => self.ai.decision_timeout_ms = ms,
                Err(error) => {
                    warn!(key = ENV_DECISION_TIMEOUT_MS, value = %val, %error, "Ignoring override");
                }
            }
        }
    }

    /// Reject values the kernel cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(bool, &'static str, &str); 10] = [
            (self.game_loop.tick_rate_hz == 0, "loop.tick_rate_hz", "must be at least 1"),
            (self.game_loop.max_ticks_per_frame == 0, "loop.max_ticks_per_frame", "must be at least 1"),
            (self.events.batch_size == 0, "events.batch_size", "must be at least 1"),
            (self.cache.capacity == 0, "cache.capacity", "must be at least 1"),
            (self.cache.ttl_ticks == 0, "cache.ttl_ticks", "must be at least 1"),
            (self.ai.worker_threads == 0, "ai.worker_threads", "must be at least 1"),
            (self.ai.decision_timeout_ms == 0, "ai.decision_timeout_ms", "must be at least 1"),
            (self.ai.experience_capacity == 0, "ai.experience_capacity", "must be at least 1"),
            (
                !(self.ai.learning_rate > 0.0 && self.ai.learning_rate <= 1.0),
                "ai.learning_rate",
                "must be in (0, 1]",
            ),
            (self.state.snapshot_retention == 0, "state.snapshot_retention", "must be at least 1"),
        ];
        match checks.into_iter().find(|(failed, _, _)| *failed) {
            Some((_, field, reason)) => Err(ConfigError::Invalid {
                field,
                reason: reason.to_owned(),
            }),
            None => Ok(()),
        }
    }

    /// Wall-clock length of one tick.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs(1)
            .checked_div(self.game_loop.tick_rate_hz)
            .unwrap_or(Duration::from_secs(1))
    }

    /// The AI engine settings derived from the `cache` and `ai` sections.
    pub fn to_ai_config(&self) -> AiConfig {
        AiConfig {
            worker_threads: self.ai.worker_threads,
            decision_timeout: Duration::from_millis(self.ai.decision_timeout_ms),
            cache_capacity: self.cache.capacity,
            cache_ttl_ticks: self.cache.ttl_ticks,
            decision_validity_ticks: self.ai.decision_validity_ticks,
            experience_capacity: self.ai.experience_capacity,
            learning_batch: self.ai.learning_batch,
            learning_rate: self.ai.learning_rate,
            fallback_action: self.ai.fallback_action,
            learning_seed: self.ai.learning_seed,
        }
    }
}

/// Fixed-timestep scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoopConfig {
    /// Logic ticks per second.
    #[serde(default = "default_tick_rate_hz")]
    pub tick_rate_hz: u32,

    /// Upper bound on ticks run for a single frame; surplus time is dropped.
    #[serde(default = "default_max_ticks_per_frame")]
    pub max_ticks_per_frame: u32,

    /// Stop after this many ticks (0 = unlimited).
    #[serde(default)]
    pub max_ticks: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: default_tick_rate_hz(),
            max_ticks_per_frame: default_max_ticks_per_frame(),
            max_ticks: 0,
        }
    }
}

/// Event pool draining.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventsConfig {
    /// Maximum events dispatched per tick.
    #[serde(default = "default_event_batch_size")]
    pub batch_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            batch_size: default_event_batch_size(),
        }
    }
}

/// Decision cache sizing and expiry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheConfig {
    /// Maximum cached decisions before LRU eviction.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Ticks a cached decision stays reusable.
    #[serde(default = "default_cache_ttl_ticks")]
    pub ttl_ticks: u64,

    /// Sweep expired entries every N ticks (0 = only lazy expiry).
    #[serde(default = "default_sweep_interval_ticks")]
    pub sweep_interval_ticks: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_ticks: default_cache_ttl_ticks(),
            sweep_interval_ticks: default_sweep_interval_ticks(),
        }
    }
}

/// AI computation engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AiSection {
    /// Maximum concurrent model computations.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Hard bound on a model computation, including the wait for a worker.
    #[serde(default = "default_decision_timeout_ms")]
    pub decision_timeout_ms: u64,

    /// Ticks an applied decision stays in force.
    #[serde(default = "default_decision_validity_ticks")]
    pub decision_validity_ticks: u64,

    /// Experience ring buffer capacity.
    #[serde(default = "default_experience_capacity")]
    pub experience_capacity: usize,

    /// Run a learning pass every N ticks (0 = never).
    #[serde(default = "default_learning_interval_ticks")]
    pub learning_interval_ticks: u64,

    /// Experiences sampled per learning pass.
    #[serde(default = "default_learning_batch")]
    pub learning_batch: usize,

    /// EMA smoothing factor for policy weights.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,

    /// Action handed out on timeout or when nothing else decides.
    #[serde(default = "default_fallback_action")]
    pub fallback_action: ActionKind,

    /// Seed for learning-pass sampling; unset draws one from the OS.
    #[serde(default)]
    pub learning_seed: Option<u64>,

    /// Optional YAML file of behavior trees replacing the built-in set.
    #[serde(default)]
    pub behavior_trees: Option<String>,
}

impl Default for AiSection {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            decision_timeout_ms: default_decision_timeout_ms(),
            decision_validity_ticks: default_decision_validity_ticks(),
            experience_capacity: default_experience_capacity(),
            learning_interval_ticks: default_learning_interval_ticks(),
            learning_batch: default_learning_batch(),
            learning_rate: default_learning_rate(),
            fallback_action: default_fallback_action(),
            learning_seed: None,
            behavior_trees: None,
        }
    }
}

/// State manager snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StateConfig {
    /// Take a snapshot every N ticks (0 = never).
    #[serde(default = "default_snapshot_interval_ticks")]
    pub snapshot_interval_ticks: u64,

    /// Number of periodic snapshots kept.
    #[serde(default = "default_snapshot_retention")]
    pub snapshot_retention: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_ticks: default_snapshot_interval_ticks(),
            snapshot_retention: default_snapshot_retention(),
        }
    }
}

/// Logging output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

const fn default_tick_rate_hz() -> u32 {
    20
}

const fn default_max_ticks_per_frame() -> u32 {
    5
}

const fn default_event_batch_size() -> usize {
    256
}

const fn default_cache_capacity() -> usize {
    1024
}

const fn default_cache_ttl_ticks() -> u64 {
    30
}

const fn default_sweep_interval_ticks() -> u64 {
    100
}

const fn default_worker_threads() -> usize {
    4
}

const fn default_decision_timeout_ms() -> u64 {
    250
}

const fn default_decision_validity_ticks() -> u64 {
    10
}

const fn default_experience_capacity() -> usize {
    4096
}

const fn default_learning_interval_ticks() -> u64 {
    200
}

const fn default_learning_batch() -> usize {
    64
}

const fn default_learning_rate() -> f32 {
    0.1
}

const fn default_fallback_action() -> ActionKind {
    ActionKind::Idle
}

const fn default_snapshot_interval_ticks() -> u64 {
    500
}

const fn default_snapshot_retention() -> usize {
    8
}

fn default_log_level() -> String {
    "info".to_owned()
}
