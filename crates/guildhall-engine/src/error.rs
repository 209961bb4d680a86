//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure mode of startup and the run so that
//! `main` can propagate with `?`.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: guildhall_core::ConfigError,
    },

    /// A behavior tree definition was rejected.
    #[error("behavior tree error: {source}")]
    Trees {
        /// The underlying tree build error.
        #[from]
        source: guildhall_ai::TreeBuildError,
    },

    /// Reading a definitions file failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The file being read.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The game loop could not be constructed.
    #[error("tick error: {source}")]
    Tick {
        /// The underlying tick error.
        #[from]
        source: guildhall_core::TickError,
    },

    /// The runner failed.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: guildhall_core::RunnerError,
    },

    /// Seeding the demo world failed.
    #[error("spawner error: {message}")]
    Spawner {
        /// Description of the spawner failure.
        message: String,
    },
}
