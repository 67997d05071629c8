//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps all possible
//! failure modes during engine startup and episode execution.

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: tickwork_core::config::ConfigError,
    },

    /// A configured label or bound is invalid.
    #[error("setup error: {source}")]
    Setup {
        /// The underlying setup error.
        #[from]
        source: tickwork_core::error::SetupError,
    },

    /// An episode aborted.
    #[error("run error: {source}")]
    Run {
        /// The underlying scheduler error.
        #[from]
        source: tickwork_core::scheduler::SchedulerError,
    },
}
