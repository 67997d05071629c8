//! Setup errors, detected before any tick runs.
//!
//! Everything here is recoverable by the caller: fix the configuration or
//! the registry and build the scheduler again.

/// A configuration problem found while assembling a scheduler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SetupError {
    /// A configured label does not name a registered process.
    #[error("unknown process `{label}` referenced by {role}")]
    UnknownProcess {
        /// The unresolved label.
        label: String,
        /// Where the label was referenced (e.g. `scenario "main"`).
        role: String,
    },

    /// The requested scenario is not configured.
    #[error("unknown scenario `{label}`")]
    UnknownScenario {
        /// The requested label.
        label: String,
    },

    /// Observer trigger bounds are malformed.
    #[error("invalid observer `{process}`: {reason}")]
    InvalidObserver {
        /// Label of the observer's process.
        process: String,
        /// Explanation of what is wrong with the bounds.
        reason: String,
    },

    /// The worker pool must have at least one worker.
    #[error("invalid worker count {workers}: at least one worker is required")]
    InvalidWorkerCount {
        /// The configured count.
        workers: usize,
    },
}
