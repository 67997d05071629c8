//! Per-tick and per-run reporting.
//!
//! The scheduler invokes a [`TickCallback`] after every tick has reached
//! quiescence and before the continuation is evaluated. Callbacks see the
//! tick's [`TickSummary`] and a read-only view of the environment and its
//! population; they cannot schedule work.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tickwork_types::RunId;

use crate::population::Environment;

/// What happened during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    /// The tick number.
    pub tick: u64,
    /// Number of sub-step loop iterations (at least one).
    pub substeps: u32,
    /// Processes executed this tick, environment phase included.
    pub executed: u64,
    /// Individuals admitted at this tick.
    pub admitted: usize,
    /// Population size at the end of the tick.
    pub population: usize,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Identifier of the run.
    pub run_id: RunId,
    /// Scenario label the run was started with.
    pub scenario: String,
    /// Number of ticks executed.
    pub ticks: u64,
    /// The last tick executed.
    pub final_tick: u64,
    /// Sub-step iterations across all ticks.
    pub total_substeps: u64,
    /// Processes executed across all ticks.
    pub executed: u64,
    /// Population size at the end of the run.
    pub population: usize,
    /// Individuals still active at the end of the run.
    pub active: usize,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    /// Wall-clock duration of the run in milliseconds.
    pub fn elapsed_ms(&self) -> i64 {
        self.finished_at
            .signed_duration_since(self.started_at)
            .num_milliseconds()
    }
}

/// Callback invoked after each tick completes.
pub trait TickCallback: Send {
    /// Called after a tick reached quiescence.
    fn on_tick(&mut self, summary: &TickSummary, environment: &Environment);
}

/// A no-op tick callback.
pub struct NoOpCallback;

impl TickCallback for NoOpCallback {
    fn on_tick(&mut self, _summary: &TickSummary, _environment: &Environment) {}
}
