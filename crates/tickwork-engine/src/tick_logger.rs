//! Tick callback that reports progress through `tracing`.
//!
//! Every tick is logged with its counters. When a snapshot interval is
//! configured, the full environment and population are additionally
//! logged as JSON every N ticks, for external loggers to pick up.

use tickwork_core::callback::{TickCallback, TickSummary};
use tickwork_core::population::Environment;
use tracing::{debug, info, warn};

/// Callback that logs tick summaries and periodic population snapshots.
pub struct TickLogger {
    snapshot_interval: u64,
    snapshots: u64,
}

impl TickLogger {
    /// Log a snapshot every `snapshot_interval` ticks (0 = never).
    pub const fn new(snapshot_interval: u64) -> Self {
        Self {
            snapshot_interval,
            snapshots: 0,
        }
    }

    /// Number of snapshots logged so far.
    pub const fn snapshots(&self) -> u64 {
        self.snapshots
    }

    fn snapshot_due(&self, tick: u64) -> bool {
        tick.checked_rem(self.snapshot_interval)
            .is_some_and(|rem| rem == 0)
    }
}

impl TickCallback for TickLogger {
    fn on_tick(&mut self, summary: &TickSummary, environment: &Environment) {
        info!(
            tick = summary.tick,
            substeps = summary.substeps,
            executed = summary.executed,
            admitted = summary.admitted,
            population = summary.population,
            "Tick complete"
        );

        if !self.snapshot_due(summary.tick) {
            return;
        }
        match environment.snapshot(summary.tick).to_json() {
            Ok(json) => {
                self.snapshots = self.snapshots.saturating_add(1);
                debug!(tick = summary.tick, snapshot = %json, "Population snapshot");
            }
            Err(e) => {
                warn!(tick = summary.tick, error = %e, "Failed to serialize population snapshot");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tickwork_types::Individual;

    use super::*;

    fn summary(tick: u64) -> TickSummary {
        TickSummary {
            tick,
            substeps: 1,
            ..TickSummary::default()
        }
    }

    #[test]
    fn snapshots_follow_interval() {
        let env = Environment::new(Individual::new("environment"));
        let mut logger = TickLogger::new(3);
        for tick in 0..7 {
            logger.on_tick(&summary(tick), &env);
        }
        assert_eq!(logger.snapshots(), 3);
    }

    #[test]
    fn zero_interval_never_snapshots() {
        let env = Environment::new(Individual::new("environment"));
        let mut logger = TickLogger::new(0);
        for tick in 0..5 {
            logger.on_tick(&summary(tick), &env);
        }
        assert_eq!(logger.snapshots(), 0);
    }
}
