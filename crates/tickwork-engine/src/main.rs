//! Engine binary for the tickwork scheduler.
//!
//! Wires the configuration, the stock processes and the configured
//! population growth into a [`Scheduler`] and runs the selected scenario
//! once per configured episode.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `tickwork.yaml` (or `TICKWORK_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Register the stock processes
//! 4. Resolve every configured label into a scheduler configuration
//! 5. Build the population growth strategy
//! 6. Create the scheduler
//! 7. Run the scenario (`TICKWORK_SCENARIO` or the first configured) per episode
//! 8. Log the run summaries

mod error;
mod tick_logger;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tickwork_core::builtin::register_builtins;
use tickwork_core::config::{EngineConfig, ScenarioConfig};
use tickwork_core::growth::ConfiguredGrowth;
use tickwork_core::process::ProcessRegistry;
use tickwork_core::scheduler::Scheduler;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::tick_logger::TickLogger;

/// Environment variable naming the configuration file.
const CONFIG_ENV: &str = "TICKWORK_CONFIG";

/// Environment variable naming the scenario to run.
const SCENARIO_ENV: &str = "TICKWORK_SCENARIO";

/// Scenario used when the configuration defines none.
const FALLBACK_SCENARIO: &str = "greeting";

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if configuration, setup or any episode fails.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config_path = std::env::var(CONFIG_ENV)
        .map_or_else(|_| PathBuf::from("tickwork.yaml"), PathBuf::from);
    let (mut config, loaded) = load_config(&config_path)?;

    // 2. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!(
        config = %config_path.display(),
        loaded,
        engine = config.engine.name,
        workers = config.engine.workers,
        seed = config.engine.seed,
        episodes = config.engine.episodes,
        "tickwork-engine starting"
    );

    if config.scenarios.is_empty() {
        info!(scenario = FALLBACK_SCENARIO, "No scenarios configured, using the stock greeting");
        config.scenarios.insert(
            FALLBACK_SCENARIO.to_owned(),
            ScenarioConfig {
                environment: Some(String::from("broadcast_greet")),
                individual: None,
            },
        );
    }

    // 3. Register the stock processes.
    let mut registry = ProcessRegistry::new();
    register_builtins(&mut registry, config.clock.max_ticks);
    info!(processes = registry.len(), "Process registry ready");

    // 4. Resolve labels.
    let scheduler_config = config.scheduler_config(&registry).map_err(EngineError::from)?;
    let scenario = std::env::var(SCENARIO_ENV)
        .ok()
        .or_else(|| config.default_scenario().map(str::to_owned))
        .unwrap_or_else(|| FALLBACK_SCENARIO.to_owned());
    info!(
        scenario,
        continue_while = config.clock.continue_while,
        max_ticks = config.clock.max_ticks,
        observers = scheduler_config.observers().len(),
        "Scheduler configuration resolved"
    );

    // 5. Population growth.
    let growth = ConfiguredGrowth::new(config.population.clone(), config.engine.seed);

    // 6. Scheduler.
    let mut scheduler = Scheduler::new(scheduler_config, Arc::new(registry), Box::new(growth))
        .map_err(EngineError::from)?;
    let mut callback = TickLogger::new(config.logging.snapshot_interval_ticks);

    // 7. Episodes.
    for episode in 1..=config.engine.episodes {
        let summary = scheduler
            .run_with_callback(&scenario, &mut callback)
            .map_err(EngineError::from)?;

        // 8. Log results.
        info!(
            episode,
            run_id = %summary.run_id,
            ticks = summary.ticks,
            final_tick = summary.final_tick,
            substeps = summary.total_substeps,
            executed = summary.executed,
            population = summary.population,
            active = summary.active,
            elapsed_ms = summary.elapsed_ms(),
            "Episode complete"
        );
    }

    info!(
        episodes = config.engine.episodes,
        snapshots = callback.snapshots(),
        "tickwork-engine shutdown complete"
    );
    Ok(())
}

/// Load the engine configuration, falling back to defaults when the file
/// does not exist. The flag reports whether a file was read.
fn load_config(path: &Path) -> Result<(EngineConfig, bool), EngineError> {
    if path.exists() {
        Ok((EngineConfig::from_file(path)?, true))
    } else {
        let mut config = EngineConfig::default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok((config, false))
    }
}
