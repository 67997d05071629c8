//! Configuration loading and typed config structures for the tickwork engine.
//!
//! The canonical configuration lives in `tickwork.yaml` at the project
//! root. This module defines strongly-typed structs that mirror the YAML
//! structure, provides a loader that reads the file, and turns the
//! label-based configuration into a [`SchedulerConfig`] by resolving every
//! label against a [`ProcessRegistry`].
//!
//! Process bodies are never configured here: the registry is filled by
//! code, the configuration only refers to labels.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tickwork_types::{Individual, State};

use crate::error::SetupError;
use crate::observer::{Observer, ObserverSet, ObserverTarget};
use crate::process::{ProcessRef, ProcessRegistry};
use crate::scenario::{Scenario, ScenarioBook};
use crate::scheduler::SchedulerConfig;

/// Environment variable overriding `engine.workers`.
pub const WORKERS_ENV: &str = "TICKWORK_WORKERS";

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
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
///
/// Mirrors the structure of `tickwork.yaml`. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// Engine-level settings (name, worker count, seed).
    #[serde(default)]
    pub engine: EngineSection,

    /// Clock settings.
    #[serde(default)]
    pub clock: ClockConfig,

    /// The environment entity's identity and initial state.
    #[serde(default)]
    pub environment: EnvironmentConfig,

    /// Parameters of the stock population growth strategy.
    #[serde(default)]
    pub population: PopulationConfig,

    /// Scenarios keyed by run label.
    #[serde(default)]
    pub scenarios: BTreeMap<String, ScenarioConfig>,

    /// Periodic observers.
    #[serde(default)]
    pub observers: Vec<ObserverConfig>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `TICKWORK_WORKERS` overrides `engine.workers` when set to a number.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Unparseable values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(workers) = lookup(WORKERS_ENV).and_then(|v| v.trim().parse().ok()) {
            self.engine.workers = workers;
        }
    }

    /// Label of the first configured scenario, if any.
    pub fn default_scenario(&self) -> Option<&str> {
        self.scenarios.keys().next().map(String::as_str)
    }

    /// Resolve every label against `registry` and build a scheduler
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] for an unknown label, malformed observer
    /// bounds, or a zero worker count.
    pub fn scheduler_config(
        &self,
        registry: &ProcessRegistry,
    ) -> Result<SchedulerConfig, SetupError> {
        let continuation = resolve(registry, &self.clock.continue_while, "clock.continue_while")?;

        let mut scenarios = ScenarioBook::new();
        for (label, cfg) in &self.scenarios {
            let role = format!("scenario `{label}`");
            let mut scenario = Scenario::empty();
            if let Some(entry) = &cfg.environment {
                scenario.entry_for_environment = Some(resolve(registry, entry, &role)?);
            }
            if let Some(entry) = &cfg.individual {
                scenario.entry_for_individual = Some(resolve(registry, entry, &role)?);
            }
            scenarios.insert(label.clone(), scenario);
        }

        let mut observers = ObserverSet::new();
        for cfg in &self.observers {
            let process = resolve(registry, &cfg.process, "observer")?;
            let observer = Observer::new(process, cfg.start, cfg.end, cfg.step)?
                .with_target(cfg.target)
                .with_units(cfg.units.clone());
            observers.push(observer);
        }

        let environment = Individual::new(self.environment.id.clone())
            .with_state(self.environment.initial_state.clone());

        SchedulerConfig::new(self.engine.workers, continuation)
            .map(|config| {
                config
                    .with_scenarios(scenarios)
                    .with_observers(observers)
                    .with_environment(environment)
            })
    }
}

fn resolve(registry: &ProcessRegistry, label: &str, role: &str) -> Result<ProcessRef, SetupError> {
    registry
        .get(label)
        .cloned()
        .ok_or_else(|| SetupError::UnknownProcess {
            label: label.to_owned(),
            role: role.to_owned(),
        })
}

/// Engine-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineSection {
    /// Human-readable engine name.
    #[serde(default = "default_engine_name")]
    pub name: String,

    /// Number of worker threads.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Random seed for reproducibility.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Number of consecutive runs (episodes) the engine binary performs.
    #[serde(default = "default_episodes")]
    pub episodes: u32,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            name: default_engine_name(),
            workers: default_workers(),
            seed: default_seed(),
            episodes: default_episodes(),
        }
    }
}

/// Clock configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClockConfig {
    /// Label of the continuation process (true means keep simulating).
    #[serde(default = "default_continue_while")]
    pub continue_while: String,

    /// Number of ticks run by the stock `tick_limit` continuation.
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            continue_while: default_continue_while(),
            max_ticks: default_max_ticks(),
        }
    }
}

/// The environment entity.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnvironmentConfig {
    /// Identifier of the environment entity.
    #[serde(default = "default_environment_id")]
    pub id: String,

    /// State the environment starts every run with.
    #[serde(default)]
    pub initial_state: State,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            id: default_environment_id(),
            initial_state: State::new(),
        }
    }
}

/// Parameters of the stock population growth strategy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PopulationConfig {
    /// Individuals admitted at tick 0.
    #[serde(default = "default_initial")]
    pub initial: u32,

    /// Individuals admitted at every later tick.
    #[serde(default)]
    pub per_tick: u32,

    /// Up to this many extra individuals per later tick, drawn uniformly.
    #[serde(default)]
    pub per_tick_jitter: u32,

    /// Population cap (0 = unbounded).
    #[serde(default)]
    pub max: u32,

    /// Prefix of generated identifiers (`{prefix}{n}`).
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,

    /// State every generated individual starts with.
    #[serde(default)]
    pub initial_state: State,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            initial: default_initial(),
            per_tick: 0,
            per_tick_jitter: 0,
            max: 0,
            id_prefix: default_id_prefix(),
            initial_state: State::new(),
        }
    }
}

/// Entry behaviors of one scenario, by label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScenarioConfig {
    /// Process run on the environment at tick 0.
    #[serde(default)]
    pub environment: Option<String>,

    /// Process run on each individual in its admission tick.
    #[serde(default)]
    pub individual: Option<String>,
}

/// A periodic observer, by label.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObserverConfig {
    /// Label of the process to run.
    pub process: String,

    /// First tick at which the observer may fire.
    #[serde(default)]
    pub start: u64,

    /// Last tick at which the observer may fire (0 = unbounded).
    #[serde(default)]
    pub end: u64,

    /// Interval between firings.
    #[serde(default = "default_step")]
    pub step: u64,

    /// Informational unit tag.
    #[serde(default)]
    pub units: String,

    /// Entities the observer runs on.
    #[serde(default)]
    pub target: ObserverTarget,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log a JSON population snapshot every N ticks (0 = never).
    #[serde(default)]
    pub snapshot_interval_ticks: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            snapshot_interval_ticks: 0,
        }
    }
}

// -----------------------------------------------------------------------
// Default value functions
// -----------------------------------------------------------------------

fn default_engine_name() -> String {
    String::from("tickwork")
}

const fn default_workers() -> usize {
    4
}

const fn default_seed() -> u64 {
    42
}

const fn default_episodes() -> u32 {
    1
}

fn default_continue_while() -> String {
    String::from("tick_limit")
}

const fn default_max_ticks() -> u64 {
    100
}

fn default_environment_id() -> String {
    String::from("environment")
}

const fn default_initial() -> u32 {
    10
}

fn default_id_prefix() -> String {
    String::from("ind-")
}

const fn default_step() -> u64 {
    1
}

fn default_log_level() -> String {
    String::from("info")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tickwork_types::Value;

    use super::*;

    fn registry() -> ProcessRegistry {
        let mut registry = ProcessRegistry::new();
        for label in ["tick_limit", "setup", "greet", "census"] {
            registry.register_fn(label, |_| Ok(Value::Bool(false)));
        }
        registry
    }

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.engine.workers, 4);
        assert_eq!(config.engine.episodes, 1);
        assert_eq!(config.clock.continue_while, "tick_limit");
        assert_eq!(config.clock.max_ticks, 100);
        assert_eq!(config.population.initial, 10);
        assert!(config.scenarios.is_empty());
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
engine:
  name: "greeting"
  workers: 2
  seed: 9
  episodes: 3

clock:
  continue_while: "tick_limit"
  max_ticks: 12

environment:
  id: "world"
  initial_state:
    rain: 3

population:
  initial: 4
  per_tick: 1
  max: 10
  id_prefix: "p"
  initial_state:
    energy: 1.5
    alive: true

scenarios:
  main:
    environment: "setup"
    individual: "greet"

observers:
  - process: "census"
    start: 1
    end: 0
    step: 5
    units: "days"
    target: environment
"#;
        let config = EngineConfig::parse(yaml).unwrap();
        assert_eq!(config.engine.workers, 2);
        assert_eq!(config.engine.episodes, 3);
        assert_eq!(config.clock.max_ticks, 12);
        assert_eq!(config.environment.id, "world");
        assert_eq!(
            config.environment.initial_state.get("rain"),
            Some(&Value::Int(3))
        );
        assert_eq!(
            config.population.initial_state.get("energy"),
            Some(&Value::Float(1.5))
        );
        assert_eq!(config.population.max, 10);
        assert_eq!(
            config.scenarios.get("main").unwrap().individual.as_deref(),
            Some("greet")
        );
        let observer = config.observers.first().unwrap();
        assert_eq!(observer.step, 5);
        assert_eq!(observer.target, ObserverTarget::Environment);
        assert_eq!(config.default_scenario(), Some("main"));
    }

    #[test]
    fn parse_minimal_yaml() {
        let config = EngineConfig::parse("engine:\n  workers: 3\n").unwrap();
        assert_eq!(config.engine.workers, 3);
        assert_eq!(config.clock.max_ticks, 100);
        assert_eq!(config.population.initial, 10);
    }

    #[test]
    fn parse_empty_yaml() {
        assert!(EngineConfig::parse("").is_ok());
    }

    #[test]
    fn observer_defaults_to_individuals_every_tick() {
        let config = EngineConfig::parse("observers:\n  - process: census\n").unwrap();
        let observer = config.observers.first().unwrap();
        assert_eq!(observer.step, 1);
        assert_eq!(observer.end, 0);
        assert_eq!(observer.target, ObserverTarget::Individuals);
    }

    #[test]
    fn env_override_replaces_worker_count() {
        let mut config = EngineConfig::default();
        config.apply_env_overrides(|key| (key == WORKERS_ENV).then(|| "7".to_owned()));
        assert_eq!(config.engine.workers, 7);

        config.apply_env_overrides(|_| Some("many".to_owned()));
        assert_eq!(config.engine.workers, 7);
    }

    #[test]
    fn scheduler_config_resolves_labels() {
        let yaml = r#"
engine:
  workers: 2
scenarios:
  main:
    environment: "setup"
    individual: "greet"
observers:
  - process: "census"
    step: 2
"#;
        let config = EngineConfig::parse(yaml).unwrap();
        let scheduler = config.scheduler_config(&registry()).unwrap();
        assert_eq!(scheduler.workers(), 2);
        assert!(scheduler.scenarios().select("main").is_ok());
        assert_eq!(scheduler.observers().len(), 1);
    }

    #[test]
    fn unknown_scenario_label_is_a_setup_error() {
        let yaml = "scenarios:\n  main:\n    individual: \"wave\"\n";
        let config = EngineConfig::parse(yaml).unwrap();
        let err = config.scheduler_config(&registry()).unwrap_err();
        assert_eq!(
            err,
            SetupError::UnknownProcess {
                label: "wave".to_owned(),
                role: "scenario `main`".to_owned(),
            }
        );
    }

    #[test]
    fn unknown_continuation_is_a_setup_error() {
        let config = EngineConfig::parse("clock:\n  continue_while: \"forever\"\n").unwrap();
        assert!(matches!(
            config.scheduler_config(&registry()),
            Err(SetupError::UnknownProcess { .. })
        ));
    }

    #[test]
    fn malformed_observer_is_a_setup_error() {
        let yaml = "observers:\n  - process: census\n    step: 0\n";
        let config = EngineConfig::parse(yaml).unwrap();
        assert!(matches!(
            config.scheduler_config(&registry()),
            Err(SetupError::InvalidObserver { .. })
        ));
    }

    #[test]
    fn zero_workers_is_a_setup_error() {
        let config = EngineConfig::parse("engine:\n  workers: 0\n").unwrap();
        assert!(matches!(
            config.scheduler_config(&registry()),
            Err(SetupError::InvalidWorkerCount { workers: 0 })
        ));
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("tickwork.yaml");
        if path.exists() {
            let config = EngineConfig::from_file(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
        }
    }
}
