//! Population growth strategies.
//!
//! A [`PopulationManager`] is asked once per tick, before the environment
//! phase, for the individuals to admit at that tick. Whatever it returns is
//! appended to the population, partitioned, and flagged as newly admitted
//! for that tick only.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tickwork_types::Individual;

use crate::config::PopulationConfig;

/// Supplies the individuals admitted at each tick.
pub trait PopulationManager: Send {
    /// Individuals to admit at `tick`. An empty list admits nobody.
    fn generate(&mut self, tick: u64) -> Vec<Individual>;

    /// Forget any per-run state before a new run starts.
    fn reset(&mut self) {}
}

/// Never admits anyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGrowth;

impl PopulationManager for NoGrowth {
    fn generate(&mut self, _tick: u64) -> Vec<Individual> {
        Vec::new()
    }
}

/// Admits a fixed list of individuals at tick 0 and nobody afterwards.
#[derive(Debug, Clone, Default)]
pub struct FixedPopulation {
    individuals: Vec<Individual>,
}

impl FixedPopulation {
    /// Admit `individuals` at tick 0.
    pub const fn new(individuals: Vec<Individual>) -> Self {
        Self { individuals }
    }

    /// Admit `count` stateless individuals named `{prefix}{n}` at tick 0.
    pub fn numbered(prefix: &str, count: usize) -> Self {
        Self::new(
            (0..count)
                .map(|n| Individual::new(format!("{prefix}{n}")))
                .collect(),
        )
    }
}

impl PopulationManager for FixedPopulation {
    fn generate(&mut self, tick: u64) -> Vec<Individual> {
        if tick == 0 {
            self.individuals.clone()
        } else {
            Vec::new()
        }
    }
}

/// Growth driven by the `population` configuration section.
///
/// Admits `initial` individuals at tick 0, then `per_tick` (plus up to
/// `per_tick_jitter` extra, drawn from a seeded generator) at every later
/// tick, never exceeding `max` when `max` is non-zero.
#[derive(Debug, Clone)]
pub struct ConfiguredGrowth {
    config: PopulationConfig,
    seed: u64,
    rng: SmallRng,
    admitted: u64,
}

impl ConfiguredGrowth {
    /// Create a growth strategy from configuration and a seed.
    pub fn new(config: PopulationConfig, seed: u64) -> Self {
        Self {
            config,
            seed,
            rng: SmallRng::seed_from_u64(seed),
            admitted: 0,
        }
    }

    /// Number of individuals generated since the last reset.
    pub const fn admitted(&self) -> u64 {
        self.admitted
    }

    fn wanted(&mut self, tick: u64) -> u64 {
        if tick == 0 {
            return u64::from(self.config.initial);
        }
        let jitter = if self.config.per_tick_jitter > 0 {
            self.rng.random_range(0..=self.config.per_tick_jitter)
        } else {
            0
        };
        u64::from(self.config.per_tick.saturating_add(jitter))
    }
}

impl PopulationManager for ConfiguredGrowth {
    fn generate(&mut self, tick: u64) -> Vec<Individual> {
        let mut count = self.wanted(tick);
        if self.config.max > 0 {
            count = count.min(u64::from(self.config.max).saturating_sub(self.admitted));
        }

        let first = self.admitted;
        self.admitted = self.admitted.saturating_add(count);
        (first..self.admitted)
            .map(|n| {
                Individual::new(format!("{}{n}", self.config.id_prefix))
                    .with_state(self.config.initial_state.clone())
            })
            .collect()
    }

    fn reset(&mut self) {
        self.admitted = 0;
        self.rng = SmallRng::seed_from_u64(self.seed);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tickwork_types::{State, Value};

    use super::*;

    fn config(initial: u32, per_tick: u32, max: u32) -> PopulationConfig {
        PopulationConfig {
            initial,
            per_tick,
            max,
            ..PopulationConfig::default()
        }
    }

    fn ids(batch: &[Individual]) -> Vec<&str> {
        batch.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn no_growth_admits_nobody() {
        let mut growth = NoGrowth;
        assert!(growth.generate(0).is_empty());
        assert!(growth.generate(5).is_empty());
    }

    #[test]
    fn fixed_population_only_at_tick_zero() {
        let mut growth = FixedPopulation::numbered("p", 3);
        assert_eq!(ids(&growth.generate(0)), vec!["p0", "p1", "p2"]);
        assert!(growth.generate(1).is_empty());
    }

    #[test]
    fn configured_growth_respects_cap() {
        let mut growth = ConfiguredGrowth::new(config(3, 2, 6), 7);
        assert_eq!(ids(&growth.generate(0)), vec!["ind-0", "ind-1", "ind-2"]);
        assert_eq!(growth.generate(1).len(), 2);
        assert_eq!(growth.generate(2).len(), 1);
        assert!(growth.generate(3).is_empty());
        assert_eq!(growth.admitted(), 6);
    }

    #[test]
    fn generated_individuals_carry_initial_state() {
        let mut state = State::new();
        state.set("energy", 10_i64);
        let mut growth = ConfiguredGrowth::new(
            PopulationConfig {
                initial_state: state,
                ..config(1, 0, 0)
            },
            1,
        );
        let batch = growth.generate(0);
        assert_eq!(
            batch.first().unwrap().state.get("energy"),
            Some(&Value::Int(10))
        );
    }

    #[test]
    fn jitter_is_reproducible_after_reset() {
        let cfg = PopulationConfig {
            per_tick_jitter: 5,
            ..config(0, 1, 0)
        };
        let mut growth = ConfiguredGrowth::new(cfg, 99);
        let first: Vec<usize> = (1..20).map(|t| growth.generate(t).len()).collect();
        growth.reset();
        let second: Vec<usize> = (1..20).map(|t| growth.generate(t).len()).collect();
        assert_eq!(first, second);
        assert!(first.iter().all(|&n| (1..=6).contains(&n)));
    }
}
