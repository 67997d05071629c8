//! The environment entity and the population it owns.
//!
//! The population is append-only during a run: an individual's slot index
//! never changes once assigned, which is what lets the slot double as the
//! key of its waiting queue and of its worker partition.

use std::ops::Range;

use serde::Serialize;
use tickwork_types::{Individual, State};

/// Append-only, index-addressed sequence of individuals.
#[derive(Debug, Clone, Default)]
pub struct Population {
    individuals: Vec<Individual>,
}

impl Population {
    /// Create an empty population.
    pub const fn new() -> Self {
        Self {
            individuals: Vec::new(),
        }
    }

    /// Append one individual and return its slot index.
    pub fn push(&mut self, individual: Individual) -> usize {
        let index = self.individuals.len();
        self.individuals.push(individual);
        index
    }

    /// Append a batch and return the range of slots it occupies.
    pub fn extend(&mut self, batch: impl IntoIterator<Item = Individual>) -> Range<usize> {
        let start = self.individuals.len();
        self.individuals.extend(batch);
        start..self.individuals.len()
    }

    /// The individual at `index`.
    pub fn get(&self, index: usize) -> Option<&Individual> {
        self.individuals.get(index)
    }

    /// Mutable access to the individual at `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Individual> {
        self.individuals.get_mut(index)
    }

    /// All individuals in slot order.
    pub fn as_slice(&self) -> &[Individual] {
        &self.individuals
    }

    /// Iterate over individuals in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Individual> {
        self.individuals.iter()
    }

    /// Number of individuals (active or not).
    pub fn len(&self) -> usize {
        self.individuals.len()
    }

    /// Return `true` if the population is empty.
    pub fn is_empty(&self) -> bool {
        self.individuals.is_empty()
    }

    /// Number of active individuals.
    pub fn active_count(&self) -> usize {
        self.individuals.iter().filter(|i| i.is_active()).count()
    }

    /// Move the individual at `index` out for the duration of a phase.
    ///
    /// The slot keeps a placeholder until [`restore`](Self::restore).
    pub fn lend(&mut self, index: usize) -> Option<Individual> {
        self.individuals.get_mut(index).map(std::mem::take)
    }

    /// Put back an individual taken with [`lend`](Self::lend).
    ///
    /// Returns `false` if the slot does not exist.
    pub fn restore(&mut self, index: usize, individual: Individual) -> bool {
        match self.individuals.get_mut(index) {
            Some(slot) => {
                *slot = individual;
                true
            }
            None => false,
        }
    }

    /// Drop every individual.
    pub fn clear(&mut self) {
        self.individuals.clear();
    }
}

/// The distinguished entity that owns the population.
#[derive(Debug, Clone)]
pub struct Environment {
    /// The environment's own identity and state.
    pub entity: Individual,
    /// Every individual admitted so far.
    pub population: Population,
}

impl Environment {
    /// Create an environment with an empty population.
    pub const fn new(entity: Individual) -> Self {
        Self {
            entity,
            population: Population::new(),
        }
    }

    /// Take a read-only, serializable copy of the current state.
    pub fn snapshot(&self, tick: u64) -> PopulationSnapshot {
        PopulationSnapshot {
            tick,
            environment: self.entity.state.clone(),
            individuals: self.population.as_slice().to_vec(),
        }
    }
}

/// Read-only copy of entity state, for external loggers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopulationSnapshot {
    /// Tick at which the snapshot was taken.
    pub tick: u64,
    /// The environment's state.
    pub environment: State,
    /// Every individual, in slot order.
    pub individuals: Vec<Individual>,
}

impl PopulationSnapshot {
    /// Serialize the snapshot as JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_stable_across_appends() {
        let mut pop = Population::new();
        assert_eq!(pop.push(Individual::new("a")), 0);
        let range = pop.extend(vec![Individual::new("b"), Individual::new("c")]);
        assert_eq!(range, 1..3);
        assert_eq!(pop.push(Individual::new("d")), 3);
        assert_eq!(pop.get(0).unwrap().id, "a");
        assert_eq!(pop.get(2).unwrap().id, "c");
    }

    #[test]
    fn empty_extend_yields_empty_range() {
        let mut pop = Population::new();
        pop.push(Individual::new("a"));
        assert!(pop.extend(Vec::new()).is_empty());
    }

    #[test]
    fn lend_and_restore() {
        let mut pop = Population::new();
        pop.push(Individual::new("a"));
        let lent = pop.lend(0).unwrap();
        assert_eq!(lent.id, "a");
        assert!(pop.get(0).unwrap().id.is_empty());
        assert!(pop.restore(0, lent));
        assert_eq!(pop.get(0).unwrap().id, "a");
        assert!(pop.lend(5).is_none());
        assert!(!pop.restore(5, Individual::new("x")));
    }

    #[test]
    fn active_count_skips_deactivated() {
        let mut pop = Population::new();
        pop.push(Individual::new("a"));
        pop.push(Individual::new("b"));
        pop.get_mut(1).unwrap().deactivate();
        assert_eq!(pop.active_count(), 1);
    }

    #[test]
    fn snapshot_serializes() {
        let mut env = Environment::new(Individual::new("environment"));
        env.entity.state.set("rain", 3_i64);
        env.population.push(Individual::new("a"));
        let json = env.snapshot(4).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["tick"], 4);
        assert_eq!(value["environment"]["rain"], 3);
        assert_eq!(value["individuals"][0]["id"], "a");
    }
}
