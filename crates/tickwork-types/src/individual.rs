//! A member of the simulated population.

use serde::{Deserialize, Serialize};

use crate::state::State;

/// A simulated entity with labeled state.
///
/// Individuals are created by population growth and never destroyed during
/// a run. An inactive individual keeps its slot (and therefore its index)
/// but no longer executes behaviors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    /// External identifier (unique within a population by convention).
    pub id: String,
    /// Labeled variables mutated by processes that run on this individual.
    #[serde(default)]
    pub state: State,
    /// Whether the individual still takes part in the simulation.
    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_active() -> bool {
    true
}

impl Individual {
    /// Create an active individual with empty state.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: State::new(),
            active: true,
        }
    }

    /// Replace the initial state (builder style).
    #[must_use]
    pub fn with_state(mut self, state: State) -> Self {
        self.state = state;
        self
    }

    /// Return `true` if the individual still takes part in the simulation.
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Take the individual out of the simulation. Its slot is kept.
    pub const fn deactivate(&mut self) {
        self.active = false;
    }
}

impl Default for Individual {
    fn default() -> Self {
        Self::new(String::new())
    }
}
