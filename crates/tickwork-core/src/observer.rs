//! Periodic observers.
//!
//! An observer runs a process on its target entities at regular ticks. It
//! fires when
//!
//! ```text
//! tick >= start && (end == 0 || tick <= end) && (tick - start) % step == 0
//! ```
//!
//! Observers run in the step phase only. Sub-steps never re-trigger them,
//! and an individual never runs an observer in its admission tick.

use serde::Deserialize;

use crate::error::SetupError;
use crate::process::ProcessRef;

/// Which entities an observer runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserverTarget {
    /// The environment, in the environment phase.
    Environment,
    /// Every active individual, in the step phase.
    #[default]
    Individuals,
}

/// A process run at regular ticks.
#[derive(Debug, Clone)]
pub struct Observer {
    process: ProcessRef,
    start: u64,
    end: u64,
    step: u64,
    units: String,
    target: ObserverTarget,
}

impl Observer {
    /// Create an observer on individuals.
    ///
    /// `end == 0` means unbounded.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::InvalidObserver`] if `step` is zero or a
    /// bounded `end` lies before `start`.
    pub fn new(process: ProcessRef, start: u64, end: u64, step: u64) -> Result<Self, SetupError> {
        if step == 0 {
            return Err(SetupError::InvalidObserver {
                process: process.label().to_owned(),
                reason: "step must be at least 1".to_owned(),
            });
        }
        if end != 0 && end < start {
            return Err(SetupError::InvalidObserver {
                process: process.label().to_owned(),
                reason: format!("end tick {end} precedes start tick {start}"),
            });
        }
        Ok(Self {
            process,
            start,
            end,
            step,
            units: String::new(),
            target: ObserverTarget::Individuals,
        })
    }

    /// Set the target entities (builder style).
    #[must_use]
    pub const fn with_target(mut self, target: ObserverTarget) -> Self {
        self.target = target;
        self
    }

    /// Set the informational unit tag (builder style).
    #[must_use]
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    /// Return `true` if the observer fires at `tick`.
    pub fn is_due(&self, tick: u64) -> bool {
        if tick < self.start || (self.end != 0 && tick > self.end) {
            return false;
        }
        tick.checked_sub(self.start)
            .and_then(|offset| offset.checked_rem(self.step))
            .is_some_and(|rem| rem == 0)
    }

    /// The observer's process.
    pub const fn process(&self) -> &ProcessRef {
        &self.process
    }

    /// Which entities the observer runs on.
    pub const fn target(&self) -> ObserverTarget {
        self.target
    }

    /// The informational unit tag.
    pub fn units(&self) -> &str {
        &self.units
    }
}

/// Observers split by target.
#[derive(Debug, Clone, Default)]
pub struct ObserverSet {
    environment: Vec<Observer>,
    individuals: Vec<Observer>,
}

impl ObserverSet {
    /// Create an empty set.
    pub const fn new() -> Self {
        Self {
            environment: Vec::new(),
            individuals: Vec::new(),
        }
    }

    /// Add an observer; it is filed under its target.
    pub fn push(&mut self, observer: Observer) {
        match observer.target {
            ObserverTarget::Environment => self.environment.push(observer),
            ObserverTarget::Individuals => self.individuals.push(observer),
        }
    }

    /// Processes of environment observers due at `tick`, in configuration order.
    pub fn due_for_environment(&self, tick: u64) -> Vec<ProcessRef> {
        due(&self.environment, tick)
    }

    /// Processes of individual observers due at `tick`, in configuration order.
    pub fn due_for_individuals(&self, tick: u64) -> Vec<ProcessRef> {
        due(&self.individuals, tick)
    }

    /// Every observer, environment observers first.
    pub fn iter(&self) -> impl Iterator<Item = &Observer> {
        self.environment.iter().chain(&self.individuals)
    }

    /// Total number of observers.
    pub fn len(&self) -> usize {
        self.environment.len().saturating_add(self.individuals.len())
    }

    /// Return `true` if there are no observers.
    pub fn is_empty(&self) -> bool {
        self.environment.is_empty() && self.individuals.is_empty()
    }
}

fn due(observers: &[Observer], tick: u64) -> Vec<ProcessRef> {
    observers
        .iter()
        .filter(|o| o.is_due(tick))
        .map(|o| ProcessRef::clone(&o.process))
        .collect()
}
