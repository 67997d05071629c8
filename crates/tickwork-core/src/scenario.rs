//! Entry behaviors selected by label at run start.

use std::collections::BTreeMap;

use crate::error::SetupError;
use crate::process::ProcessRef;

/// Entry processes for one scenario.
///
/// The environment entry runs once, at tick 0. The individual entry runs
/// once per individual, in the step phase of the tick it was admitted.
#[derive(Debug, Clone, Default)]
pub struct Scenario {
    /// Runs on the environment at tick 0.
    pub entry_for_environment: Option<ProcessRef>,
    /// Runs on each individual in its admission tick.
    pub entry_for_individual: Option<ProcessRef>,
}

impl Scenario {
    /// A scenario with no entry behaviors.
    pub const fn empty() -> Self {
        Self {
            entry_for_environment: None,
            entry_for_individual: None,
        }
    }

    /// Set the environment entry (builder style).
    #[must_use]
    pub fn with_environment_entry(mut self, process: ProcessRef) -> Self {
        self.entry_for_environment = Some(process);
        self
    }

    /// Set the individual entry (builder style).
    #[must_use]
    pub fn with_individual_entry(mut self, process: ProcessRef) -> Self {
        self.entry_for_individual = Some(process);
        self
    }
}

/// Scenarios keyed by run label.
#[derive(Debug, Clone, Default)]
pub struct ScenarioBook {
    scenarios: BTreeMap<String, Scenario>,
}

impl ScenarioBook {
    /// Create an empty book.
    pub const fn new() -> Self {
        Self {
            scenarios: BTreeMap::new(),
        }
    }

    /// Add or replace the scenario for `label`.
    pub fn insert(&mut self, label: impl Into<String>, scenario: Scenario) -> Option<Scenario> {
        self.scenarios.insert(label.into(), scenario)
    }

    /// Select the scenario for `label`.
    pub fn select(&self, label: &str) -> Result<&Scenario, SetupError> {
        self.scenarios
            .get(label)
            .ok_or_else(|| SetupError::UnknownScenario {
                label: label.to_owned(),
            })
    }

    /// Iterate over `(label, scenario)` pairs in label order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scenario)> {
        self.scenarios.iter().map(|(label, s)| (label.as_str(), s))
    }

    /// Iterate over configured labels in order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.scenarios.keys().map(String::as_str)
    }

    /// Number of configured scenarios.
    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    /// Return `true` if no scenario is configured.
    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tickwork_types::Value;

    use super::*;
    use crate::process::FnProcess;

    #[test]
    fn select_known_and_unknown() {
        let mut book = ScenarioBook::new();
        book.insert(
            "main",
            Scenario::empty().with_individual_entry(FnProcess::shared("hello", |_| Ok(Value::Nil))),
        );
        let scenario = book.select("main").unwrap();
        assert!(scenario.entry_for_environment.is_none());
        assert_eq!(scenario.entry_for_individual.as_ref().unwrap().label(), "hello");

        assert_eq!(
            book.select("other").unwrap_err(),
            SetupError::UnknownScenario {
                label: "other".to_owned()
            }
        );
    }
}
