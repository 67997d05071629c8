//! Execution context handed to a running process.
//!
//! A [`Context`] gives a process mutable access to exactly one entity (its
//! subject), read-only access to the environment, and a way to request new
//! work. Requested work is not scheduled immediately: it accumulates on the
//! context as [`PushRequest`]s, and whoever built the context (a worker or
//! the scheduler) hands those requests on once the subject's work is done.

use std::fmt;

use tickwork_types::{Individual, State, Value, ValueKind};

use crate::process::{ExecutionError, ProcessRef, ProcessRegistry};

/// Maximum nesting of [`Context::call`].
pub const MAX_CALL_DEPTH: usize = 64;

/// The entity a process runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Subject {
    /// The distinguished environment entity.
    Environment,
    /// The individual at the given population slot.
    Individual(usize),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Environment => f.write_str("environment"),
            Self::Individual(index) => write!(f, "individual #{index}"),
        }
    }
}

/// Where a pushed process should be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetScope {
    /// The entity that issued the push.
    Current,
    /// The environment entity.
    Environment,
    /// Every individual in the population at merge time.
    AllIndividuals,
}

/// A request to run `process` at `target_tick` on `scope`.
#[derive(Debug, Clone)]
pub struct PushRequest {
    /// Tick at which the process should run.
    pub target_tick: u64,
    /// Which queue(s) receive the process.
    pub scope: TargetScope,
    /// The process to run.
    pub process: ProcessRef,
}

/// Per-execution view of the simulation, owned by the executing thread.
pub struct Context<'a> {
    tick: u64,
    substep: u32,
    subject: Subject,
    worker: Option<usize>,
    entity: &'a mut Individual,
    environment: Option<&'a State>,
    individuals: &'a [Individual],
    population_len: usize,
    registry: &'a ProcessRegistry,
    earliest_push: u64,
    depth: usize,
    pushes: Vec<PushRequest>,
}

impl<'a> Context<'a> {
    /// Build a context for `subject` at `tick`.
    ///
    /// By default the context runs on the scheduler thread, sees no other
    /// individuals and accepts pushes for `tick` or later.
    pub const fn new(
        tick: u64,
        subject: Subject,
        entity: &'a mut Individual,
        registry: &'a ProcessRegistry,
    ) -> Self {
        Self {
            tick,
            substep: 0,
            subject,
            worker: None,
            entity,
            environment: None,
            individuals: &[],
            population_len: 0,
            registry,
            earliest_push: tick,
            depth: 0,
            pushes: Vec::new(),
        }
    }

    /// Mark the context as running on worker `worker`.
    #[must_use]
    pub const fn on_worker(mut self, worker: usize) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Set the sub-step iteration (1-based; 0 means before the loop).
    #[must_use]
    pub const fn in_substep(mut self, substep: u32) -> Self {
        self.substep = substep;
        self
    }

    /// Attach the read-only environment state seen by individuals.
    #[must_use]
    pub const fn with_environment(mut self, environment: &'a State) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Attach read-only access to the population (environment contexts).
    #[must_use]
    pub const fn with_individuals(mut self, individuals: &'a [Individual]) -> Self {
        self.individuals = individuals;
        self.population_len = individuals.len();
        self
    }

    /// Set the population size reported to the process.
    #[must_use]
    pub const fn with_population_len(mut self, len: usize) -> Self {
        self.population_len = len;
        self
    }

    /// Reject pushes that target a tick before `earliest`.
    #[must_use]
    pub const fn with_earliest_push(mut self, earliest: u64) -> Self {
        self.earliest_push = earliest;
        self
    }

    /// The tick being executed.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// The sub-step iteration within the tick (1-based; 0 before the loop).
    pub const fn substep(&self) -> u32 {
        self.substep
    }

    /// The entity this process runs on.
    pub const fn subject(&self) -> Subject {
        self.subject
    }

    /// The worker running this process, or `None` on the scheduler thread.
    pub const fn worker(&self) -> Option<usize> {
        self.worker
    }

    /// The subject entity's identifier.
    pub fn id(&self) -> &str {
        &self.entity.id
    }

    /// The subject entity's state.
    pub fn state(&self) -> &State {
        &self.entity.state
    }

    /// Mutable access to the subject entity's state.
    pub fn state_mut(&mut self) -> &mut State {
        &mut self.entity.state
    }

    /// Environment state. For the environment itself, its own state.
    pub fn environment(&self) -> &State {
        self.environment.unwrap_or(&self.entity.state)
    }

    /// Number of individuals in the population.
    pub const fn population_len(&self) -> usize {
        self.population_len
    }

    /// Read-only access to an individual. Only populated for the environment.
    pub fn individual(&self, index: usize) -> Result<&Individual, ExecutionError> {
        self.individuals
            .get(index)
            .ok_or(ExecutionError::IndexOutOfRange {
                index,
                len: self.individuals.len(),
            })
    }

    /// Return `true` while the subject is active.
    pub const fn is_active(&self) -> bool {
        self.entity.active
    }

    /// Take the subject out of the simulation.
    pub const fn deactivate(&mut self) {
        self.entity.active = false;
    }

    /// Read a state variable.
    pub fn get(&self, key: &str) -> Result<&Value, ExecutionError> {
        self.entity
            .state
            .get(key)
            .ok_or_else(|| ExecutionError::MissingVariable {
                key: key.to_owned(),
            })
    }

    /// Set a state variable, returning its previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entity.state.set(key, value)
    }

    /// Read an integer variable.
    pub fn get_int(&self, key: &str) -> Result<i64, ExecutionError> {
        let value = self.get(key)?;
        value.as_int().ok_or_else(|| mismatch(key, ValueKind::Int, value))
    }

    /// Read a numeric variable as a float.
    pub fn get_float(&self, key: &str) -> Result<f64, ExecutionError> {
        let value = self.get(key)?;
        value
            .as_float()
            .ok_or_else(|| mismatch(key, ValueKind::Float, value))
    }

    /// Read a boolean variable.
    pub fn get_bool(&self, key: &str) -> Result<bool, ExecutionError> {
        let value = self.get(key)?;
        value
            .as_bool()
            .ok_or_else(|| mismatch(key, ValueKind::Bool, value))
    }

    /// Read a string variable.
    pub fn get_text(&self, key: &str) -> Result<&str, ExecutionError> {
        let value = self.get(key)?;
        value
            .as_text()
            .ok_or_else(|| mismatch(key, ValueKind::Text, value))
    }

    /// Resolve a process by label.
    pub fn resolve(&self, label: &str) -> Result<ProcessRef, ExecutionError> {
        self.registry.resolve(label)
    }

    /// Execute another process inline, on the same subject.
    pub fn call(&mut self, label: &str) -> Result<Value, ExecutionError> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(ExecutionError::CallDepthExceeded {
                label: label.to_owned(),
                limit: MAX_CALL_DEPTH,
            });
        }
        let process = self.registry.resolve(label)?;
        self.depth = self.depth.saturating_add(1);
        let result = process.execute(self);
        self.depth = self.depth.saturating_sub(1);
        result
    }

    /// Request `process` to run at `target_tick` on `scope`.
    pub fn push(
        &mut self,
        target_tick: u64,
        scope: TargetScope,
        process: ProcessRef,
    ) -> Result<(), ExecutionError> {
        if target_tick < self.earliest_push {
            return Err(ExecutionError::PushIntoPast {
                label: process.label().to_owned(),
                target_tick,
                earliest: self.earliest_push,
            });
        }
        self.pushes.push(PushRequest {
            target_tick,
            scope,
            process,
        });
        Ok(())
    }

    /// Resolve `label` and push it.
    pub fn push_label(
        &mut self,
        target_tick: u64,
        scope: TargetScope,
        label: &str,
    ) -> Result<(), ExecutionError> {
        let process = self.registry.resolve(label)?;
        self.push(target_tick, scope, process)
    }

    /// Number of pushes collected so far.
    pub fn pending_pushes(&self) -> usize {
        self.pushes.len()
    }

    /// Drain the collected pushes, leaving the pending list empty.
    pub fn take_pushes(&mut self) -> Vec<PushRequest> {
        std::mem::take(&mut self.pushes)
    }
}

fn mismatch(key: &str, expected: ValueKind, found: &Value) -> ExecutionError {
    ExecutionError::TypeMismatch {
        what: format!("variable `{key}`"),
        expected,
        found: found.kind(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn registry() -> ProcessRegistry {
        let mut registry = ProcessRegistry::new();
        registry.register_fn("noop", |_| Ok(Value::Nil));
        registry.register_fn("recurse", |ctx| ctx.call("recurse"));
        registry.register_fn("bump", |ctx| {
            let n = ctx.get_int("n")?;
            ctx.set("n", n.saturating_add(1));
            Ok(Value::Int(n))
        });
        registry
    }

    #[test]
    fn typed_getters_report_mismatch_and_missing() {
        let registry = registry();
        let mut ind = Individual::new("a");
        ind.state.set("name", "alma");
        let ctx = Context::new(3, Subject::Individual(0), &mut ind, &registry);

        assert_eq!(ctx.get_text("name").unwrap(), "alma");
        assert!(matches!(
            ctx.get_int("name"),
            Err(ExecutionError::TypeMismatch {
                expected: ValueKind::Int,
                found: ValueKind::Text,
                ..
            })
        ));
        assert!(matches!(
            ctx.get_int("age"),
            Err(ExecutionError::MissingVariable { .. })
        ));
    }

    #[test]
    fn push_into_past_is_rejected() {
        let registry = registry();
        let mut ind = Individual::new("a");
        let mut ctx = Context::new(5, Subject::Individual(0), &mut ind, &registry);

        assert!(ctx.push_label(5, TargetScope::Current, "noop").is_ok());
        assert!(ctx.push_label(9, TargetScope::Environment, "noop").is_ok());
        let err = ctx.push_label(4, TargetScope::Current, "noop").unwrap_err();
        assert!(matches!(err, ExecutionError::PushIntoPast { earliest: 5, .. }));
        assert_eq!(ctx.pending_pushes(), 2);

        let pushes = ctx.take_pushes();
        assert_eq!(pushes.len(), 2);
        assert_eq!(ctx.pending_pushes(), 0);
    }

    #[test]
    fn push_of_unknown_label_fails() {
        let registry = registry();
        let mut ind = Individual::new("a");
        let mut ctx = Context::new(0, Subject::Individual(0), &mut ind, &registry);
        assert!(matches!(
            ctx.push_label(0, TargetScope::Current, "nope"),
            Err(ExecutionError::UnknownProcess { .. })
        ));
    }

    #[test]
    fn nested_call_mutates_subject() {
        let registry = registry();
        let mut ind = Individual::new("a");
        ind.state.set("n", 1_i64);
        {
            let mut ctx = Context::new(0, Subject::Individual(0), &mut ind, &registry);
            assert_eq!(ctx.call("bump").unwrap(), Value::Int(1));
        }
        assert_eq!(ind.state.get("n"), Some(&Value::Int(2)));
    }

    #[test]
    fn runaway_recursion_is_bounded() {
        let registry = registry();
        let mut ind = Individual::new("a");
        let mut ctx = Context::new(0, Subject::Individual(0), &mut ind, &registry);
        assert!(matches!(
            ctx.call("recurse"),
            Err(ExecutionError::CallDepthExceeded { .. })
        ));
    }

    #[test]
    fn environment_view_falls_back_to_own_state() {
        let registry = registry();
        let mut env = Individual::new("environment");
        env.state.set("season", "dry");
        let ctx = Context::new(0, Subject::Environment, &mut env, &registry);
        assert_eq!(
            ctx.environment().get("season"),
            Some(&Value::Text("dry".to_owned()))
        );
    }

    #[test]
    fn individual_lookup_is_bounds_checked() {
        let registry = registry();
        let mut env = Individual::new("environment");
        let pop = vec![Individual::new("a")];
        let ctx =
            Context::new(0, Subject::Environment, &mut env, &registry).with_individuals(&pop);
        assert_eq!(ctx.population_len(), 1);
        assert_eq!(ctx.individual(0).unwrap().id, "a");
        assert!(matches!(
            ctx.individual(1),
            Err(ExecutionError::IndexOutOfRange { index: 1, len: 1 })
        ));
    }
}
