//! The tick driver.
//!
//! # Tick algorithm
//!
//! ```text
//! 1. admission    growth -> population append, queues grow, partitions extend
//! 2. environment  tick 0: scenario entry; otherwise due environment
//!                 observers, then the environment queue. Pushes merge
//!                 into the waiting queues immediately.
//! 3. sub-steps    release every worker (Step first, Substep after), join,
//!                 drain the environment queue again, flush the push
//!                 buffer. Repeat until nothing ran on the environment,
//!                 nothing was flushed, and no queue has work due this tick.
//! 4. continue?    evaluate the continuation; advance or stop.
//! ```
//!
//! The scheduler thread exclusively owns the environment, the waiting
//! queues and the population. During a worker phase, each worker's
//! individuals and their queues are moved into that worker's lease and
//! moved back once the worker reports. Any execution failure aborts the
//! run after every released worker has reported, so no thread is left
//! waiting on a barrier.

use std::ops::Range;
use std::sync::Arc;

use chrono::Utc;
use tickwork_types::{Individual, RunId};
use tracing::{debug, error, info, trace};

use crate::callback::{NoOpCallback, RunSummary, TickCallback, TickSummary};
use crate::clock::{Clock, ClockError};
use crate::context::{Context, Subject};
use crate::error::SetupError;
use crate::growth::PopulationManager;
use crate::observer::{Observer, ObserverSet};
use crate::partition::Partitioner;
use crate::population::{Environment, Population, PopulationSnapshot};
use crate::process::{ExecutionError, ProcessRef, ProcessRegistry, execute_guarded};
use crate::push_buffer::PushBuffer;
use crate::queues::{QueueError, QueueKey, WaitingQueues};
use crate::scenario::{Scenario, ScenarioBook};
use crate::worker::{Fault, Lease, Phase, PhasePlan, PhaseStats, PoolError, Slot, WorkerPool};

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The run could not start.
    #[error("setup error: {source}")]
    Setup {
        /// The underlying setup error.
        #[from]
        source: SetupError,
    },

    /// A process failed.
    #[error("tick {tick}: process on {subject} failed: {source}")]
    Execution {
        /// Tick at which the failure happened.
        tick: u64,
        /// The entity the process ran on.
        subject: Subject,
        /// The process error.
        source: ExecutionError,
    },

    /// A push addressed a queue that does not exist.
    #[error("queue error: {source}")]
    Queue {
        /// The underlying queue error.
        #[from]
        source: QueueError,
    },

    /// The clock could not advance.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },

    /// The worker pool failed.
    #[error("worker pool error: {source}")]
    Pool {
        /// The underlying pool error.
        #[from]
        source: PoolError,
    },

    /// Internal bookkeeping went out of sync.
    #[error("scheduler invariant violated: {message}")]
    Invariant {
        /// What went out of sync.
        message: String,
    },
}

/// Everything a [`Scheduler`] needs besides the registry and growth.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    workers: usize,
    continuation: ProcessRef,
    scenarios: ScenarioBook,
    observers: ObserverSet,
    environment: Individual,
}

impl SchedulerConfig {
    /// A configuration with `workers` workers and the given continuation.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::InvalidWorkerCount`] if `workers` is zero.
    pub fn new(workers: usize, continuation: ProcessRef) -> Result<Self, SetupError> {
        if workers == 0 {
            return Err(SetupError::InvalidWorkerCount { workers });
        }
        Ok(Self {
            workers,
            continuation,
            scenarios: ScenarioBook::new(),
            observers: ObserverSet::new(),
            environment: Individual::new("environment"),
        })
    }

    /// Replace every scenario (builder style).
    #[must_use]
    pub fn with_scenarios(mut self, scenarios: ScenarioBook) -> Self {
        self.scenarios = scenarios;
        self
    }

    /// Add one scenario (builder style).
    #[must_use]
    pub fn with_scenario(mut self, label: impl Into<String>, scenario: Scenario) -> Self {
        self.scenarios.insert(label, scenario);
        self
    }

    /// Replace every observer (builder style).
    #[must_use]
    pub fn with_observers(mut self, observers: ObserverSet) -> Self {
        self.observers = observers;
        self
    }

    /// Add one observer (builder style).
    #[must_use]
    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observers.push(observer);
        self
    }

    /// Set the environment entity every run starts from (builder style).
    #[must_use]
    pub fn with_environment(mut self, environment: Individual) -> Self {
        self.environment = environment;
        self
    }

    /// Number of workers.
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// The continuation process.
    pub const fn continuation(&self) -> &ProcessRef {
        &self.continuation
    }

    /// Configured scenarios.
    pub const fn scenarios(&self) -> &ScenarioBook {
        &self.scenarios
    }

    /// Configured observers.
    pub const fn observers(&self) -> &ObserverSet {
        &self.observers
    }

    /// The environment template.
    pub const fn environment(&self) -> &Individual {
        &self.environment
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RunTotals {
    ticks: u64,
    substeps: u64,
    executed: u64,
}

impl RunTotals {
    fn record(&mut self, summary: &TickSummary) {
        self.ticks = self.ticks.saturating_add(1);
        self.substeps = self.substeps.saturating_add(u64::from(summary.substeps));
        self.executed = self.executed.saturating_add(summary.executed);
    }
}

/// Drives runs of the simulation.
///
/// A scheduler can be run any number of times; every run starts from a
/// fresh environment, an empty population and tick 0.
pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<ProcessRegistry>,
    growth: Box<dyn PopulationManager>,
    clock: Clock,
    environment: Environment,
    queues: WaitingQueues,
    buffer: Arc<PushBuffer>,
    partitioner: Partitioner,
    admitted: Range<usize>,
}

impl Scheduler {
    /// Create a scheduler.
    ///
    /// Every process referenced by `config` must be registered in
    /// `registry` under its label.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::UnknownProcess`] if a scenario entry, an
    /// observer or the continuation is not registered.
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<ProcessRegistry>,
        growth: Box<dyn PopulationManager>,
    ) -> Result<Self, SetupError> {
        ensure_registered(&registry, &config.continuation, "the clock continuation")?;
        for (label, scenario) in config.scenarios.iter() {
            let role = format!("scenario `{label}`");
            for process in scenario
                .entry_for_environment
                .iter()
                .chain(scenario.entry_for_individual.iter())
            {
                ensure_registered(&registry, process, &role)?;
            }
        }
        for observer in config.observers.iter() {
            ensure_registered(&registry, observer.process(), "an observer")?;
        }

        Ok(Self {
            clock: Clock::new(Arc::clone(&config.continuation)),
            environment: Environment::new(config.environment.clone()),
            partitioner: Partitioner::new(config.workers),
            queues: WaitingQueues::new(),
            buffer: Arc::new(PushBuffer::new()),
            admitted: 0..0,
            config,
            registry,
            growth,
        })
    }

    /// Run `scenario` to completion.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if the scenario is unknown or the run
    /// aborts.
    pub fn run(&mut self, scenario: &str) -> Result<RunSummary, SchedulerError> {
        self.run_with_callback(scenario, &mut NoOpCallback)
    }

    /// Run `scenario` to completion, invoking `callback` after every tick.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if the scenario is unknown or the run
    /// aborts.
    pub fn run_with_callback(
        &mut self,
        scenario: &str,
        callback: &mut dyn TickCallback,
    ) -> Result<RunSummary, SchedulerError> {
        let entry = self.config.scenarios.select(scenario)?.clone();
        self.reset();

        let run_id = RunId::new();
        let started_at = Utc::now();
        info!(
            %run_id,
            scenario,
            workers = self.config.workers,
            continuation = self.clock.continuation().label(),
            "Run starting"
        );

        let totals = match self.execute(&entry, callback) {
            Ok(totals) => totals,
            Err(err) => {
                error!(%run_id, scenario, tick = self.clock.tick(), error = %err, "Run aborted");
                return Err(err);
            }
        };

        let summary = RunSummary {
            run_id,
            scenario: scenario.to_owned(),
            ticks: totals.ticks,
            final_tick: self.clock.tick(),
            total_substeps: totals.substeps,
            executed: totals.executed,
            population: self.environment.population.len(),
            active: self.environment.population.active_count(),
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            %run_id,
            scenario,
            ticks = summary.ticks,
            substeps = summary.total_substeps,
            executed = summary.executed,
            population = summary.population,
            elapsed_ms = summary.elapsed_ms(),
            "Run finished"
        );
        Ok(summary)
    }

    /// Return to the state before any run: tick 0, a fresh environment, no
    /// individuals, no queued or buffered work.
    pub fn reset(&mut self) {
        self.clock.reset();
        self.environment = Environment::new(self.config.environment.clone());
        self.queues.clear();
        self.buffer.clear();
        self.partitioner.reset();
        self.growth.reset();
        self.admitted = 0..0;
    }

    /// The current tick.
    pub const fn tick(&self) -> u64 {
        self.clock.tick()
    }

    /// The environment and its population.
    pub const fn environment(&self) -> &Environment {
        &self.environment
    }

    /// The population.
    pub const fn population(&self) -> &Population {
        &self.environment.population
    }

    /// The waiting queues.
    pub const fn waiting_queues(&self) -> &WaitingQueues {
        &self.queues
    }

    /// The worker partitions.
    pub const fn partitioner(&self) -> &Partitioner {
        &self.partitioner
    }

    /// The configuration the scheduler was built with.
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The process registry.
    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Serializable copy of the environment and population.
    pub fn snapshot(&self) -> PopulationSnapshot {
        self.environment.snapshot(self.clock.tick())
    }

    fn execute(
        &mut self,
        scenario: &Scenario,
        callback: &mut dyn TickCallback,
    ) -> Result<RunTotals, SchedulerError> {
        let mut pool = WorkerPool::spawn(self.config.workers, &self.registry, &self.buffer)?;
        let outcome = self.drive(scenario, &pool, callback);
        pool.shutdown();
        outcome
    }

    fn drive(
        &mut self,
        scenario: &Scenario,
        pool: &WorkerPool,
        callback: &mut dyn TickCallback,
    ) -> Result<RunTotals, SchedulerError> {
        let mut totals = RunTotals::default();
        loop {
            let tick = self.clock.tick();
            let summary = self.run_tick(tick, scenario, pool)?;
            totals.record(&summary);
            debug!(
                tick,
                substeps = summary.substeps,
                executed = summary.executed,
                admitted = summary.admitted,
                population = summary.population,
                "Tick complete"
            );
            callback.on_tick(&summary, &self.environment);

            if !self.should_continue(tick)? {
                debug!(tick, "Continuation declined another tick");
                return Ok(totals);
            }
            self.clock.advance()?;
        }
    }

    fn run_tick(
        &mut self,
        tick: u64,
        scenario: &Scenario,
        pool: &WorkerPool,
    ) -> Result<TickSummary, SchedulerError> {
        let admitted = self.admit(tick)?;
        let mut executed = self.environment_phase(tick, scenario)?;

        let mut substep: u32 = 0;
        loop {
            substep = substep.saturating_add(1);
            let phase = if substep == 1 {
                Phase::Step
            } else {
                Phase::Substep
            };

            let ran = self.individual_phase(pool, tick, phase, substep, scenario)?;
            let env_work = self.drain_environment(tick, substep)?;
            let flush = self.buffer.flush_into(&mut self.queues)?;
            executed = executed.saturating_add(ran).saturating_add(env_work);
            trace!(
                tick,
                substep,
                ran,
                env_work,
                flushed = flush.requests,
                enqueued = flush.enqueued,
                "Sub-step complete"
            );

            if env_work == 0 && !flush.flushed() && !self.queues.has_due(tick) {
                break;
            }
        }

        Ok(TickSummary {
            tick,
            substeps: substep,
            executed,
            admitted,
            population: self.environment.population.len(),
        })
    }

    fn admit(&mut self, tick: u64) -> Result<usize, SchedulerError> {
        let batch = self.growth.generate(tick);
        let range = self.environment.population.extend(batch);
        let count = range.len();
        self.queues.grow(count);
        self.partitioner.admit(range.start, count);

        let population = self.environment.population.len();
        if self.queues.len() != population || self.partitioner.assigned() != population {
            return Err(SchedulerError::Invariant {
                message: format!(
                    "population {population}, queues {}, partitioned {}",
                    self.queues.len(),
                    self.partitioner.assigned()
                ),
            });
        }
        if count > 0 {
            debug!(tick, admitted = count, population, "Individuals admitted");
        }
        self.admitted = range;
        Ok(count)
    }

    fn environment_phase(&mut self, tick: u64, scenario: &Scenario) -> Result<u64, SchedulerError> {
        if tick == 0 {
            let entry = scenario.entry_for_environment.iter().cloned().collect();
            return self.run_environment(tick, 0, entry);
        }
        let observers = self.config.observers.due_for_environment(tick);
        let executed = self.run_environment(tick, 0, observers)?;
        Ok(executed.saturating_add(self.drain_environment(tick, 0)?))
    }

    fn drain_environment(&mut self, tick: u64, substep: u32) -> Result<u64, SchedulerError> {
        let due = self.queues.drain(QueueKey::Environment, tick)?;
        self.run_environment(tick, substep, due)
    }

    fn run_environment(
        &mut self,
        tick: u64,
        substep: u32,
        work: Vec<ProcessRef>,
    ) -> Result<u64, SchedulerError> {
        let Environment { entity, population } = &mut self.environment;
        let mut executed: u64 = 0;
        for process in work {
            let mut ctx = Context::new(tick, Subject::Environment, entity, &self.registry)
                .in_substep(substep)
                .with_individuals(population.as_slice());
            execute_guarded(&*process, &mut ctx).map_err(|source| SchedulerError::Execution {
                tick,
                subject: Subject::Environment,
                source,
            })?;
            for request in ctx.take_pushes() {
                self.queues.apply(QueueKey::Environment, request)?;
            }
            executed = executed.saturating_add(1);
        }
        Ok(executed)
    }

    fn individual_phase(
        &mut self,
        pool: &WorkerPool,
        tick: u64,
        phase: Phase,
        substep: u32,
        scenario: &Scenario,
    ) -> Result<u64, SchedulerError> {
        let observers = match phase {
            Phase::Step => self.config.observers.due_for_individuals(tick),
            Phase::Substep => Vec::new(),
        };
        let plan = Arc::new(PhasePlan {
            tick,
            phase,
            substep,
            environment: self.environment.entity.state.clone(),
            population_len: self.environment.population.len(),
            individual_entry: scenario.entry_for_individual.clone(),
            observers,
        });

        let leases = self.lend()?;
        let released = match pool.release(&plan, leases) {
            Ok(released) => released,
            Err(mut e) => {
                for lease in e.take_returned() {
                    self.take_back(lease)?;
                }
                return Err(e.into());
            }
        };
        let reports = pool.join(released)?;

        let mut stats = PhaseStats::default();
        let mut fault: Option<(usize, Fault)> = None;
        for report in reports {
            self.take_back(report.lease)?;
            match report.outcome {
                Ok(worker_stats) => stats.merge(worker_stats),
                Err(worker_fault) => {
                    fault.get_or_insert((report.worker, worker_fault));
                }
            }
        }

        match fault {
            Some((_, Fault { subject: Some(subject), source })) => {
                return Err(SchedulerError::Execution {
                    tick,
                    subject,
                    source,
                });
            }
            Some((worker, Fault { subject: None, source })) => {
                return Err(SchedulerError::Invariant {
                    message: format!("worker {worker} failed at tick {tick}: {source}"),
                });
            }
            None => {}
        }
        if stats.discarded > 0 {
            debug!(
                tick,
                substep,
                discarded = stats.discarded,
                "Dropped queued work of inactive individuals"
            );
        }
        Ok(stats.executed)
    }

    fn lend(&mut self) -> Result<Vec<Lease>, SchedulerError> {
        let workers = self.partitioner.workers();
        let mut leases = Vec::with_capacity(workers);
        for worker in 0..workers {
            let mut lease = Lease::new(worker);
            for index in self.partitioner.indices(worker) {
                let individual = self.environment.population.lend(index).ok_or_else(|| {
                    SchedulerError::Invariant {
                        message: format!("worker {worker} owns missing slot {index}"),
                    }
                })?;
                let queues = self.queues.lend(index)?;
                lease.slots.push(Slot {
                    index,
                    individual,
                    queues,
                    admitted: self.admitted.contains(&index),
                });
            }
            leases.push(lease);
        }
        Ok(leases)
    }

    fn take_back(&mut self, lease: Lease) -> Result<(), SchedulerError> {
        for slot in lease.slots {
            if !self.environment.population.restore(slot.index, slot.individual) {
                return Err(SchedulerError::Invariant {
                    message: format!("worker {} returned unknown slot {}", lease.worker, slot.index),
                });
            }
            self.queues.restore(slot.index, slot.queues)?;
        }
        Ok(())
    }

    fn should_continue(&mut self, tick: u64) -> Result<bool, SchedulerError> {
        let Environment { entity, population } = &mut self.environment;
        let mut ctx = Context::new(tick, Subject::Environment, entity, &self.registry)
            .with_individuals(population.as_slice())
            .with_earliest_push(tick.saturating_add(1));
        let keep_going =
            self.clock
                .should_continue(&mut ctx)
                .map_err(|source| SchedulerError::Execution {
                    tick,
                    subject: Subject::Environment,
                    source,
                })?;
        for request in ctx.take_pushes() {
            self.queues.apply(QueueKey::Environment, request)?;
        }
        Ok(keep_going)
    }
}

fn ensure_registered(
    registry: &ProcessRegistry,
    process: &ProcessRef,
    role: &str,
) -> Result<(), SetupError> {
    if registry.contains(process.label()) {
        Ok(())
    } else {
        Err(SetupError::UnknownProcess {
            label: process.label().to_owned(),
            role: role.to_owned(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tickwork_types::Value;

    use super::*;
    use crate::growth::{FixedPopulation, NoGrowth};

    fn registry() -> ProcessRegistry {
        let mut registry = ProcessRegistry::new();
        registry.register_fn("below3", |ctx| Ok(Value::Bool(ctx.tick() < 2)));
        registry.register_fn("noop", |_| Ok(Value::Nil));
        registry
    }

    #[test]
    fn zero_workers_is_rejected() {
        let registry = registry();
        assert!(matches!(
            SchedulerConfig::new(0, registry.resolve("below3").unwrap()),
            Err(SetupError::InvalidWorkerCount { workers: 0 })
        ));
    }

    #[test]
    fn unregistered_process_is_rejected() {
        let registry = registry();
        let stray: ProcessRef = crate::process::FnProcess::shared("stray", |_| Ok(Value::Nil));
        let config = SchedulerConfig::new(2, registry.resolve("below3").unwrap())
            .unwrap()
            .with_scenario("main", Scenario::empty().with_individual_entry(stray));
        let err = Scheduler::new(config, Arc::new(registry), Box::new(NoGrowth))
            .err()
            .unwrap();
        assert_eq!(
            err,
            SetupError::UnknownProcess {
                label: "stray".to_owned(),
                role: "scenario `main`".to_owned(),
            }
        );
    }

    #[test]
    fn unknown_scenario_fails_before_any_tick() {
        let registry = registry();
        let config = SchedulerConfig::new(1, registry.resolve("below3").unwrap()).unwrap();
        let mut scheduler =
            Scheduler::new(config, Arc::new(registry), Box::new(NoGrowth)).unwrap();
        assert!(matches!(
            scheduler.run("missing"),
            Err(SchedulerError::Setup {
                source: SetupError::UnknownScenario { .. }
            })
        ));
        assert_eq!(scheduler.tick(), 0);
    }

    #[test]
    fn run_counts_ticks_and_admits_population() {
        let registry = registry();
        let config = SchedulerConfig::new(2, registry.resolve("below3").unwrap())
            .unwrap()
            .with_scenario("main", Scenario::empty());
        let mut scheduler = Scheduler::new(
            config,
            Arc::new(registry),
            Box::new(FixedPopulation::numbered("p", 5)),
        )
        .unwrap();

        let summary = scheduler.run("main").unwrap();
        assert_eq!(summary.ticks, 3);
        assert_eq!(summary.final_tick, 2);
        assert_eq!(summary.total_substeps, 3);
        assert_eq!(summary.population, 5);
        assert_eq!(scheduler.partitioner().assigned(), 5);
        assert!(scheduler.partitioner().is_disjoint());
        assert_eq!(scheduler.population().get(4).unwrap().id, "p4");
    }
}
