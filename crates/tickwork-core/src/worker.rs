//! Long-lived worker threads that run the individual phase.
//!
//! Each worker owns a command channel. For every phase the scheduler sends
//! each worker a [`Lease`]: the individuals of that worker's partition,
//! moved out of the population together with their waiting queues. The
//! worker executes the phase against the lease and sends it back on the
//! shared completion channel inside a [`PhaseReport`]. Releasing every
//! worker and then receiving exactly one report per released worker forms
//! the phase barrier.
//!
//! While a lease is out, nobody else can touch its individuals: ownership
//! moved with the message. The only state shared between workers is the
//! [`PushBuffer`], which is append-only during a phase.
//!
//! Worker state machine:
//!
//! ```text
//! Idle -> Step -> Idle -> Substep -> Idle -> ... -> Terminated
//! ```
//!
//! A worker never advances on its own: it idles on its command channel
//! until the scheduler sends the next phase or [`Command::Terminate`].

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tickwork_types::{Individual, State};
use tracing::{debug, trace, warn};

use crate::context::{Context, Subject};
use crate::process::{ExecutionError, ProcessRef, ProcessRegistry, execute_guarded};
use crate::push_buffer::PushBuffer;
use crate::queues::TickQueues;

/// Errors raised by the worker pool itself (never by a process).
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// A worker thread could not be started.
    #[error("failed to spawn worker {worker}: {source}")]
    Spawn {
        /// The worker that failed to start.
        worker: usize,
        /// The underlying OS error.
        source: std::io::Error,
    },

    /// A worker stopped accepting commands.
    ///
    /// Carries every lease that was handed back: those of the workers
    /// released before the failure, the undeliverable one, and the ones
    /// never sent.
    #[error("worker {worker} is no longer running")]
    WorkerLost {
        /// The unreachable worker.
        worker: usize,
        /// Leases recovered from the aborted release.
        returned: Vec<Lease>,
    },

    /// The completion channel closed before every report arrived.
    #[error("completion channel closed with {missing} report(s) outstanding")]
    Disconnected {
        /// Reports that never arrived.
        missing: usize,
    },
}

impl PoolError {
    /// Take the leases recovered by a failed release, if any.
    pub fn take_returned(&mut self) -> Vec<Lease> {
        match self {
            Self::WorkerLost { returned, .. } => std::mem::take(returned),
            Self::Spawn { .. } | Self::Disconnected { .. } => Vec::new(),
        }
    }
}

/// The two kinds of individual phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// First iteration of a tick: entry behaviors, observers, queued work.
    Step,
    /// Later iterations: queued work only.
    Substep,
}

/// One individual lent to a worker for a phase.
#[derive(Debug)]
pub struct Slot {
    /// Population slot index.
    pub index: usize,
    /// The individual, moved out of the population.
    pub individual: Individual,
    /// The individual's waiting queues, moved out of the scheduler.
    pub queues: TickQueues,
    /// Whether the individual was admitted this tick.
    pub admitted: bool,
}

/// Everything a worker owns for the duration of one phase.
#[derive(Debug, Default)]
pub struct Lease {
    /// The worker the lease belongs to.
    pub worker: usize,
    /// The worker's individuals, in partition order.
    pub slots: Vec<Slot>,
}

impl Lease {
    /// An empty lease for `worker`.
    pub const fn new(worker: usize) -> Self {
        Self {
            worker,
            slots: Vec::new(),
        }
    }
}

/// Read-only description of a phase, shared by every worker.
#[derive(Debug, Clone)]
pub struct PhasePlan {
    /// The tick being executed.
    pub tick: u64,
    /// Which phase to run.
    pub phase: Phase,
    /// Sub-step iteration (1-based).
    pub substep: u32,
    /// Snapshot of the environment's state.
    pub environment: State,
    /// Population size.
    pub population_len: usize,
    /// Scenario entry for newly admitted individuals.
    pub individual_entry: Option<ProcessRef>,
    /// Individual observers due this tick (empty outside the step phase).
    pub observers: Vec<ProcessRef>,
}

/// Counters reported by a worker for one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseStats {
    /// Processes executed.
    pub executed: u64,
    /// Queued processes dropped because their subject was inactive.
    pub discarded: u64,
}

impl PhaseStats {
    /// Add `other` to these counters.
    pub const fn merge(&mut self, other: Self) {
        self.executed = self.executed.saturating_add(other.executed);
        self.discarded = self.discarded.saturating_add(other.discarded);
    }
}

/// The first execution failure of a worker's phase.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    /// The entity whose process failed, or `None` if the worker itself
    /// failed outside any process.
    pub subject: Option<Subject>,
    /// What went wrong.
    pub source: ExecutionError,
}

/// A worker's answer to [`Command::Run`].
#[derive(Debug)]
pub struct PhaseReport {
    /// The reporting worker.
    pub worker: usize,
    /// The lease, handed back.
    pub lease: Lease,
    /// Counters, or the fault that stopped the phase.
    pub outcome: Result<PhaseStats, Fault>,
}

/// Messages accepted by a worker.
#[derive(Debug)]
pub enum Command {
    /// Run a phase over the given lease.
    Run {
        /// The shared phase description.
        plan: Arc<PhasePlan>,
        /// The individuals to run.
        lease: Lease,
    },
    /// Leave the command loop.
    Terminate,
}

struct WorkerHandle {
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

/// Fixed-size pool of worker threads.
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    reports: Receiver<PhaseReport>,
}

impl WorkerPool {
    /// Start `workers` threads sharing `registry` and `buffer`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Spawn`] if a thread cannot be created; the
    /// threads already started are shut down.
    pub fn spawn(
        workers: usize,
        registry: &Arc<ProcessRegistry>,
        buffer: &Arc<PushBuffer>,
    ) -> Result<Self, PoolError> {
        let (report_tx, report_rx) = crossbeam_channel::unbounded();
        let mut pool = Self {
            workers: Vec::with_capacity(workers),
            reports: report_rx,
        };

        for id in 0..workers {
            let (command_tx, command_rx) = crossbeam_channel::unbounded();
            let reports = report_tx.clone();
            let registry = Arc::clone(registry);
            let buffer = Arc::clone(buffer);
            let thread = thread::Builder::new()
                .name(format!("tickwork-worker-{id}"))
                .spawn(move || worker_loop(id, &command_rx, &reports, &registry, &buffer))
                .map_err(|source| PoolError::Spawn { worker: id, source })?;
            pool.workers.push(WorkerHandle {
                commands: command_tx,
                thread: Some(thread),
            });
        }

        debug!(workers, "Worker pool started");
        Ok(pool)
    }

    /// Number of workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Return `true` if the pool has no workers.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Send each lease to its worker. Returns the number of workers released.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::WorkerLost`] if a worker no longer accepts
    /// commands. Workers released before the failure are joined first, so
    /// no phase is left running, and every lease is returned in the error.
    pub fn release(&self, plan: &Arc<PhasePlan>, leases: Vec<Lease>) -> Result<usize, PoolError> {
        let mut pending = VecDeque::from(leases);
        let mut released: usize = 0;
        while let Some(lease) = pending.pop_front() {
            let worker = lease.worker;
            let command = Command::Run {
                plan: Arc::clone(plan),
                lease,
            };
            let unsent = match self.workers.get(worker) {
                Some(handle) => handle.commands.send(command).err().map(|err| err.0),
                None => Some(command),
            };
            if let Some(command) = unsent {
                let mut returned: Vec<Lease> = match self.join(released) {
                    Ok(reports) => reports.into_iter().map(|report| report.lease).collect(),
                    Err(e) => {
                        warn!(worker, error = %e, "Released workers did not report back");
                        Vec::new()
                    }
                };
                if let Command::Run { lease, .. } = command {
                    returned.push(lease);
                }
                returned.extend(pending);
                return Err(PoolError::WorkerLost { worker, returned });
            }
            released = released.saturating_add(1);
        }
        trace!(tick = plan.tick, substep = plan.substep, released, "Workers released");
        Ok(released)
    }

    /// Wait for `expected` reports, ordered by worker id.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Disconnected`] if the completion channel closes
    /// first.
    pub fn join(&self, expected: usize) -> Result<Vec<PhaseReport>, PoolError> {
        let mut reports = Vec::with_capacity(expected);
        while reports.len() < expected {
            match self.reports.recv() {
                Ok(report) => reports.push(report),
                Err(_) => {
                    return Err(PoolError::Disconnected {
                        missing: expected.saturating_sub(reports.len()),
                    });
                }
            }
        }
        reports.sort_by_key(|r| r.worker);
        Ok(reports)
    }

    /// Tell every worker to terminate and wait for the threads to exit.
    pub fn shutdown(&mut self) {
        for handle in &self.workers {
            let _ = handle.commands.send(Command::Terminate);
        }
        for (id, handle) in self.workers.iter_mut().enumerate() {
            if let Some(thread) = handle.thread.take()
                && thread.join().is_err()
            {
                warn!(worker = id, "Worker thread exited abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    id: usize,
    commands: &Receiver<Command>,
    reports: &Sender<PhaseReport>,
    registry: &ProcessRegistry,
    buffer: &PushBuffer,
) {
    trace!(worker = id, "Worker idle");
    while let Ok(command) = commands.recv() {
        let (plan, mut lease) = match command {
            Command::Run { plan, lease } => (plan, lease),
            Command::Terminate => break,
        };

        // Process panics are caught per execution; this only guards the
        // worker's own bookkeeping.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            run_phase(id, &plan, &mut lease, registry, buffer)
        }))
        .unwrap_or_else(|_| {
            Err(Fault {
                subject: None,
                source: ExecutionError::Panicked {
                    message: format!("worker {id} panicked outside a process"),
                },
            })
        });

        if reports
            .send(PhaseReport {
                worker: id,
                lease,
                outcome,
            })
            .is_err()
        {
            break;
        }
    }
    trace!(worker = id, "Worker terminated");
}

fn run_phase(
    worker: usize,
    plan: &PhasePlan,
    lease: &mut Lease,
    registry: &ProcessRegistry,
    buffer: &PushBuffer,
) -> Result<PhaseStats, Fault> {
    let mut stats = PhaseStats::default();

    for slot in &mut lease.slots {
        let subject = Subject::Individual(slot.index);

        let mut work: Vec<ProcessRef> = Vec::new();
        if plan.phase == Phase::Step {
            if slot.admitted {
                work.extend(plan.individual_entry.iter().cloned());
            } else {
                work.extend(plan.observers.iter().cloned());
            }
        }
        // Newly admitted individuals run their queue from the second
        // iteration on.
        if plan.phase == Phase::Substep || !slot.admitted {
            work.extend(slot.queues.drain(plan.tick));
        }

        if !slot.individual.is_active() {
            stats.discarded = stats.discarded.saturating_add(count_of(work.len()));
            continue;
        }

        let mut ctx = Context::new(plan.tick, subject, &mut slot.individual, registry)
            .on_worker(worker)
            .in_substep(plan.substep)
            .with_environment(&plan.environment)
            .with_population_len(plan.population_len);

        let total = work.len();
        for (done, process) in work.into_iter().enumerate() {
            if !ctx.is_active() {
                stats.discarded = stats
                    .discarded
                    .saturating_add(count_of(total.saturating_sub(done)));
                break;
            }
            execute_guarded(&*process, &mut ctx).map_err(|source| Fault {
                subject: Some(subject),
                source,
            })?;
            stats.executed = stats.executed.saturating_add(1);
        }

        buffer.record_all(slot.index, ctx.take_pushes());
    }

    Ok(stats)
}

fn count_of(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use tickwork_types::Value;

    use super::*;
    use crate::context::TargetScope;
    use crate::queues::{QueueKey, WaitingQueues};

    fn registry() -> Arc<ProcessRegistry> {
        let mut registry = ProcessRegistry::new();
        registry.register_fn("count", |ctx| {
            let n = ctx.get_int("count").unwrap_or(0);
            ctx.set("count", n.saturating_add(1));
            Ok(Value::Nil)
        });
        registry.register_fn("again", |ctx| {
            ctx.push_label(ctx.tick(), TargetScope::Current, "count")?;
            Ok(Value::Nil)
        });
        registry.register_fn("retire", |ctx| {
            ctx.deactivate();
            Ok(Value::Nil)
        });
        registry.register_fn("boom", |_| panic!("boom"));
        registry.register_fn("fail", |ctx| ctx.get_int("missing").map(Value::Int));
        Arc::new(registry)
    }

    fn plan(phase: Phase, entry: Option<ProcessRef>) -> Arc<PhasePlan> {
        Arc::new(PhasePlan {
            tick: 3,
            phase,
            substep: 1,
            environment: State::new(),
            population_len: 2,
            individual_entry: entry,
            observers: Vec::new(),
        })
    }

    fn slot(index: usize, admitted: bool, queued: &[ProcessRef]) -> Slot {
        let mut queues = TickQueues::new();
        for p in queued {
            queues.enqueue(3, Arc::clone(p));
        }
        Slot {
            index,
            individual: Individual::new(format!("i{index}")),
            queues,
            admitted,
        }
    }

    fn run_one(
        registry: &Arc<ProcessRegistry>,
        buffer: &Arc<PushBuffer>,
        plan: &Arc<PhasePlan>,
        lease: Lease,
    ) -> PhaseReport {
        let mut pool = WorkerPool::spawn(1, registry, buffer).unwrap();
        assert_eq!(pool.release(plan, vec![lease]).unwrap(), 1);
        let mut reports = pool.join(1).unwrap();
        pool.shutdown();
        reports.pop().unwrap()
    }

    #[test]
    fn step_runs_entry_for_admitted_and_queue_for_others() {
        let registry = registry();
        let buffer = Arc::new(PushBuffer::new());
        let count = registry.resolve("count").unwrap();
        let plan = plan(Phase::Step, Some(Arc::clone(&count)));

        let mut lease = Lease::new(0);
        lease.slots.push(slot(0, true, &[Arc::clone(&count)]));
        lease.slots.push(slot(1, false, &[Arc::clone(&count), count]));

        let report = run_one(&registry, &buffer, &plan, lease);
        assert_eq!(report.outcome.unwrap().executed, 3);
        let slots = &report.lease.slots;
        assert_eq!(slots[0].individual.state.get("count"), Some(&Value::Int(1)));
        assert!(slots[0].queues.has_due(3));
        assert_eq!(slots[1].individual.state.get("count"), Some(&Value::Int(2)));
        assert!(slots[1].queues.is_empty());
    }

    #[test]
    fn pushes_land_in_the_buffer_not_the_queues() {
        let registry = registry();
        let buffer = Arc::new(PushBuffer::new());
        let again = registry.resolve("again").unwrap();
        let plan = plan(Phase::Substep, None);

        let mut lease = Lease::new(0);
        lease.slots.push(slot(1, false, &[again]));

        let report = run_one(&registry, &buffer, &plan, lease);
        assert!(report.outcome.is_ok());
        assert!(report.lease.slots[0].queues.is_empty());
        assert_eq!(buffer.len(), 1);

        let mut queues = WaitingQueues::new();
        queues.grow(2);
        buffer.flush_into(&mut queues).unwrap();
        assert_eq!(queues.drain(QueueKey::Individual(1), 3).unwrap().len(), 1);
    }

    #[test]
    fn inactive_individuals_discard_their_queue() {
        let registry = registry();
        let buffer = Arc::new(PushBuffer::new());
        let count = registry.resolve("count").unwrap();
        let retire = registry.resolve("retire").unwrap();
        let plan = plan(Phase::Substep, None);

        let mut lease = Lease::new(0);
        let mut asleep = slot(0, false, &[Arc::clone(&count)]);
        asleep.individual.deactivate();
        lease.slots.push(asleep);
        lease.slots.push(slot(1, false, &[retire, Arc::clone(&count), count]));

        let report = run_one(&registry, &buffer, &plan, lease);
        let stats = report.outcome.unwrap();
        assert_eq!(stats.executed, 1);
        assert_eq!(stats.discarded, 3);
        assert!(report.lease.slots[0].individual.state.is_empty());
        assert!(!report.lease.slots[1].individual.is_active());
    }

    #[test]
    fn execution_error_is_reported_with_lease() {
        let registry = registry();
        let buffer = Arc::new(PushBuffer::new());
        let fail = registry.resolve("fail").unwrap();
        let plan = plan(Phase::Substep, None);

        let mut lease = Lease::new(0);
        lease.slots.push(slot(1, false, &[fail]));

        let report = run_one(&registry, &buffer, &plan, lease);
        let fault = report.outcome.unwrap_err();
        assert_eq!(fault.subject, Some(Subject::Individual(1)));
        assert!(matches!(fault.source, ExecutionError::MissingVariable { .. }));
        assert_eq!(report.lease.slots.len(), 1);
    }

    #[test]
    fn panic_becomes_a_fault() {
        let registry = registry();
        let buffer = Arc::new(PushBuffer::new());
        let boom = registry.resolve("boom").unwrap();
        let plan = plan(Phase::Substep, None);

        let mut lease = Lease::new(0);
        lease.slots.push(slot(0, false, &[boom]));

        let report = run_one(&registry, &buffer, &plan, lease);
        let fault = report.outcome.unwrap_err();
        assert_eq!(fault.subject, Some(Subject::Individual(0)));
        assert_eq!(
            fault.source,
            ExecutionError::Panicked {
                message: "boom".to_owned()
            }
        );
    }

    #[test]
    fn join_orders_reports_by_worker() {
        let registry = registry();
        let buffer = Arc::new(PushBuffer::new());
        let plan = plan(Phase::Substep, None);
        let pool = WorkerPool::spawn(3, &registry, &buffer).unwrap();

        let leases = (0..3).rev().map(Lease::new).collect();
        assert_eq!(pool.release(&plan, leases).unwrap(), 3);
        let workers: Vec<usize> = pool.join(3).unwrap().iter().map(|r| r.worker).collect();
        assert_eq!(workers, vec![0, 1, 2]);
    }

    #[test]
    fn release_to_unknown_worker_returns_every_lease() {
        let registry = registry();
        let buffer = Arc::new(PushBuffer::new());
        let count = registry.resolve("count").unwrap();
        let plan = plan(Phase::Substep, None);
        let pool = WorkerPool::spawn(1, &registry, &buffer).unwrap();

        let mut delivered = Lease::new(0);
        delivered.slots.push(slot(0, false, &[count]));
        let mut lost = Lease::new(5);
        lost.slots.push(slot(1, false, &[]));
        let mut never_sent = Lease::new(6);
        never_sent.slots.push(slot(2, false, &[]));

        let mut err = pool
            .release(&plan, vec![delivered, lost, never_sent])
            .unwrap_err();
        assert!(matches!(err, PoolError::WorkerLost { worker: 5, .. }));

        let returned = err.take_returned();
        let workers: Vec<usize> = returned.iter().map(|lease| lease.worker).collect();
        assert_eq!(workers, vec![0, 5, 6]);
        let indices: Vec<usize> = returned
            .iter()
            .flat_map(|lease| lease.slots.iter().map(|slot| slot.index))
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
        // The delivered lease ran before it came back.
        assert_eq!(
            returned[0].slots[0].individual.state.get("count"),
            Some(&Value::Int(1))
        );
        assert!(err.take_returned().is_empty());
    }
}
