//! Per-entity, per-tick FIFO queues of deferred work.
//!
//! Every entity owns a [`TickQueues`]: a map from future tick to the ordered
//! list of processes due at that tick. Draining a tick removes its entry,
//! so each queued process runs exactly once and drained ticks cost no
//! memory.
//!
//! [`WaitingQueues`] groups the environment's queue with one queue per
//! individual, addressed by population slot. It is only ever mutated by the
//! scheduler thread; while a worker runs a phase, the queues of its
//! individuals are lent to it (see [`WaitingQueues::lend`]).

use std::collections::{BTreeMap, VecDeque};

use crate::context::{PushRequest, TargetScope};
use crate::process::ProcessRef;

/// Errors raised when addressing a queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// No individual occupies the given slot.
    #[error("no queue for individual #{index} (population {len})")]
    UnknownIndividual {
        /// The requested slot.
        index: usize,
        /// Number of individual queues.
        len: usize,
    },
}

/// Identifies one entity's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueueKey {
    /// The environment's queue.
    Environment,
    /// The queue of the individual at the given slot.
    Individual(usize),
}

/// Deferred work of a single entity, keyed by tick.
#[derive(Debug, Clone, Default)]
pub struct TickQueues {
    by_tick: BTreeMap<u64, VecDeque<ProcessRef>>,
}

impl TickQueues {
    /// Create an empty queue set.
    pub const fn new() -> Self {
        Self {
            by_tick: BTreeMap::new(),
        }
    }

    /// Append `process` to the queue for `tick`.
    pub fn enqueue(&mut self, tick: u64, process: ProcessRef) {
        self.by_tick.entry(tick).or_default().push_back(process);
    }

    /// Remove and return everything queued for `tick`, in enqueue order.
    ///
    /// A second drain of the same tick returns an empty list.
    pub fn drain(&mut self, tick: u64) -> Vec<ProcessRef> {
        self.by_tick
            .remove(&tick)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Return `true` if work is queued for `tick`.
    pub fn has_due(&self, tick: u64) -> bool {
        self.by_tick.get(&tick).is_some_and(|q| !q.is_empty())
    }

    /// Number of processes queued for `tick`.
    pub fn due_len(&self, tick: u64) -> usize {
        self.by_tick.get(&tick).map_or(0, VecDeque::len)
    }

    /// Total number of queued processes across all ticks.
    pub fn pending(&self) -> usize {
        self.by_tick.values().map(VecDeque::len).sum()
    }

    /// The earliest tick with queued work.
    pub fn next_tick(&self) -> Option<u64> {
        self.by_tick.keys().next().copied()
    }

    /// Return `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.by_tick.is_empty()
    }

    /// Drop all queued work.
    pub fn clear(&mut self) {
        self.by_tick.clear();
    }
}

/// The environment's queue plus one queue per individual.
#[derive(Debug, Clone, Default)]
pub struct WaitingQueues {
    environment: TickQueues,
    individuals: Vec<TickQueues>,
}

impl WaitingQueues {
    /// Create queues for an empty population.
    pub const fn new() -> Self {
        Self {
            environment: TickQueues::new(),
            individuals: Vec::new(),
        }
    }

    /// Number of individual queues.
    pub fn len(&self) -> usize {
        self.individuals.len()
    }

    /// Return `true` if there are no individual queues.
    pub fn is_empty(&self) -> bool {
        self.individuals.is_empty()
    }

    /// Add `count` empty individual queues. Existing slots are untouched.
    pub fn grow(&mut self, count: usize) {
        let len = self.individuals.len().saturating_add(count);
        self.individuals.resize_with(len, TickQueues::new);
    }

    /// The environment's queue.
    pub const fn environment(&self) -> &TickQueues {
        &self.environment
    }

    /// The queue of the individual at `index`.
    pub fn individual(&self, index: usize) -> Option<&TickQueues> {
        self.individuals.get(index)
    }

    fn slot_mut(&mut self, key: QueueKey) -> Result<&mut TickQueues, QueueError> {
        match key {
            QueueKey::Environment => Ok(&mut self.environment),
            QueueKey::Individual(index) => {
                let len = self.individuals.len();
                self.individuals
                    .get_mut(index)
                    .ok_or(QueueError::UnknownIndividual { index, len })
            }
        }
    }

    /// Append `process` to the FIFO of `key` for `tick`.
    pub fn enqueue(
        &mut self,
        key: QueueKey,
        tick: u64,
        process: ProcessRef,
    ) -> Result<(), QueueError> {
        self.slot_mut(key)?.enqueue(tick, process);
        Ok(())
    }

    /// Remove and return the work of `key` for `tick`, in enqueue order.
    pub fn drain(&mut self, key: QueueKey, tick: u64) -> Result<Vec<ProcessRef>, QueueError> {
        Ok(self.slot_mut(key)?.drain(tick))
    }

    /// Resolve `request`'s scope against the issuing entity and enqueue it.
    ///
    /// Returns the number of queues that received the process: one for
    /// [`TargetScope::Current`] and [`TargetScope::Environment`], the
    /// population size for [`TargetScope::AllIndividuals`].
    pub fn apply(&mut self, origin: QueueKey, request: PushRequest) -> Result<usize, QueueError> {
        let PushRequest {
            target_tick,
            scope,
            process,
        } = request;
        match scope {
            TargetScope::Current => {
                self.enqueue(origin, target_tick, process)?;
                Ok(1)
            }
            TargetScope::Environment => {
                self.environment.enqueue(target_tick, process);
                Ok(1)
            }
            TargetScope::AllIndividuals => {
                for queues in &mut self.individuals {
                    queues.enqueue(target_tick, ProcessRef::clone(&process));
                }
                Ok(self.individuals.len())
            }
        }
    }

    /// Return `true` if any entity has work queued for `tick`.
    pub fn has_due(&self, tick: u64) -> bool {
        self.environment.has_due(tick) || self.individuals.iter().any(|q| q.has_due(tick))
    }

    /// Total number of queued processes across all entities and ticks.
    pub fn pending(&self) -> usize {
        self.individuals
            .iter()
            .map(TickQueues::pending)
            .fold(self.environment.pending(), usize::saturating_add)
    }

    /// Move the queues of individual `index` out, leaving an empty set.
    pub fn lend(&mut self, index: usize) -> Result<TickQueues, QueueError> {
        Ok(std::mem::take(self.slot_mut(QueueKey::Individual(index))?))
    }

    /// Put back queues previously taken with [`lend`](Self::lend).
    pub fn restore(&mut self, index: usize, queues: TickQueues) -> Result<(), QueueError> {
        *self.slot_mut(QueueKey::Individual(index))? = queues;
        Ok(())
    }

    /// Drop every queue, including the individual slots.
    pub fn clear(&mut self) {
        self.environment.clear();
        self.individuals.clear();
    }
}
