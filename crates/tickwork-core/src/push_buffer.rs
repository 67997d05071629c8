//! Buffer of pushes produced during the parallel individual phase.
//!
//! Workers never touch the [`WaitingQueues`] directly. After executing an
//! individual, a worker records that individual's pushes here under a
//! single mutex. Once every worker has reported back, the scheduler thread
//! flushes the buffer into the queues. Pushes recorded in a phase are
//! therefore invisible to every queue until the next sequential merge.
//!
//! Flushing walks origins in ascending slot order and each origin's
//! requests in record order, so the merge is deterministic regardless of
//! which worker finished first.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::context::PushRequest;
use crate::queues::{QueueError, QueueKey, WaitingQueues};

/// Outcome of a [`PushBuffer::flush_into`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Number of push requests merged.
    pub requests: usize,
    /// Number of enqueue operations performed (broadcasts count once per
    /// receiving individual).
    pub enqueued: usize,
}

impl FlushReport {
    /// Return `true` if anything was merged.
    pub const fn flushed(&self) -> bool {
        self.requests > 0
    }
}

/// Mutex-guarded map from individual slot to its pending push requests.
#[derive(Debug, Default)]
pub struct PushBuffer {
    pending: Mutex<BTreeMap<usize, Vec<PushRequest>>>,
}

impl PushBuffer {
    /// Create an empty buffer.
    pub const fn new() -> Self {
        Self {
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    /// A poisoned lock only means a recorder panicked mid-append; the map
    /// itself is still structurally valid, so keep using it.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<usize, Vec<PushRequest>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one request issued by the individual at `origin`.
    pub fn record(&self, origin: usize, request: PushRequest) {
        self.lock().entry(origin).or_default().push(request);
    }

    /// Record a batch of requests issued by the individual at `origin`,
    /// keeping their order.
    pub fn record_all(&self, origin: usize, requests: Vec<PushRequest>) {
        if requests.is_empty() {
            return;
        }
        self.lock().entry(origin).or_default().extend(requests);
    }

    /// Number of buffered requests.
    pub fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    /// Return `true` if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.lock().values().all(Vec::is_empty)
    }

    /// Drop everything buffered.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Merge every buffered request into `queues` and empty the buffer.
    ///
    /// Must only be called while no worker is running a phase.
    pub fn flush_into(&self, queues: &mut WaitingQueues) -> Result<FlushReport, QueueError> {
        let drained = std::mem::take(&mut *self.lock());
        let mut report = FlushReport::default();
        for (origin, requests) in drained {
            for request in requests {
                let enqueued = queues.apply(QueueKey::Individual(origin), request)?;
                report.requests = report.requests.saturating_add(1);
                report.enqueued = report.enqueued.saturating_add(enqueued);
            }
        }
        Ok(report)
    }
}
