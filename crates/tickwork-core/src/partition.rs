//! Stable assignment of individual slots to workers.
//!
//! Each worker owns a list of contiguous slot ranges. When individuals are
//! admitted, the new slots are cut into contiguous chunks and appended to
//! the workers' lists; existing ranges are never moved, so an individual
//! is processed by the same worker for the whole run.
//!
//! Chunks go to workers in ascending order of current load (ties broken by
//! worker id), which keeps partitions balanced when admissions are small.

use std::ops::Range;

/// Per-worker lists of contiguous slot ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partitioner {
    ranges: Vec<Vec<Range<usize>>>,
}

impl Partitioner {
    /// Create empty partitions for `workers` workers.
    pub fn new(workers: usize) -> Self {
        Self {
            ranges: vec![Vec::new(); workers],
        }
    }

    /// Number of workers.
    pub fn workers(&self) -> usize {
        self.ranges.len()
    }

    /// Number of slots assigned to `worker`.
    pub fn load(&self, worker: usize) -> usize {
        self.ranges
            .get(worker)
            .map_or(0, |ranges| ranges.iter().map(ExactSizeIterator::len).sum())
    }

    /// Total number of assigned slots.
    pub fn assigned(&self) -> usize {
        (0..self.workers()).map(|w| self.load(w)).sum()
    }

    /// Assign the slots `[start, start + count)` to workers.
    pub fn admit(&mut self, start: usize, count: usize) {
        let workers = self.workers();
        if count == 0 || workers == 0 {
            return;
        }

        let mut order: Vec<usize> = (0..workers).collect();
        order.sort_by_key(|&w| (self.load(w), w));

        let base = count.checked_div(workers).unwrap_or(0);
        let extra = count.checked_rem(workers).unwrap_or(0);
        let mut next = start;

        for (rank, worker) in order.into_iter().enumerate() {
            let size = base.saturating_add(usize::from(rank < extra));
            if size == 0 {
                continue;
            }
            let end = next.saturating_add(size);
            if let Some(ranges) = self.ranges.get_mut(worker) {
                match ranges.last_mut() {
                    Some(last) if last.end == next => last.end = end,
                    _ => ranges.push(next..end),
                }
            }
            next = end;
        }
    }

    /// The worker that owns `index`.
    pub fn owner(&self, index: usize) -> Option<usize> {
        self.ranges
            .iter()
            .position(|ranges| ranges.iter().any(|r| r.contains(&index)))
    }

    /// The ranges owned by `worker`.
    pub fn ranges(&self, worker: usize) -> &[Range<usize>] {
        self.ranges
            .get(worker)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every slot owned by `worker`, ascending within each range, ranges in
    /// assignment order.
    pub fn indices(&self, worker: usize) -> Vec<usize> {
        self.ranges(worker).iter().cloned().flatten().collect()
    }

    /// Return `true` if no slot is assigned to two workers.
    pub fn is_disjoint(&self) -> bool {
        let mut all: Vec<usize> = (0..self.workers()).flat_map(|w| self.indices(w)).collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        all.len() == total
    }

    /// Drop every assignment, keeping the worker count.
    pub fn reset(&mut self) {
        for ranges in &mut self.ranges {
            ranges.clear();
        }
    }
}
