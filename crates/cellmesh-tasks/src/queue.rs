//! Per-worker priority queues (spec §4.3 "`nr_queues` FIFO queues ... a
//! lock-protected priority heap keyed by weight").
//!
//! Newly-runnable tasks are pushed onto a shared `crossbeam::deque::Injector`
//! first; each worker periodically drains a batch of it into its own
//! weighted heap. This keeps the cheap lock-free multi-producer path from
//! `crossbeam::deque` while still giving weight-descending pop order within
//! a worker (spec: "queues consume in decreasing weight").

use std::cmp::Ordering;

use crossbeam::deque::{Injector, Steal};
use parking_lot::Mutex;

use cellmesh_types::TaskIndex;

#[derive(Debug, Clone, Copy)]
struct Weighted {
    weight: f64,
    task: TaskIndex,
}

impl PartialEq for Weighted {
    fn eq(&self, other: &Self) -> bool {
        self.weight == other.weight
    }
}
impl Eq for Weighted {}
impl PartialOrd for Weighted {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Weighted {
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight.partial_cmp(&other.weight).unwrap_or(Ordering::Equal)
    }
}

/// One worker's local queue: a weight-ordered binary heap guarded by a
/// `parking_lot::Mutex`.
#[derive(Default)]
pub struct WorkerQueue {
    heap: Mutex<std::collections::BinaryHeap<Weighted>>,
}

impl WorkerQueue {
    pub fn push(&self, task: TaskIndex, weight: f64) {
        self.heap.lock().push(Weighted { weight, task });
    }

    pub fn pop(&self) -> Option<TaskIndex> {
        self.heap.lock().pop().map(|w| w.task)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The scheduler's full queue set: a shared injector every producer posts
/// to, plus `nr_queues` per-worker heaps.
pub struct QueueSet {
    pub injector: Injector<(TaskIndex, ordered_weight::OrderedF64)>,
    pub workers: Vec<WorkerQueue>,
}

/// A thin newtype giving `f64` a total order for use as an `Injector`
/// payload key; NaN never occurs here since weights are derived from
/// particle counts and costs.
pub mod ordered_weight {
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct OrderedF64(pub f64);
}

impl QueueSet {
    pub fn new(nr_queues: usize) -> Self {
        Self {
            injector: Injector::new(),
            workers: (0..nr_queues).map(|_| WorkerQueue::default()).collect(),
        }
    }

    /// Posts a newly-runnable task to the shared injector (spec: "a task
    /// enters its owner queue when its wait counter decrements to zero").
    pub fn post(&self, task: TaskIndex, weight: f64) {
        self.injector.push((task, ordered_weight::OrderedF64(weight)));
    }

    /// Drains whatever the injector currently holds into worker `id`'s own
    /// heap; called when that worker's local queue runs dry.
    pub fn drain_injector_into(&self, id: usize) -> usize {
        let mut moved = 0;
        loop {
            match self.injector.steal() {
                Steal::Success((task, w)) => {
                    self.workers[id].push(task, w.0);
                    moved += 1;
                }
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }
        moved
    }

    /// Pops the next task for worker `id`: own queue first, then the
    /// injector, then a bounded steal from other workers (spec §4.3 "on
    /// empty, they attempt steal from other queues in a bounded random
    /// order").
    pub fn pop_for(&self, id: usize, steal_order: &[usize]) -> Option<TaskIndex> {
        if let Some(t) = self.workers[id].pop() {
            return Some(t);
        }
        if self.drain_injector_into(id) > 0 {
            if let Some(t) = self.workers[id].pop() {
                return Some(t);
            }
        }
        for &other in steal_order {
            if other == id {
                continue;
            }
            if let Some(t) = self.workers[other].pop() {
                return Some(t);
            }
        }
        None
    }

    pub fn is_fully_drained(&self) -> bool {
        self.injector.is_empty() && self.workers.iter().all(|w| w.is_empty())
    }
}
