//! The worker pool (spec §4.4): `nr_workers` OS threads, each pinned to a
//! core via `core_affinity`, synchronized by a launch barrier and draining
//! per-worker queues until the step's graph is exhausted.
//!
//! Spec §4.4's 4-step launch protocol: (1) the controller thread seeds the
//! queues and clears the rebuild flag, (2) all workers rendezvous on the
//! barrier, (3) each worker loops pop -> dispatch -> complete until every
//! queue and the injector are empty, (4) workers rendezvous again before
//! the controller reads back results.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cellmesh_space::Space;

use crate::error::SchedulerError;
use crate::graph::TaskGraph;
use crate::queue::QueueSet;
use crate::scheduler::{complete, dispatch, seed_queues, Kernels};
use crate::threadpool::Barrier;

pub struct PoolConfig {
    pub nr_workers: usize,
    pub pin_cores: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            nr_workers: num_cpus::get().max(1),
            pin_cores: true,
        }
    }
}

/// A raw pointer wrapper letting worker threads share `&mut Space`. Safety
/// argument: at any instant, the set of cells a runnable (non-skipped,
/// zero-wait) task touches never overlaps the set any other concurrently
/// runnable task touches — that is exactly what the unlock edges built in
/// `build_task_graph` encode (every pair of tasks whose cells could
/// overlap has an edge or a shared predecessor serializing them). The pool
/// itself adds no new aliasing; it only executes what the graph already
/// proved disjoint.
struct SpacePtr(*mut Space);
unsafe impl Send for SpacePtr {}
unsafe impl Sync for SpacePtr {}

/// Fixed set of worker threads plus the queues they drain (spec §4.4,
/// §4.3).
pub struct WorkerPool {
    config: PoolConfig,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }

    /// Runs one full step: seeds the queues from `graph`'s already-`unskip`ed
    /// tasks, launches `nr_workers` pinned threads to drain them against
    /// `space`, and returns once every task has run (or the first fatal
    /// error is observed, per spec §4.3 "Post-execution"/"fatal errors stop
    /// the whole scheduler").
    pub fn run_step(
        &self,
        graph: &TaskGraph,
        space: &mut Space,
        kernels: &Kernels<'_>,
        dt: f64,
    ) -> Result<(), SchedulerError> {
        let nr_workers = self.config.nr_workers.max(1);
        let queues = QueueSet::new(nr_workers);
        seed_queues(graph, &queues, nr_workers);

        let core_ids = core_affinity::get_core_ids().unwrap_or_default();
        let barrier = Arc::new(Barrier::new(nr_workers));
        let fatal: Arc<parking_lot::Mutex<Option<SchedulerError>>> =
            Arc::new(parking_lot::Mutex::new(None));
        let stop = Arc::new(AtomicBool::new(false));
        let space_ptr = SpacePtr(space as *mut Space);
        let graph_ref: &TaskGraph = graph;
        let queues_ref = &queues;

        std::thread::scope(|scope| {
            for worker_id in 0..nr_workers {
                let barrier = barrier.clone();
                let fatal = fatal.clone();
                let stop = stop.clone();
                let core = if self.config.pin_cores {
                    core_ids.get(worker_id % core_ids.len().max(1)).copied()
                } else {
                    None
                };
                let space_ptr = SpacePtr(space_ptr.0);
                scope.spawn(move || {
                    if let Some(core) = core {
                        core_affinity::set_for_current(core);
                    }
                    barrier.wait();

                    let steal_order: Vec<usize> = (0..nr_workers)
                        .map(|i| (i + worker_id) % nr_workers)
                        .collect();
                    loop {
                        if stop.load(Ordering::Acquire) {
                            break;
                        }
                        match queues_ref.pop_for(worker_id, &steal_order) {
                            Some(task_idx) => {
                                // SAFETY: see `SpacePtr`'s doc comment.
                                let space: &mut Space = unsafe { &mut *space_ptr.0 };
                                match dispatch(graph_ref, task_idx, space, kernels, dt) {
                                    Ok(()) => complete(graph_ref, task_idx, queues_ref, worker_id),
                                    Err(e) => {
                                        *fatal.lock() = Some(e);
                                        stop.store(true, Ordering::Release);
                                        break;
                                    }
                                }
                            }
                            None => {
                                if queues_ref.is_fully_drained() {
                                    break;
                                }
                                std::thread::yield_now();
                            }
                        }
                    }
                    barrier.wait();
                });
            }
        });

        if let Some(e) = fatal.lock().take() {
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellmesh_physics::{FailingKernel, LifecycleKernel, ReferenceKernel};
    use cellmesh_space::Boundary;
    use cellmesh_types::{NodeId, Part, Vec3, XPart};

    use crate::graph::{build_task_graph, GraphConfig};
    use crate::scheduler::unskip;
    use crate::threadpool::ThreadPool;

    fn lattice_space(n_per_axis: usize, target_leaf: usize) -> Space {
        let mut space = Space::new(Vec3::new(1.0, 1.0, 1.0), Boundary::Periodic, NodeId(0), 1);
        space.target_leaf_count = target_leaf;
        let mut parts = Vec::new();
        let mut xparts = Vec::new();
        let mut id = 0u64;
        for i in 0..n_per_axis {
            for j in 0..n_per_axis {
                for k in 0..n_per_axis {
                    let x = Vec3::new(
                        (i as f64 + 0.5) / n_per_axis as f64,
                        (j as f64 + 0.5) / n_per_axis as f64,
                        (k as f64 + 0.5) / n_per_axis as f64,
                    );
                    let mut p = Part::new_at(id, x, 0.05);
                    p.v = Vec3::new(x.y, -x.x, 0.0);
                    p.ti_end = 0;
                    parts.push(p);
                    xparts.push(XPart::default());
                    id += 1;
                }
            }
        }
        space.parts = parts;
        space.xparts = xparts;
        space
    }

    #[test]
    fn run_step_drains_every_task_across_multiple_workers() {
        let mut space = lattice_space(4, 8);
        space.rebuild().unwrap();
        let mut graph = build_task_graph(&space, &GraphConfig::default()).unwrap();
        unskip(&mut graph, &space, 0, 0.1, &ThreadPool::new(2));

        let kernel = ReferenceKernel;
        let kernels = Kernels {
            hydro: &kernel,
            gravity: None,
            lifecycle: &kernel,
        };
        let pool = WorkerPool::new(PoolConfig {
            nr_workers: 4,
            pin_cores: false,
        });
        pool.run_step(&mut graph, &mut space, &kernels, 0.01).unwrap();
        for p in &space.parts {
            assert!(p.rho >= 0.0);
        }
    }

    #[test]
    fn run_step_surfaces_fatal_kernel_error() {
        let mut space = lattice_space(3, 4);
        space.rebuild().unwrap();
        let mut graph = build_task_graph(&space, &GraphConfig::default()).unwrap();
        unskip(&mut graph, &space, 0, 0.1, &ThreadPool::new(2));

        let kernel = FailingKernel;
        let kernels = Kernels {
            hydro: &kernel,
            gravity: None,
            lifecycle: &ReferenceLifecycle,
        };
        let pool = WorkerPool::new(PoolConfig {
            nr_workers: 2,
            pin_cores: false,
        });
        let err = pool.run_step(&mut graph, &mut space, &kernels, 0.01).unwrap_err();
        assert!(matches!(err, SchedulerError::Physics(_)));
    }

    /// `FailingKernel` only implements `PhysicsKernel`; the fatal-path test
    /// above still needs a `LifecycleKernel` to drive init/kick/ghost tasks,
    /// so it borrows the reference kernel's lifecycle behaviour.
    struct ReferenceLifecycle;
    impl cellmesh_physics::LifecycleKernel for ReferenceLifecycle {
        fn init(&self, parts: &mut [Part]) -> cellmesh_physics::PhysicsResult<()> {
            ReferenceKernel.init(parts)
        }
        fn ghost(&self, parts: &mut [Part]) -> cellmesh_physics::PhysicsResult<()> {
            ReferenceKernel.ghost(parts)
        }
        fn kick1(&self, parts: &mut [Part], dt: f64) -> cellmesh_physics::PhysicsResult<()> {
            ReferenceKernel.kick1(parts, dt)
        }
        fn kick2(&self, parts: &mut [Part], dt: f64) -> cellmesh_physics::PhysicsResult<()> {
            ReferenceKernel.kick2(parts, dt)
        }
    }
}
