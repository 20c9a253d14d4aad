//! Activation (unskip), dispatch, and post-execution unlock propagation
//! (spec §4.2 "Activation", §4.3 "Dispatch"/"Post-execution").

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use cellmesh_physics::{GravityKernel, LifecycleKernel, PhysicsKernel};
use cellmesh_space::{needs_rebuild, Space};
use cellmesh_types::Ti;

use crate::error::SchedulerError;
use crate::graph::TaskGraph;
use crate::queue::QueueSet;
use crate::task::{TaskKind, TaskSubtype};
use crate::threadpool::ThreadPool;

/// The physics collaborator bundle a dispatch call is handed (spec §6):
/// three independent trait objects rather than one god-trait, since a
/// pure-hydro or pure-gravity build may only have one of them.
///
/// The explicit `+ Send + Sync` is required even though each trait already
/// carries those as supertrait bounds: Rust does not propagate supertrait
/// auto-trait bounds onto the `dyn` object type itself, so without this the
/// worker pool could not send `&Kernels` into its scoped threads.
pub struct Kernels<'a> {
    pub hydro: &'a (dyn PhysicsKernel + Send + Sync),
    pub gravity: Option<&'a (dyn GravityKernel + Send + Sync)>,
    pub lifecycle: &'a (dyn LifecycleKernel + Send + Sync),
}

/// Marks every task `skip` by default, then activates tasks whose owning
/// cell(s) are active (spec §4.2 Activation). Pair-density activation also
/// unskips both cells' sort tasks for the pair's axis flag. Returns whether
/// any active cell's drift has exceeded the rebuild tolerance.
///
/// The per-task activation loop has no dependency between iterations, so
/// it runs across `pool`'s worker threads via `parallel_for_chunks` rather
/// than a plain sequential scan (spec §4.8 C10).
pub fn unskip(graph: &mut TaskGraph, space: &Space, t_now: Ti, max_reldx: f64, pool: &ThreadPool) -> bool {
    for task in &mut graph.tasks {
        task.skip = true;
    }

    let to_unskip_sorts: Mutex<Vec<(cellmesh_types::CellIndex, u32)>> = Mutex::new(Vec::new());
    let rebuild_needed = AtomicBool::new(false);

    let chunk_size = (graph.tasks.len() / pool.nr_threads().max(1)).max(1);
    pool.parallel_for_chunks(&mut graph.tasks, chunk_size, |chunk| {
        let mut local_sorts: Vec<(cellmesh_types::CellIndex, u32)> = Vec::new();
        for task in chunk.iter_mut() {
            let ci_active = space.cells[task.ci.as_usize()].is_active(t_now);
            let cj_active = task
                .cj
                .map(|c| space.cells[c.as_usize()].is_active(t_now))
                .unwrap_or(false);

            let activate = match task.kind {
                TaskKind::Pair | TaskKind::SubPair => ci_active || cj_active,
                _ => ci_active,
            };
            if activate {
                task.skip = false;
                if matches!(task.kind, TaskKind::Pair | TaskKind::SubPair)
                    && task.subtype == TaskSubtype::Density
                {
                    local_sorts.push((task.ci, task.flags));
                    if let Some(cj) = task.cj {
                        local_sorts.push((cj, task.flags));
                    }
                }
            }

            if ci_active {
                let c = &space.cells[task.ci.as_usize()];
                if c.dx_max_part > max_reldx * c.h_max {
                    rebuild_needed.store(true, Ordering::Relaxed);
                }
            }

            if matches!(task.kind, TaskKind::Pair | TaskKind::SubPair) && (ci_active || cj_active) {
                if let Some(cj) = task.cj {
                    let ci_cell = &space.cells[task.ci.as_usize()];
                    let cj_cell = &space.cells[cj.as_usize()];
                    if needs_rebuild(ci_cell, cj_cell, max_reldx) {
                        rebuild_needed.store(true, Ordering::Relaxed);
                    }
                }
            }
        }
        if !local_sorts.is_empty() {
            to_unskip_sorts.lock().extend(local_sorts);
        }
    });

    for (cell, flags) in to_unskip_sorts.into_inner() {
        if let Some(slots) = graph.cell_tasks.get(&cell) {
            if let Some(sort_idx) = slots.sort {
                let sort_task = &mut graph.tasks[sort_idx.as_usize()];
                sort_task.skip = false;
                sort_task.flags |= flags;
            }
        }
    }

    rebuild_needed.into_inner()
}

/// Seeds the queue set with every currently-runnable task: active, not
/// skipped, and with a zero wait count (spec: "a task enters its owner
/// queue when its wait counter decrements to zero" — on entry to a fresh
/// step this is simply every root of the active subgraph).
pub fn seed_queues(graph: &TaskGraph, queues: &QueueSet, nr_workers: usize) {
    for (i, task) in graph.tasks.iter().enumerate() {
        if !task.skip && task.wait_count() == 0 {
            let worker = i % nr_workers.max(1);
            queues.workers[worker].push(cellmesh_types::TaskIndex::from_usize(i), task.weight);
        }
    }
}

/// Runs one task to completion (spec §4.3 Dispatch). Skipped tasks are a
/// no-op so their `wait` decrements still propagate.
pub fn dispatch(
    graph: &TaskGraph,
    task_idx: cellmesh_types::TaskIndex,
    space: &mut Space,
    kernels: &Kernels<'_>,
    dt: f64,
) -> Result<(), SchedulerError> {
    let task = &graph.tasks[task_idx.as_usize()];
    if task.skip {
        return Ok(());
    }

    match (task.kind, task.subtype) {
        (TaskKind::Sort, _) => {
            space.cell_sort(task.ci, cellmesh_types::AxisMask(task.flags as u16));
        }
        (TaskKind::Drift, _) => {
            cellmesh_space::cell_drift(space, task.ci, dt);
        }
        (TaskKind::SelfTask | TaskKind::SubSelf, TaskSubtype::Density) => {
            let range = space.cells[task.ci.as_usize()].parts.range();
            kernels.hydro.do_self_density(&mut space.parts[range])?;
        }
        (TaskKind::Pair | TaskKind::SubPair, TaskSubtype::Density) => {
            let cj = task.cj.expect("pair task always has cj");
            let (ri, rj) = (space.cells[task.ci.as_usize()].parts.range(), space.cells[cj.as_usize()].parts.range());
            let axis = task.flags.trailing_zeros() as usize;
            run_pair_density(kernels.hydro, axis, &mut space.parts, ri, rj)?;
        }
        (TaskKind::SelfTask | TaskKind::SubSelf, TaskSubtype::Gradient) => {
            let range = space.cells[task.ci.as_usize()].parts.range();
            kernels.hydro.do_self_gradient(&mut space.parts[range])?;
        }
        (TaskKind::SelfTask | TaskKind::SubSelf, TaskSubtype::Force) => {
            let range = space.cells[task.ci.as_usize()].parts.range();
            kernels.hydro.do_self_force(&mut space.parts[range])?;
        }
        (TaskKind::Pair | TaskKind::SubPair, TaskSubtype::Force) => {
            let cj = task.cj.expect("pair task always has cj");
            let (ri, rj) = (space.cells[task.ci.as_usize()].parts.range(), space.cells[cj.as_usize()].parts.range());
            let axis = task.flags.trailing_zeros() as usize;
            run_pair_force(kernels.hydro, axis, &mut space.parts, ri, rj)?;
        }
        (TaskKind::SelfTask, TaskSubtype::Grav) | (TaskKind::Pair, TaskSubtype::Grav) => {
            if let Some(grav) = kernels.gravity {
                run_gravity(task, grav, space)?;
            }
        }
        (TaskKind::Init, _) => {
            let range = space.cells[task.ci.as_usize()].parts.range();
            kernels.lifecycle.init(&mut space.parts[range])?;
        }
        (TaskKind::Ghost, _) => {
            let range = space.cells[task.ci.as_usize()].parts.range();
            kernels.lifecycle.ghost(&mut space.parts[range])?;
        }
        (TaskKind::ExtraGhost, _) => {
            let range = space.cells[task.ci.as_usize()].parts.range();
            kernels.lifecycle.extra_ghost(&mut space.parts[range])?;
        }
        (TaskKind::Kick1, _) => {
            let range = space.cells[task.ci.as_usize()].parts.range();
            kernels.lifecycle.kick1(&mut space.parts[range], dt)?;
        }
        (TaskKind::Kick2, _) => {
            let range = space.cells[task.ci.as_usize()].parts.range();
            kernels.lifecycle.kick2(&mut space.parts[range], dt)?;
        }
        (TaskKind::Cooling, _) => {
            let range = space.cells[task.ci.as_usize()].parts.range();
            kernels.lifecycle.cooling(&mut space.parts[range], dt)?;
        }
        (TaskKind::SourceTerms, _) => {
            let range = space.cells[task.ci.as_usize()].parts.range();
            kernels.lifecycle.sourceterms(&mut space.parts[range], dt)?;
        }
        (TaskKind::Timestep, _) => run_timestep(space, task.ci),
        (TaskKind::Send | TaskKind::Recv, _) => {
            // Transport is driven by `cellmesh-exchange`; the task graph
            // only models the dependency shape here (spec §9 "wrap sends/
            // recvs behind a transport trait").
        }
        (TaskKind::GravUp | TaskKind::GravMm | TaskKind::GravGatherM | TaskKind::GravFft, _) => {
            // Mesh path: requires the full gravity pipeline wired through
            // `cellmesh-exchange`'s node topology; a no-op here keeps the
            // dependency shape testable without a real FFT collaborator.
        }
        (TaskKind::SelfTask, TaskSubtype::ExternalGrav) => {
            if let Some(grav) = kernels.gravity {
                let range = space.cells[task.ci.as_usize()].gparts.range();
                grav.do_external_grav(&mut space.gparts[range])?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn run_pair_density(
    kernel: &dyn PhysicsKernel,
    axis: usize,
    parts: &mut [cellmesh_types::Part],
    ri: std::ops::Range<usize>,
    rj: std::ops::Range<usize>,
) -> Result<(), SchedulerError> {
    let (lo, hi) = if ri.start < rj.start { (ri, rj) } else { (rj, ri) };
    let (left, right) = parts.split_at_mut(hi.start);
    kernel.do_pair_density(axis, &mut left[lo], &mut right[..hi.len()])?;
    Ok(())
}

fn run_pair_force(
    kernel: &dyn PhysicsKernel,
    axis: usize,
    parts: &mut [cellmesh_types::Part],
    ri: std::ops::Range<usize>,
    rj: std::ops::Range<usize>,
) -> Result<(), SchedulerError> {
    let (lo, hi) = if ri.start < rj.start { (ri, rj) } else { (rj, ri) };
    let (left, right) = parts.split_at_mut(hi.start);
    kernel.do_pair_force(axis, &mut left[lo], &mut right[..hi.len()])?;
    Ok(())
}

fn run_gravity(
    task: &crate::task::Task,
    grav: &dyn GravityKernel,
    space: &mut Space,
) -> Result<(), SchedulerError> {
    match task.cj {
        None => {
            let range = space.cells[task.ci.as_usize()].gparts.range();
            grav.do_self_grav(&mut space.gparts[range])?;
        }
        Some(cj) => {
            let ri = space.cells[task.ci.as_usize()].gparts.range();
            let rj = space.cells[cj.as_usize()].gparts.range();
            let (lo, hi) = if ri.start < rj.start { (ri, rj) } else { (rj, ri) };
            let (left, right) = space.gparts.split_at_mut(hi.start);
            grav.do_pair_grav(&mut left[lo], &mut right[..hi.len()])?;
        }
    }
    Ok(())
}

/// `timestep` task (spec §4.3): recomputes `ti_end_min`/`ti_end_max` for the
/// cell from its particles' current `ti_end`, enforcing time-bin
/// monotonicity (spec §8 property 4).
fn run_timestep(space: &mut Space, cell: cellmesh_types::CellIndex) {
    let range = space.cells[cell.as_usize()].parts.range();
    let (mut min_end, mut max_end) = (u64::MAX, 0u64);
    for p in &space.parts[range] {
        min_end = min_end.min(p.ti_end);
        max_end = max_end.max(p.ti_end);
    }
    if min_end == u64::MAX {
        min_end = 0;
    }
    let c = &mut space.cells[cell.as_usize()];
    c.ti_end_min = min_end;
    c.ti_end_max = max_end;
    c.updated = c.parts.len;
}

/// After `task_idx` completes, decrements the `wait` of everything it
/// unlocks, pushing newly-runnable ones onto worker `owner`'s queue (spec
/// §4.3 "Post-execution").
pub fn complete(
    graph: &TaskGraph,
    task_idx: cellmesh_types::TaskIndex,
    queues: &QueueSet,
    owner: usize,
) {
    for &successor in &graph.tasks[task_idx.as_usize()].unlocks {
        if graph.tasks[successor.as_usize()].resolve_one_dependency() {
            let weight = graph.tasks[successor.as_usize()].weight;
            queues.workers[owner % queues.workers.len()].push(successor, weight);
        }
    }
}

/// Drains a graph entirely using a single logical worker; suitable for
/// tests and for a single-threaded engine configuration. `cellmesh-tasks`'
/// `pool` module performs the same drain across real OS threads.
pub fn drain_single_threaded(
    graph: &mut TaskGraph,
    space: &mut Space,
    kernels: &Kernels<'_>,
    dt: f64,
) -> Result<(), SchedulerError> {
    let queues = QueueSet::new(1);
    seed_queues(graph, &queues, 1);
    let ran = AtomicBool::new(true);
    while ran.load(Ordering::Relaxed) {
        ran.store(false, Ordering::Relaxed);
        while let Some(task_idx) = queues.pop_for(0, &[0]) {
            dispatch(graph, task_idx, space, kernels, dt)?;
            complete(graph, task_idx, &queues, 0);
            ran.store(true, Ordering::Relaxed);
        }
    }
    if !queues.is_fully_drained() {
        return Err(SchedulerError::GraphOverflow(0));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellmesh_physics::ReferenceKernel;
    use cellmesh_space::Boundary;
    use cellmesh_types::{NodeId, Part, Vec3, XPart};

    use crate::graph::{build_task_graph, GraphConfig};

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
                    p.ti_end = 4;
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
    fn unskip_activates_only_tasks_touching_active_cells() {
        let mut space = lattice_space(4, 8);
        space.rebuild().unwrap();
        let graph_config = GraphConfig::default();
        let mut graph = build_task_graph(&space, &graph_config).unwrap();
        for c in &mut space.cells {
            c.ti_end_min = 10;
        }
        space.cells[0].ti_end_min = 0;
        unskip(&mut graph, &space, 0, 0.1, &ThreadPool::new(2));
        for task in &graph.tasks {
            if task.kind == TaskKind::SelfTask && task.subtype == TaskSubtype::Density {
                if task.ci == cellmesh_types::CellIndex(0) {
                    assert!(!task.skip);
                } else {
                    assert!(task.skip);
                }
            }
        }
    }

    #[test]
    fn unskip_is_idempotent() {
        let mut space = lattice_space(3, 4);
        space.rebuild().unwrap();
        let mut graph = build_task_graph(&space, &GraphConfig::default()).unwrap();
        unskip(&mut graph, &space, 1000, 0.1, &ThreadPool::new(2));
        let first: Vec<bool> = graph.tasks.iter().map(|t| t.skip).collect();
        unskip(&mut graph, &space, 1000, 0.1, &ThreadPool::new(2));
        let second: Vec<bool> = graph.tasks.iter().map(|t| t.skip).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn drain_runs_every_non_skipped_task_exactly_once_worth_of_work() {
        let mut space = lattice_space(3, 4);
        space.rebuild().unwrap();
        let mut graph = build_task_graph(&space, &GraphConfig::default()).unwrap();
        unskip(&mut graph, &space, 1000, 0.1, &ThreadPool::new(2));
        let kernel = ReferenceKernel;
        let kernels = Kernels {
            hydro: &kernel,
            gravity: None,
            lifecycle: &kernel,
        };
        drain_single_threaded(&mut graph, &mut space, &kernels, 0.01).unwrap();
        for p in &space.parts {
            assert!(p.rho >= 0.0);
        }
    }
}
