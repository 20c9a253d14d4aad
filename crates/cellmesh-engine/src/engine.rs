//! The engine step loop (spec §4.7, component C9): wires `Space`, the task
//! graph, the worker pool, the repartition driver, and the transport
//! abstraction together into one control flow per simulation step.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use cellmesh_exchange::{
    absorb_strays, imbalance_exceeds_threshold, pack_proxy_cells, run_repartition as run_repartition_pass,
    unpack_proxy_cells, MessageTag, ProxySet, StrayBatch, Transport, WireMessage,
};
use cellmesh_physics::{CellWeight, Repartitioner};
use cellmesh_space::Space;
use cellmesh_tasks::{
    build_task_graph, unskip, CrossNodeLink, GraphConfig, Kernels, PoolConfig, TaskGraph, ThreadPool, WorkerPool,
};
use cellmesh_types::{CellIndex, NodeId, Ti, TimeLine};

use crate::error::{EngineError, EngineResult};
use crate::snapshot::SnapshotSink;

/// Wrapper-level policy knobs, not core semantics: the rebalance threshold
/// (spec §4.6 `ft`), the rebuild
/// tolerance (spec §4.1 `max_reldx`), the snapshot cadence, and whether
/// every step drifts unconditionally ("drift_all_policy" in spec §4.7's
/// pseudocode).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub imbalance_threshold: f64,
    pub max_reldx: f64,
    pub snapshot_step: Ti,
    pub always_drift: bool,
    pub nr_workers: usize,
}

/// What one `Engine::step` call actually did, surfaced mainly for tests and
/// for the CLI's step-by-step tracing.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepOutcome {
    pub ti_current: Ti,
    pub snapshot_written: bool,
    pub repartitioned: bool,
    pub rebuilt: bool,
}

pub struct Engine<'k> {
    pub space: Space,
    pub graph: TaskGraph,
    graph_config: GraphConfig,
    pool: WorkerPool,
    /// Drives the plain per-task/per-cell loops that aren't graph-scheduled
    /// tasks (`unskip`, `drift_all`), distinct from `pool`'s unlock-graph
    /// dispatch (spec §4.8 C10).
    thread_pool: ThreadPool,
    proxies: ProxySet,
    repartitioner: Box<dyn Repartitioner>,
    transport: Option<Arc<dyn Transport>>,
    snapshot_sink: Box<dyn SnapshotSink>,
    timeline: TimeLine,
    cfg: EngineConfig,
    pub ti_current: Ti,
    ti_last_drift: Ti,
    next_snapshot: Ti,
    /// Accumulated CPU seconds per node, indexed by `NodeId`; in a
    /// single-process deployment only this node's slot is ever written, so
    /// `check_rebalance` is trivially never tripped (spec §4.6 needs a real
    /// cross-node CPU-time collective, which this single-process engine
    /// does not perform — see `DESIGN.md`).
    cpu_time: Vec<f64>,
    kernels: Kernels<'k>,
}

/// A raw pointer wrapper letting `drift_all`'s worker threads share `&mut
/// Space`; see that function's safety comment.
struct DriftSpacePtr(*mut Space);
unsafe impl Send for DriftSpacePtr {}
unsafe impl Sync for DriftSpacePtr {}

impl<'k> Engine<'k> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mut space: Space,
        timeline: TimeLine,
        graph_config: GraphConfig,
        cfg: EngineConfig,
        repartitioner: Box<dyn Repartitioner>,
        transport: Option<Arc<dyn Transport>>,
        snapshot_sink: Box<dyn SnapshotSink>,
        kernels: Kernels<'k>,
    ) -> EngineResult<Self> {
        space.rebuild()?;
        let graph = build_task_graph(&space, &graph_config)?;
        let nr_nodes = space.nr_nodes.max(1) as usize;
        Ok(Self {
            pool: WorkerPool::new(PoolConfig { nr_workers: cfg.nr_workers.max(1), pin_cores: true }),
            thread_pool: ThreadPool::new(cfg.nr_workers.max(1)),
            proxies: ProxySet::new(),
            repartitioner,
            transport,
            snapshot_sink,
            timeline,
            next_snapshot: 0,
            ti_last_drift: 0,
            cpu_time: vec![0.0; nr_nodes],
            ti_current: 0,
            space,
            graph,
            graph_config,
            cfg,
            kernels,
        })
    }

    /// Runs exactly one step of spec §4.7's pseudocode.
    pub fn step(&mut self) -> EngineResult<StepOutcome> {
        let started = Instant::now();
        let mut outcome = StepOutcome { ti_current: self.ti_current, ..StepOutcome::default() };

        // collect_timestep
        let ti_end_min = collect_timestep(&self.space, self.ti_current).unwrap_or(self.ti_current);

        // check_rebalance
        let repart = imbalance_exceeds_threshold(&self.cpu_time, self.cfg.imbalance_threshold);

        if self.ti_current >= self.next_snapshot {
            self.drift_all(self.ti_current);
            self.snapshot_sink.dump(self.ti_current, &self.space)?;
            outcome.snapshot_written = true;
            self.next_snapshot += self.cfg.snapshot_step.max(1);
        }

        let ti_prev = self.ti_current;
        self.ti_current = ti_end_min.max(self.ti_current);
        outcome.ti_current = self.ti_current;
        let dt = self.timeline.ti_to_float(self.ti_current) - self.timeline.ti_to_float(ti_prev);

        if repart || self.cfg.always_drift {
            self.drift_all(self.ti_current);
        }

        let mut force_rebuild = false;
        if repart {
            self.run_repartition()?;
            self.proxies = ProxySet::new();
            outcome.repartitioned = true;
            force_rebuild = true;
        }

        // prepare
        let mut rebuild_needed =
            unskip(&mut self.graph, &self.space, self.ti_current, self.cfg.max_reldx, &self.thread_pool);
        rebuild_needed |= force_rebuild;
        if rebuild_needed {
            self.drift_all(self.ti_current);
            self.space.rebuild()?;
            self.exchange_cell_metadata()?;
            self.graph = build_task_graph(&self.space, &self.graph_config)?;
            unskip(&mut self.graph, &self.space, self.ti_current, self.cfg.max_reldx, &self.thread_pool);
            outcome.rebuilt = true;
        }

        self.pool.run_step(&self.graph, &mut self.space, &self.kernels, dt)?;

        let elapsed = started.elapsed().as_secs_f64();
        let my = self.space.node_id.0 as usize;
        if let Some(slot) = self.cpu_time.get_mut(my) {
            *slot += elapsed;
        }
        Ok(outcome)
    }

    pub fn proxies(&self) -> &ProxySet {
        &self.proxies
    }

    /// Replaces the cross-node link table the next rebuild's
    /// `exchange_cell_metadata` and `build_task_graph` call will use;
    /// populating it from a shared global partition map is the deployment's
    /// job (see `DESIGN.md`), not this single-process engine's.
    pub fn set_cross_node_links(&mut self, links: Vec<CrossNodeLink>) {
        self.graph_config.cross_node_links = links;
    }

    /// Drifts every particle to `to_ti`, a no-op if already drifted there
    /// this step — this is exactly spec §4.7's "drift_all (if not
    /// already)": the guard against `ti_last_drift` makes every call site
    /// idempotent without the caller needing to track whether an earlier
    /// branch already drifted.
    fn drift_all(&mut self, to_ti: Ti) -> f64 {
        if to_ti == self.ti_last_drift {
            return 0.0;
        }
        let dt = self.timeline.ti_to_float(to_ti) - self.timeline.ti_to_float(self.ti_last_drift);
        let mut roots: Vec<CellIndex> = self.space.top_cells().to_vec();

        // SAFETY: top-level cells own disjoint particle slices (spec §4.1),
        // so concurrent `cell_drift` calls on distinct roots from different
        // worker threads never touch the same array elements.
        let space_ptr = DriftSpacePtr(&mut self.space as *mut Space);
        let max_dx_bits = AtomicU64::new(0.0f64.to_bits());
        let chunk_size = (roots.len() / self.thread_pool.nr_threads().max(1)).max(1);
        self.thread_pool.parallel_for_chunks(&mut roots, chunk_size, |chunk| {
            for &root in chunk.iter() {
                let space: &mut Space = unsafe { &mut *space_ptr.0 };
                let dx = cellmesh_space::cell_drift(space, root, dt);
                let mut cur = max_dx_bits.load(Ordering::Relaxed);
                while dx > f64::from_bits(cur) {
                    match max_dx_bits.compare_exchange_weak(cur, dx.to_bits(), Ordering::Relaxed, Ordering::Relaxed) {
                        Ok(_) => break,
                        Err(observed) => cur = observed,
                    }
                }
            }
        });

        self.ti_last_drift = to_ti;
        f64::from_bits(max_dx_bits.load(Ordering::Relaxed))
    }

    /// spec §4.6: asks the repartitioner for a new mapping, redistributes
    /// particles (the global stray pass), and ships batches to peers.
    fn run_repartition(&mut self) -> EngineResult<()> {
        let weights: Vec<CellWeight> = self
            .space
            .top_cells()
            .iter()
            .map(|&idx| {
                let cell = &self.space.cells[idx.as_usize()];
                CellWeight { cell: idx, current_node: cell.node_id, weight: cell.count as f64 }
            })
            .collect();
        let nr_nodes = self.space.nr_nodes;
        let batches = run_repartition_pass(&mut self.space, &weights, self.repartitioner.as_ref(), nr_nodes)?;
        self.exchange_strays(batches)
    }

    fn exchange_strays(&mut self, batches: HashMap<NodeId, StrayBatch>) -> EngineResult<()> {
        for (node, batch) in batches {
            if node == self.space.node_id {
                absorb_strays(&mut self.space, batch);
                continue;
            }
            let transport = self.transport.as_ref().ok_or_else(|| EngineError::Invariant {
                node: self.space.node_id,
                condition: "repartition::no_transport",
                values: format!("batch destined for {node} but no transport configured"),
            })?;
            let payload = bincode::serialize(&batch).map_err(|e| EngineError::Invariant {
                node: self.space.node_id,
                condition: "repartition::stray_encode",
                values: e.to_string(),
            })?;
            transport.send(node, WireMessage { tag: MessageTag::STRAYS, payload })?;
        }
        if let Some(transport) = self.transport.clone() {
            while let Some(msg) = transport.try_recv(MessageTag::STRAYS)? {
                let batch: StrayBatch = bincode::deserialize(&msg.payload).map_err(|e| EngineError::Invariant {
                    node: self.space.node_id,
                    condition: "repartition::stray_decode",
                    values: e.to_string(),
                })?;
                absorb_strays(&mut self.space, batch);
            }
        }
        Ok(())
    }

    /// spec §4.5 "exchanged whenever the graph is rebuilt": packs and ships
    /// the `pcell` tree skeleton for every outgoing proxy root, and folds
    /// inbound counts into the matching foreign-cell slot. Allocating a
    /// foreign top cell that doesn't already exist in `space.cells` is out
    /// of scope here (see `DESIGN.md`): `cross_node_links` is only non-empty
    /// once a deployment-level partition map has already reserved those
    /// slots.
    fn exchange_cell_metadata(&mut self) -> EngineResult<()> {
        self.proxies = ProxySet::new();
        let links = self.graph_config.cross_node_links.clone();
        if links.is_empty() {
            return Ok(());
        }
        let transport = self.transport.clone().ok_or_else(|| EngineError::Invariant {
            node: self.space.node_id,
            condition: "exchange::no_transport",
            values: "cross_node_links present but no transport configured".to_string(),
        })?;

        let mut roots_by_peer: HashMap<NodeId, Vec<CellIndex>> = HashMap::new();
        for link in &links {
            roots_by_peer.entry(link.peer_node).or_default().push(link.local_cell);
            self.proxies.proxy_for(link.peer_node).cells_out.push(link.local_cell);
            self.proxies.proxy_for(link.peer_node).cells_in.push(link.foreign_cell);
        }
        for (peer, roots) in &roots_by_peer {
            let packed = pack_proxy_cells(&self.space, roots)?;
            transport.send(*peer, WireMessage { tag: MessageTag::PCELL, payload: packed })?;
        }
        for link in &links {
            if let Some(msg) = transport.try_recv(MessageTag::PCELL)? {
                let nodes = unpack_proxy_cells(&msg.payload)?;
                if let Some(node) = nodes.first() {
                    let slot = &mut self.space.cells[link.foreign_cell.as_usize()];
                    slot.count = node.count;
                    slot.gcount = node.gcount;
                    slot.scount = node.scount;
                }
            }
        }
        Ok(())
    }
}

/// spec §4.7 `collect_timestep`: the minimum `ti_end_min` among this node's
/// currently active leaf cells (a multi-node deployment would further
/// reduce this across nodes; single-process callers only see their own).
fn collect_timestep(space: &Space, ti_current: Ti) -> Option<Ti> {
    space.cells.iter().filter(|c| !c.split && c.is_active(ti_current)).map(|c| c.ti_end_min).min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellmesh_physics::{ReferenceKernel, StationaryRepartitioner};
    use cellmesh_space::Boundary;
    use cellmesh_types::{Part, Vec3, XPart};

    use crate::snapshot::LoggingSnapshotSink;

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

    fn test_engine(n: usize, target_leaf: usize) -> Engine<'static> {
        let space = lattice_space(n, target_leaf);
        let timeline = TimeLine::new(0.0, 1.0, 1 << 10).unwrap();
        let cfg = EngineConfig {
            imbalance_threshold: 0.1,
            max_reldx: 0.1,
            snapshot_step: 1 << 9,
            always_drift: false,
            nr_workers: 2,
        };
        let kernels = Kernels { hydro: &ReferenceKernel, gravity: None, lifecycle: &ReferenceKernel };
        Engine::new(
            space,
            timeline,
            GraphConfig::default(),
            cfg,
            Box::new(StationaryRepartitioner),
            None,
            Box::new(LoggingSnapshotSink),
            kernels,
        )
        .unwrap()
    }

    #[test]
    fn single_step_advances_ti_current_and_keeps_particle_count() {
        let mut engine = test_engine(3, 4);
        let before = engine.space.parts.len();
        let outcome = engine.step().unwrap();
        assert_eq!(engine.space.parts.len(), before);
        assert!(outcome.ti_current >= engine.cfg.snapshot_step.min(outcome.ti_current) || outcome.snapshot_written);
    }

    #[test]
    fn first_step_always_writes_the_initial_snapshot() {
        let mut engine = test_engine(3, 4);
        let outcome = engine.step().unwrap();
        assert!(outcome.snapshot_written);
    }

    #[test]
    fn repeated_steps_never_panic_and_particles_stay_finite() {
        let mut engine = test_engine(3, 4);
        for _ in 0..5 {
            engine.step().unwrap();
        }
        for p in &engine.space.parts {
            assert!(p.x.x.is_finite() && p.x.y.is_finite() && p.x.z.is_finite());
        }
    }

    #[test]
    fn stationary_repartitioner_never_trips_without_prior_cpu_imbalance() {
        let mut engine = test_engine(3, 4);
        let outcome = engine.step().unwrap();
        assert!(!outcome.repartitioned);
    }
}
