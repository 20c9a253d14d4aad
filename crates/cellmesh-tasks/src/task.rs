//! The task record (spec §4.2 "Task record").

use std::sync::atomic::{AtomicU32, Ordering};

use cellmesh_types::{CellIndex, TaskIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    SelfTask,
    Pair,
    SubSelf,
    SubPair,
    Sort,
    Drift,
    Init,
    Ghost,
    ExtraGhost,
    Kick1,
    Kick2,
    Timestep,
    Cooling,
    SourceTerms,
    Send,
    Recv,
    GravUp,
    GravMm,
    GravGatherM,
    GravFft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskSubtype {
    None,
    Density,
    Gradient,
    Force,
    Grav,
    ExternalGrav,
    Xv,
    Rho,
    GradientMsg,
    Tend,
}

/// A single node of the task graph. `wait` is the atomic unmet-dependency
/// counter (spec §4.3 "enters its owner queue when its `wait` counter
/// decrements to zero"); `unlocks` are the tasks this one's completion may
/// free.
#[derive(Debug)]
pub struct Task {
    pub kind: TaskKind,
    pub subtype: TaskSubtype,
    pub ci: CellIndex,
    pub cj: Option<CellIndex>,
    /// Axis bits for sort/pair tasks, or message-tag bits for send/recv
    /// (spec §4.2 "flags").
    pub flags: u32,
    pub skip: bool,
    pub weight: f64,
    pub rank: u32,
    pub wait: AtomicU32,
    pub unlocks: Vec<TaskIndex>,
}

impl Task {
    pub fn new(kind: TaskKind, subtype: TaskSubtype, ci: CellIndex, cj: Option<CellIndex>) -> Self {
        Self {
            kind,
            subtype,
            ci,
            cj,
            flags: 0,
            skip: true,
            weight: 0.0,
            rank: 0,
            wait: AtomicU32::new(0),
            unlocks: Vec::new(),
        }
    }

    pub fn wait_count(&self) -> u32 {
        self.wait.load(Ordering::Acquire)
    }

    pub fn add_dependency(&self) {
        self.wait.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements `wait`; returns `true` if this call brought it to zero
    /// (i.e. the task is now runnable).
    pub fn resolve_one_dependency(&self) -> bool {
        self.wait.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub fn reset_for_step(&mut self, predecessor_count: u32) {
        self.skip = true;
        *self.wait.get_mut() = predecessor_count;
    }

    /// Approximate cost estimate used for weighting (spec §4.2 step 8):
    /// proportional to `n*n` for self/pair density-family tasks, `n` for
    /// per-particle loops, a fixed byte-size proxy for communication.
    pub fn cost_estimate(&self, n_ci: u32, n_cj: u32) -> f64 {
        match self.kind {
            TaskKind::SelfTask | TaskKind::SubSelf => (n_ci as f64) * (n_ci as f64),
            TaskKind::Pair | TaskKind::SubPair => (n_ci as f64) * (n_cj as f64),
            TaskKind::Send | TaskKind::Recv => (n_ci.max(1) as f64) * 32.0,
            TaskKind::Sort => (n_ci as f64) * (n_ci as f64).log2().max(1.0),
            _ => n_ci as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_one_dependency_reports_transition_to_zero() {
        let t = Task::new(TaskKind::SelfTask, TaskSubtype::Density, CellIndex(0), None);
        t.add_dependency();
        t.add_dependency();
        assert!(!t.resolve_one_dependency());
        assert!(t.resolve_one_dependency());
    }

    #[test]
    fn cost_estimate_is_quadratic_for_self_tasks() {
        let t = Task::new(TaskKind::SelfTask, TaskSubtype::Density, CellIndex(0), None);
        assert_eq!(t.cost_estimate(10, 0), 100.0);
    }
}
