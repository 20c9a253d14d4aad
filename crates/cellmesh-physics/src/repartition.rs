//! The repartitioner contract (spec §4.6, §6 "Repartitioner contract").
//!
//! The core treats the graph-partitioner as a black box (spec §1): it hands
//! over a per-cell weight matrix and the current node assignment, and gets
//! back a new assignment. `cellmesh-exchange` drives this trait; it never
//! inspects what's inside an implementation.

use cellmesh_types::{CellIndex, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepartitionKind {
    /// Triggered by the imbalance check of spec §4.6.
    Periodic,
    /// Forced at startup / after a topology change.
    Initial,
}

/// One row of the task-weight matrix the core hands to the partitioner
/// (spec §4.2 step 8 "weight"): the accumulated scheduling weight of all
/// tasks touching `cell`, and which node currently owns it.
#[derive(Debug, Clone, Copy)]
pub struct CellWeight {
    pub cell: CellIndex,
    pub current_node: NodeId,
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct RepartitionContext<'a> {
    pub kind: RepartitionKind,
    pub my_node: NodeId,
    pub nr_nodes: u32,
    pub weights: &'a [CellWeight],
}

/// A new cell -> node mapping, one entry per cell in the same order as the
/// `weights` slice the context was built from.
#[derive(Debug, Clone)]
pub struct NodeAssignment {
    pub node_of: Vec<NodeId>,
}

pub trait Repartitioner: Send + Sync {
    fn repartition(&self, ctx: &RepartitionContext<'_>) -> NodeAssignment;
}

/// A repartitioner that never moves a cell; useful as a no-op default and
/// for single-node deployments where `nr_nodes == 1`.
pub struct StationaryRepartitioner;

impl Repartitioner for StationaryRepartitioner {
    fn repartition(&self, ctx: &RepartitionContext<'_>) -> NodeAssignment {
        NodeAssignment {
            node_of: ctx.weights.iter().map(|w| w.current_node).collect(),
        }
    }
}

/// A deterministic greedy-balance repartitioner: sorts cells by weight
/// descending and assigns each to the currently lightest node. Useful as a
/// test double that actually redistributes load, unlike
/// `StationaryRepartitioner`.
pub struct GreedyBalanceRepartitioner;

impl Repartitioner for GreedyBalanceRepartitioner {
    fn repartition(&self, ctx: &RepartitionContext<'_>) -> NodeAssignment {
        let nr_nodes = ctx.nr_nodes.max(1) as usize;
        let mut load = vec![0.0_f64; nr_nodes];
        let mut order: Vec<usize> = (0..ctx.weights.len()).collect();
        order.sort_by(|&a, &b| {
            ctx.weights[b]
                .weight
                .partial_cmp(&ctx.weights[a].weight)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut node_of = vec![NodeId(0); ctx.weights.len()];
        for idx in order {
            let (lightest, _) = load
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .expect("nr_nodes >= 1");
            node_of[idx] = NodeId(lightest as u32);
            load[lightest] += ctx.weights[idx].weight;
        }
        NodeAssignment { node_of }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(n: usize) -> Vec<CellWeight> {
        (0..n)
            .map(|i| CellWeight {
                cell: CellIndex::from_usize(i),
                current_node: NodeId(0),
                weight: (i + 1) as f64,
            })
            .collect()
    }

    #[test]
    fn stationary_never_moves_cells() {
        let w = weights(5);
        let ctx = RepartitionContext {
            kind: RepartitionKind::Periodic,
            my_node: NodeId(0),
            nr_nodes: 3,
            weights: &w,
        };
        let assignment = StationaryRepartitioner.repartition(&ctx);
        assert!(assignment.node_of.iter().all(|n| *n == NodeId(0)));
    }

    #[test]
    fn greedy_balances_across_nodes() {
        let w = weights(9);
        let ctx = RepartitionContext {
            kind: RepartitionKind::Periodic,
            my_node: NodeId(0),
            nr_nodes: 3,
            weights: &w,
        };
        let assignment = GreedyBalanceRepartitioner.repartition(&ctx);
        let mut load = [0.0_f64; 3];
        for (i, node) in assignment.node_of.iter().enumerate() {
            load[node.0 as usize] += w[i].weight;
        }
        let max = load.iter().cloned().fold(f64::MIN, f64::max);
        let min = load.iter().cloned().fold(f64::MAX, f64::min);
        assert!((max - min) / max <= 0.5);
    }
}
