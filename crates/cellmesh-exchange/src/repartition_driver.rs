//! The repartition driver (spec §4.6, component C8): watches per-node CPU
//! time dispersion, and when it crosses the configured threshold, calls the
//! repartitioner, redistributes cells exactly like a global stray pass, and
//! forces a graph rebuild.

use std::collections::HashMap;

use cellmesh_physics::{CellWeight, NodeAssignment, RepartitionContext, RepartitionKind, Repartitioner};
use cellmesh_space::Space;
use cellmesh_types::NodeId;

use crate::error::{ExchangeError, ExchangeResult, RepartitionError};
use crate::strays::{collect_strays, StrayBatch};

/// `(max - min) / min > ft` (spec §4.6 "the dispersion of elapsed CPU time
/// across nodes exceeds a fractional threshold").
pub fn imbalance_exceeds_threshold(cpu_time_per_node: &[f64], threshold: f64) -> bool {
    if cpu_time_per_node.len() < 2 {
        return false;
    }
    let max = cpu_time_per_node.iter().cloned().fold(f64::MIN, f64::max);
    let min = cpu_time_per_node.iter().cloned().fold(f64::MAX, f64::min);
    if min <= 0.0 {
        return max > 0.0;
    }
    (max - min) / min > threshold
}

/// Turns a `NodeAssignment` (one entry per `weights` row, same order) back
/// into the tag-keyed map `strays::collect_strays` expects.
fn assignment_to_tag_map(
    weights: &[CellWeight],
    assignment: &NodeAssignment,
    space: &Space,
) -> ExchangeResult<HashMap<u32, NodeId>> {
    if assignment.node_of.len() != weights.len() {
        return Err(ExchangeError::Repartition(RepartitionError::MappingSizeMismatch {
            expected: weights.len(),
            got: assignment.node_of.len(),
        }));
    }
    Ok(weights
        .iter()
        .zip(assignment.node_of.iter())
        .map(|(w, &node)| (space.cells[w.cell.as_usize()].tag, node))
        .collect())
}

/// Runs one repartition pass: asks `repartitioner` for a new mapping given
/// `weights`, then performs the equivalent of a global stray pass against
/// that mapping (spec §4.6 "invokes a full redistribution (equivalent to
/// the stray protocol but global)"). Returns the outgoing batches; the
/// caller is responsible for exchanging them with peers, absorbing what
/// comes back (`strays::absorb_strays`), and then forcing a graph rebuild.
pub fn run_repartition(
    space: &mut Space,
    weights: &[CellWeight],
    repartitioner: &dyn Repartitioner,
    nr_nodes: u32,
) -> ExchangeResult<HashMap<NodeId, StrayBatch>> {
    let ctx = RepartitionContext {
        kind: RepartitionKind::Periodic,
        my_node: space.node_id,
        nr_nodes,
        weights,
    };
    let assignment = repartitioner.repartition(&ctx);
    let tag_map = assignment_to_tag_map(weights, &assignment, space)?;
    collect_strays(space, &tag_map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellmesh_physics::{GreedyBalanceRepartitioner, StationaryRepartitioner};
    use cellmesh_space::Boundary;
    use cellmesh_types::{Part, Vec3, XPart};

    #[test]
    fn threshold_trips_only_once_dispersion_exceeds_it() {
        assert!(!imbalance_exceeds_threshold(&[10.0, 10.5], 0.1));
        assert!(imbalance_exceeds_threshold(&[10.0, 15.0], 0.1));
    }

    #[test]
    fn single_node_is_never_imbalanced() {
        assert!(!imbalance_exceeds_threshold(&[42.0], 0.1));
    }

    #[test]
    fn stationary_repartitioner_moves_nothing() {
        let mut space = Space::new(Vec3::new(1.0, 1.0, 1.0), Boundary::Periodic, NodeId(0), 2);
        space.target_leaf_count = 8;
        space.parts = vec![Part::new_at(0, Vec3::new(0.5, 0.5, 0.5), 0.05)];
        space.xparts = vec![XPart::default()];
        space.rebuild().unwrap();

        let weights: Vec<CellWeight> = space
            .top_cells()
            .iter()
            .map(|&idx| CellWeight { cell: idx, current_node: NodeId(0), weight: 1.0 })
            .collect();

        let batches = run_repartition(&mut space, &weights, &StationaryRepartitioner, 2).unwrap();
        assert!(batches.is_empty());
    }

    #[test]
    fn greedy_repartitioner_can_move_a_cell_off_node() {
        let mut space = Space::new(Vec3::new(1.0, 1.0, 1.0), Boundary::Periodic, NodeId(0), 2);
        space.target_leaf_count = 1;
        space.parts = vec![
            Part::new_at(0, Vec3::new(0.1, 0.5, 0.5), 0.05),
            Part::new_at(1, Vec3::new(0.9, 0.5, 0.5), 0.05),
        ];
        space.xparts = vec![XPart::default(); 2];
        space.rebuild().unwrap();

        let weights: Vec<CellWeight> = space
            .top_cells()
            .iter()
            .enumerate()
            .map(|(i, &idx)| CellWeight { cell: idx, current_node: NodeId(0), weight: (i + 1) as f64 * 10.0 })
            .collect();

        let before = space.parts.len();
        let batches = run_repartition(&mut space, &weights, &GreedyBalanceRepartitioner, 2).unwrap();
        let moved: usize = batches.values().map(|b| b.parts.len()).sum();
        assert_eq!(space.parts.len() + moved, before);
        assert_eq!(space.xparts.len(), space.parts.len());
    }
}
