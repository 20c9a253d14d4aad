//! `cell_drift` and the rebuild-trigger predicate (spec §4.1).

use cellmesh_types::{Cell, CellIndex, Ti};

use crate::tree::Space;

/// Advances every particle in `cell`'s slice by `dt`, recursing into
/// children first so `dx_max_part` is always recomputed bottom-up.
/// Returns the cell's own maximum displacement this step.
pub fn cell_drift(space: &mut Space, cell_index: CellIndex, dt: f64) -> f64 {
    let split = space.cells[cell_index.as_usize()].split;
    let progeny = space.cells[cell_index.as_usize()].progeny;

    let mut dx_max = 0.0f64;
    if split {
        for child in progeny.into_iter().flatten() {
            let child_dx = cell_drift(space, child, dt);
            if child_dx > dx_max {
                dx_max = child_dx;
            }
        }
    } else {
        let range = space.cells[cell_index.as_usize()].parts.range();
        for p in &mut space.parts[range] {
            let step = p.v.scale(dt);
            p.x = p.x.add(step);
            let d = step.norm2().sqrt();
            if d > dx_max {
                dx_max = d;
            }
        }
    }

    let cell = &mut space.cells[cell_index.as_usize()];
    // Accumulate rather than overwrite: `drift_all` can run this more than
    // once between two `cell_sort`/rebuild passes, and both fields track
    // the worst displacement since their own last reset, not just this
    // call's (`dx_max_part` since the last rebuild, `dx_max_sort` since
    // the last `cell_sort`; `cell_sort` below zeroes the latter).
    cell.dx_max_part = cell.dx_max_part.max(dx_max);
    cell.dx_max_sort = cell.dx_max_sort.max(dx_max);
    // Drifting invalidates any axis the cell claimed to be sorted along,
    // since particle projections move (spec §4.1 `cell_sort` is only valid
    // until the next drift).
    cell.sorted = cellmesh_types::AxisMask::NONE;
    dx_max
}

/// Spec §4.1 rebuild trigger: a rebuild is required once the accumulated
/// maximum displacement since the last sort, combined with the maximum
/// smoothing length, could have closed the minimum inter-cell gap between
/// any two cells that were previously believed far enough apart to skip a
/// pair interaction.
pub fn needs_rebuild(cell: &Cell, other: &Cell, max_reldx: f64) -> bool {
    let dmin = cell.dmin(other);
    let closure = cell.dx_max_sort + other.dx_max_sort + cell.h_max.max(other.h_max) * max_reldx;
    closure >= dmin
}

/// Whether any local time-bin has reached `t_now`, used by the engine loop
/// to decide whether this step does useful work at all (spec §4.9).
pub fn any_cell_active(cells: &[Cell], t_now: Ti) -> bool {
    cells.iter().any(|c| !c.split && c.is_active(t_now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellmesh_types::{NodeId, Vec3};

    #[test]
    fn drift_moves_particles_by_velocity_times_dt() {
        let mut space = Space::unit_test_space(vec![Vec3::new(0.1, 0.1, 0.1)]);
        space.parts[0].v = Vec3::new(1.0, 0.0, 0.0);
        let root = cellmesh_types::CellIndex(0);
        let dx_max = cell_drift(&mut space, root, 0.1);
        assert!((space.parts[0].x.x - 0.2).abs() < 1e-12);
        assert!((dx_max - 0.1).abs() < 1e-12);
    }

    #[test]
    fn drift_clears_sorted_mask() {
        let mut space = Space::unit_test_space(vec![Vec3::new(0.1, 0.1, 0.1)]);
        space.cells[0].sorted = cellmesh_types::AxisMask::ALL;
        cell_drift(&mut space, cellmesh_types::CellIndex(0), 0.01);
        assert_eq!(space.cells[0].sorted, cellmesh_types::AxisMask::NONE);
    }

    #[test]
    fn rebuild_triggers_once_closure_reaches_gap() {
        let mut a = Cell::leaf(Vec3::ZERO, Vec3::new(1.0, 1.0, 1.0), NodeId(0), 0);
        let mut b = Cell::leaf(Vec3::new(2.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0), NodeId(0), 1);
        a.h_max = 0.1;
        b.h_max = 0.1;
        assert!(!needs_rebuild(&a, &b, 1.0));
        a.dx_max_sort = 0.6;
        b.dx_max_sort = 0.5;
        assert!(needs_rebuild(&a, &b, 1.0));
    }
}
