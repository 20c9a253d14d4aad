//! `Space`: owns the particle arrays and assembles them into a cell tree
//! (spec §4.1 `space_rebuild`).

use cellmesh_types::{Cell, CellIndex, GPart, NodeId, Part, ParticleKind, SPart, Vec3, XPart};

use crate::error::SpaceError;
use crate::geometry::{choose_cdim, wrap, Boundary};
use crate::permutation::{
    apply_gparts_permutation, apply_parts_permutation, apply_sparts_permutation, check_linkage,
    histogram, stable_bucket_permutation,
};
use crate::sort::SortCache;

/// Particle arrays plus the cell tree built over them.
///
/// Field naming follows spec §3: `parts`/`xparts` are gas, `gparts` are
/// gravity (dark matter, and the gravity half of every gas/star particle),
/// `sparts` are stars.
pub struct Space {
    pub parts: Vec<Part>,
    pub xparts: Vec<XPart>,
    pub gparts: Vec<GPart>,
    pub sparts: Vec<SPart>,

    pub cells: Vec<Cell>,
    pub sort_cache: SortCache,

    pub box_size: Vec3,
    pub boundary: Boundary,
    pub cdim: [usize; 3],

    pub node_id: NodeId,
    pub nr_nodes: u32,

    /// Rebuild aims for at most this many particles per leaf cell (spec
    /// §4.1 "until each leaf holds no more than a target particle count").
    pub target_leaf_count: usize,
    /// Safety factor applied to `h_max` when choosing the top grid (spec
    /// §4.1 `choose_cdim`).
    pub top_grid_safety_factor: f64,
    /// Spec §4.1 rebuild-trigger parameter ("relative displacement
    /// tolerance before the tree is considered stale").
    pub max_reldx: f64,

    /// Arena indices of the top-grid cells, in `top_cell_id` order. Needed
    /// because child cells are interleaved into `cells` as they're built,
    /// so the top cells are not simply `cells[0..nr_top]`.
    top_cell_indices: Vec<CellIndex>,

    next_tag: u32,
}

const MAX_OCTREE_DEPTH: u32 = 24;

impl Space {
    pub fn new(box_size: Vec3, boundary: Boundary, node_id: NodeId, nr_nodes: u32) -> Self {
        Self {
            parts: Vec::new(),
            xparts: Vec::new(),
            gparts: Vec::new(),
            sparts: Vec::new(),
            cells: Vec::new(),
            sort_cache: SortCache::default(),
            box_size,
            boundary,
            cdim: [1, 1, 1],
            node_id,
            nr_nodes,
            target_leaf_count: 64,
            top_grid_safety_factor: 1.5,
            max_reldx: 0.1,
            top_cell_indices: Vec::new(),
            next_tag: 0,
        }
    }

    /// Builds a single-top-cell `Space` covering `[0, 1)^3` with the given
    /// gas particle positions, for use in crate-local unit tests that only
    /// exercise per-cell operations (`cell_sort`, `cell_drift`).
    #[doc(hidden)]
    pub fn unit_test_space(positions: Vec<Vec3>) -> Self {
        let n = positions.len();
        let mut space = Space::new(Vec3::new(1.0, 1.0, 1.0), Boundary::Periodic, NodeId(0), 1);
        space.parts = positions
            .into_iter()
            .enumerate()
            .map(|(i, x)| Part::new_at(i as u64, x, 0.1))
            .collect();
        space.xparts = vec![XPart::default(); n];
        let mut root = Cell::leaf(Vec3::ZERO, Vec3::new(1.0, 1.0, 1.0), NodeId(0), 0);
        root.count = n as u32;
        root.parts = cellmesh_types::SliceView { offset: 0, len: n as u32 };
        space.cells = vec![root];
        space.cdim = [1, 1, 1];
        space.top_cell_indices = vec![CellIndex(0)];
        space.sort_cache = SortCache::new(1);
        space
    }

    fn fresh_tag(&mut self) -> u32 {
        let t = self.next_tag;
        self.next_tag += 1;
        t
    }

    /// Top-grid cell indices in `top_cell_id` order, for callers (the task
    /// graph builder, the exchange layer) that need to walk the top grid
    /// without knowing how children are interleaved into `cells`.
    pub fn top_cells(&self) -> &[CellIndex] {
        &self.top_cell_indices
    }

    /// All leaf cell indices, in no particular order beyond arena order.
    pub fn leaves(&self) -> Vec<CellIndex> {
        self.leaf_indices()
    }

    fn h_max(&self) -> f64 {
        self.parts
            .iter()
            .map(|p| p.h)
            .fold(0.0f64, f64::max)
            .max(1e-6)
    }

    /// Points used purely to decide tree shape: every gas and star particle,
    /// plus every dark-matter gravity particle. Gas/star gravity partners
    /// are skipped here since their position already appears via `parts`/
    /// `sparts` (spec §9: gravity and hydro never disagree on a particle's
    /// position).
    fn geometry_points(&self) -> Vec<Vec3> {
        let mut pts: Vec<Vec3> = self.parts.iter().map(|p| p.x).collect();
        pts.extend(self.sparts.iter().map(|s| s.x));
        pts.extend(
            self.gparts
                .iter()
                .filter(|g| g.kind == ParticleKind::Dm)
                .map(|g| g.x),
        );
        pts
    }

    /// `space_rebuild` (spec §4.1): recomputes the top grid, wraps
    /// particles, rebuilds the cell tree down to `target_leaf_count`, and
    /// reorders every particle array so each leaf's slice is contiguous.
    pub fn rebuild(&mut self) -> Result<(), SpaceError> {
        self.wrap_all();

        let h_max = self.h_max();
        self.cdim = choose_cdim(self.box_size, h_max, self.top_grid_safety_factor);

        let mut cells = Vec::new();
        let top_widths = Vec3::new(
            self.box_size.x / self.cdim[0] as f64,
            self.box_size.y / self.cdim[1] as f64,
            self.box_size.z / self.cdim[2] as f64,
        );

        let geometry = self.geometry_points();
        let mut top_cell_indices = Vec::with_capacity(self.cdim[0] * self.cdim[1] * self.cdim[2]);
        for i in 0..self.cdim[0] {
            for j in 0..self.cdim[1] {
                for k in 0..self.cdim[2] {
                    let loc = Vec3::new(
                        i as f64 * top_widths.x,
                        j as f64 * top_widths.y,
                        k as f64 * top_widths.z,
                    );
                    let tag = self.fresh_tag();
                    let top_index = CellIndex::from_usize(cells.len());
                    let mut cell = Cell::leaf(loc, top_widths, self.node_id, tag);
                    cell.super_cell = top_index;
                    let point_idx: Vec<usize> = (0..geometry.len())
                        .filter(|&p| cell.contains(geometry[p]))
                        .collect();
                    cells.push(cell);
                    top_cell_indices.push(top_index);
                    self.split_node(&mut cells, top_index, top_index, &geometry, point_idx, 0);
                }
            }
        }
        self.cells = cells;
        self.top_cell_indices = top_cell_indices;

        self.assign_slices()?;
        check_linkage(&self.parts, &self.sparts, &self.gparts)
            .map_err(SpaceError::Rebuild)?;

        self.sort_cache = SortCache::new(self.cells.len());
        Ok(())
    }

    fn wrap_all(&mut self) {
        for p in &mut self.parts {
            p.x = wrap(p.x, self.box_size, self.boundary);
        }
        for g in &mut self.gparts {
            g.x = wrap(g.x, self.box_size, self.boundary);
        }
        for s in &mut self.sparts {
            s.x = wrap(s.x, self.box_size, self.boundary);
        }
    }

    /// Recursively splits `node` into 8 octants while its point count
    /// exceeds `target_leaf_count` and the depth cap hasn't been hit.
    /// `super_cell` is propagated unchanged to every descendant: it must
    /// point at the nearest ancestor that owns hierarchical tasks, which
    /// today is always the top cell (see DESIGN.md "task graph").
    fn split_node(
        &self,
        cells: &mut Vec<Cell>,
        node: CellIndex,
        super_cell: CellIndex,
        geometry: &[Vec3],
        point_idx: Vec<usize>,
        depth: u32,
    ) {
        cells[node.as_usize()].count = point_idx.len() as u32;
        if point_idx.len() <= self.target_leaf_count || depth >= MAX_OCTREE_DEPTH {
            return;
        }

        let loc = cells[node.as_usize()].loc;
        let width = cells[node.as_usize()].width;
        let half = Vec3::new(width.x / 2.0, width.y / 2.0, width.z / 2.0);

        let mut progeny = [None; 8];
        let mut octant_idx = 0usize;
        for oi in 0..2 {
            for oj in 0..2 {
                for ok in 0..2 {
                    let child_loc = Vec3::new(
                        loc.x + oi as f64 * half.x,
                        loc.y + oj as f64 * half.y,
                        loc.z + ok as f64 * half.z,
                    );
                    let child_index = CellIndex::from_usize(cells.len());
                    let node_id = cells[node.as_usize()].node_id;
                    let mut child = Cell::leaf(child_loc, half, node_id, 0);
                    child.parent = Some(node);
                    child.super_cell = super_cell;
                    let child_points: Vec<usize> = point_idx
                        .iter()
                        .copied()
                        .filter(|&p| child.contains(geometry[p]))
                        .collect();
                    cells.push(child);
                    progeny[octant_idx] = Some(child_index);
                    octant_idx += 1;
                    self.split_node(cells, child_index, super_cell, geometry, child_points, depth + 1);
                }
            }
        }
        cells[node.as_usize()].split = true;
        cells[node.as_usize()].progeny = progeny;
    }

    fn leaf_indices(&self) -> Vec<CellIndex> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.split)
            .map(|(i, _)| CellIndex::from_usize(i))
            .collect()
    }

    /// Descends from the root of whichever top cell contains `x` down to the
    /// leaf that owns it.
    fn locate_leaf(&self, top_roots: &[CellIndex], x: Vec3) -> Option<CellIndex> {
        let mut current = *top_roots.iter().find(|&&r| self.cells[r.as_usize()].contains(x))?;
        loop {
            let cell = &self.cells[current.as_usize()];
            if !cell.split {
                return Some(current);
            }
            let next = cell
                .progeny
                .iter()
                .flatten()
                .find(|&&child| self.cells[child.as_usize()].contains(x));
            match next {
                Some(&child) => current = child,
                None => return Some(current),
            }
        }
    }

    /// Buckets `parts`/`sparts`/`gparts` into the now-fixed leaf layout,
    /// permutes each array into leaf-contiguous order, restores linkage, and
    /// assigns each leaf cell's `SliceView`s.
    fn assign_slices(&mut self) -> Result<(), SpaceError> {
        let top_roots = self.top_cell_indices.clone();
        let leaves = self.leaf_indices();
        let leaf_rank: std::collections::HashMap<CellIndex, u32> = leaves
            .iter()
            .enumerate()
            .map(|(rank, &c)| (c, rank as u32))
            .collect();
        let nr_leaves = leaves.len();

        let dest_for = |positions: &[Vec3], space: &Space| -> Result<Vec<u32>, SpaceError> {
            positions
                .iter()
                .map(|&x| {
                    space
                        .locate_leaf(&top_roots, x)
                        .and_then(|c| leaf_rank.get(&c).copied())
                        .ok_or_else(|| SpaceError::Rebuild(format!("particle at {x:?} outside domain")))
                })
                .collect()
        };

        let parts_x: Vec<Vec3> = self.parts.iter().map(|p| p.x).collect();
        let sparts_x: Vec<Vec3> = self.sparts.iter().map(|s| s.x).collect();
        let gparts_x: Vec<Vec3> = self.gparts.iter().map(|g| g.x).collect();

        let parts_dest = dest_for(&parts_x, self)?;
        let sparts_dest = dest_for(&sparts_x, self)?;
        let gparts_dest = dest_for(&gparts_x, self)?;

        let parts_perm = stable_bucket_permutation(&parts_dest);
        let sparts_perm = stable_bucket_permutation(&sparts_dest);
        let gparts_perm = stable_bucket_permutation(&gparts_dest);

        apply_gparts_permutation(&mut self.gparts, &mut self.parts, &mut self.sparts, &gparts_perm);
        apply_parts_permutation(&mut self.parts, &mut self.xparts, &mut self.gparts, &parts_perm);
        apply_sparts_permutation(&mut self.sparts, &mut self.gparts, &sparts_perm);

        let parts_hist = histogram(&parts_dest, nr_leaves);
        let sparts_hist = histogram(&sparts_dest, nr_leaves);
        let gparts_hist = histogram(&gparts_dest, nr_leaves);

        let mut parts_offset = 0u32;
        let mut sparts_offset = 0u32;
        let mut gparts_offset = 0u32;
        for (rank, &leaf) in leaves.iter().enumerate() {
            let pc = parts_hist[rank];
            let sc = sparts_hist[rank];
            let gc = gparts_hist[rank];
            let cell = &mut self.cells[leaf.as_usize()];
            cell.parts = cellmesh_types::SliceView { offset: parts_offset, len: pc };
            cell.sparts = cellmesh_types::SliceView { offset: sparts_offset, len: sc };
            cell.gparts = cellmesh_types::SliceView { offset: gparts_offset, len: gc };
            cell.count = pc;
            cell.scount = sc;
            cell.gcount = gc;
            parts_offset += pc;
            sparts_offset += sc;
            gparts_offset += gc;
        }

        // Non-leaf ancestors report the sum over their descendants so code
        // that only ever inspects `super`/top cells still sees true totals.
        self.roll_up_counts();
        self.assign_leaf_h_max();
        self.roll_up_h_max();

        Ok(())
    }

    /// Sets each leaf's `h_max` to the largest gas smoothing length among
    /// the particles its slice now owns (spec §3 "worst-case smoothing
    /// length"). Must run after leaf `parts` slices are assigned.
    fn assign_leaf_h_max(&mut self) {
        for leaf in self.leaf_indices() {
            let range = self.cells[leaf.as_usize()].parts.range();
            let h_max = self.parts[range].iter().map(|p| p.h).fold(0.0f64, f64::max);
            self.cells[leaf.as_usize()].h_max = h_max;
        }
    }

    /// Non-leaf ancestors report the max over their descendants, the same
    /// rollup shape `roll_up_counts` uses for particle counts.
    fn roll_up_h_max(&mut self) {
        fn rec(cells: &mut [Cell], idx: CellIndex) -> f64 {
            let (split, progeny) = {
                let c = &cells[idx.as_usize()];
                (c.split, c.progeny)
            };
            if !split {
                return cells[idx.as_usize()].h_max;
            }
            let mut h_max = 0.0f64;
            for child in progeny.into_iter().flatten() {
                h_max = h_max.max(rec(cells, child));
            }
            cells[idx.as_usize()].h_max = h_max;
            h_max
        }
        for &top in &self.top_cell_indices.clone() {
            rec(&mut self.cells, top);
        }
    }

    fn roll_up_counts(&mut self) {
        fn rec(cells: &mut [Cell], idx: CellIndex) -> (u32, u32, u32) {
            let (split, progeny) = {
                let c = &cells[idx.as_usize()];
                (c.split, c.progeny)
            };
            if !split {
                let c = &cells[idx.as_usize()];
                return (c.count, c.gcount, c.scount);
            }
            let mut totals = (0u32, 0u32, 0u32);
            for child in progeny.into_iter().flatten() {
                let (c, g, s) = rec(cells, child);
                totals.0 += c;
                totals.1 += g;
                totals.2 += s;
            }
            let cell = &mut cells[idx.as_usize()];
            cell.count = totals.0;
            cell.gcount = totals.1;
            cell.scount = totals.2;
            totals
        }
        for &top in &self.top_cell_indices.clone() {
            rec(&mut self.cells, top);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_space(n_per_axis: usize) -> Space {
        let mut space = Space::new(Vec3::new(1.0, 1.0, 1.0), Boundary::Periodic, NodeId(0), 1);
        space.target_leaf_count = 4;
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
                    parts.push(Part::new_at(id, x, 0.02));
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
    fn rebuild_conserves_total_particle_count() {
        let mut space = small_space(4);
        let total_before = space.parts.len();
        space.rebuild().unwrap();
        let total_after: u32 = space
            .cells
            .iter()
            .filter(|c| !c.split)
            .map(|c| c.parts.len)
            .sum();
        assert_eq!(total_after as usize, total_before);
        assert_eq!(space.parts.len(), total_before);
    }

    #[test]
    fn rebuild_splits_overfull_top_cells() {
        let mut space = small_space(5); // 125 particles, target 4 per leaf
        space.rebuild().unwrap();
        let leaves: Vec<_> = space.cells.iter().filter(|c| !c.split).collect();
        assert!(leaves.len() > space.cdim[0] * space.cdim[1] * space.cdim[2]);
        for leaf in &leaves {
            assert!(leaf.parts.len as usize <= space.target_leaf_count || leaf.width.x < 1e-6);
        }
    }

    #[test]
    fn every_leaf_slice_is_within_bounds_and_disjoint() {
        let mut space = small_space(4);
        space.rebuild().unwrap();
        let mut covered = vec![false; space.parts.len()];
        for cell in space.cells.iter().filter(|c| !c.split) {
            for idx in cell.parts.range() {
                assert!(!covered[idx], "particle {idx} covered by two leaves");
                covered[idx] = true;
            }
        }
        assert!(covered.into_iter().all(|c| c));
    }

    #[test]
    fn rebuild_preserves_gas_gravity_linkage() {
        let mut space = small_space(3);
        for (i, p) in space.parts.iter_mut().enumerate() {
            p.gpart = Some(i as u32);
        }
        space.gparts = space
            .parts
            .iter()
            .enumerate()
            .map(|(i, p)| GPart::for_gas(p.x, 1.0, i as u32))
            .collect();
        space.rebuild().unwrap();
        check_linkage(&space.parts, &space.sparts, &space.gparts).unwrap();
    }
}
