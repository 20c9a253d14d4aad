//! `cell_sort` (spec §4.1): per-axis projection sort along the 13 canonical
//! inter-cell axes, stable across ties, children sorted first and merged
//! into the parent.

use cellmesh_types::{AxisMask, Cell, CellIndex, NUM_SORT_AXES};

use crate::tree::Space;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SortEntry {
    /// Index into the cell's local `parts` slice (0-based, not a global
    /// array index), so a sort result stays valid independent of where the
    /// cell's slice currently sits in the global array.
    pub local_index: u32,
    pub r: f64,
}

/// Per-cell, per-axis sorted projection buffers (spec §3 `sort`).
#[derive(Debug, Clone, Default)]
pub struct SortCache {
    per_cell: Vec<[Vec<SortEntry>; NUM_SORT_AXES]>,
}

impl SortCache {
    pub fn new(nr_cells: usize) -> Self {
        Self {
            per_cell: (0..nr_cells).map(|_| std::array::from_fn(|_| Vec::new())).collect(),
        }
    }

    pub fn resize(&mut self, nr_cells: usize) {
        while self.per_cell.len() < nr_cells {
            self.per_cell.push(std::array::from_fn(|_| Vec::new()));
        }
    }

    pub fn entries(&self, cell: CellIndex, axis: usize) -> &[SortEntry] {
        &self.per_cell[cell.as_usize()][axis]
    }

    fn set(&mut self, cell: CellIndex, axis: usize, entries: Vec<SortEntry>) {
        self.per_cell[cell.as_usize()][axis] = entries;
    }
}

fn project(cell: &Cell, parts_x: &[cellmesh_types::Vec3], axis: usize) -> Vec<SortEntry> {
    let axis_vec = cellmesh_types::cell::axis_vector(axis);
    let mut entries: Vec<SortEntry> = parts_x
        .iter()
        .enumerate()
        .map(|(local_index, &x)| SortEntry {
            local_index: local_index as u32,
            r: x.sub(cell.loc).dot(axis_vec),
        })
        .collect();
    // stable_sort_by_key / partial_cmp is stable for ties on `r` (spec
    // §8 property 3), matching Rust's `sort_by` guarantee.
    entries.sort_by(|a, b| a.r.partial_cmp(&b.r).unwrap_or(std::cmp::Ordering::Equal));
    entries
}

fn merge(a: &[SortEntry], b: &[SortEntry], offset_b: u32) -> Vec<SortEntry> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i].r <= b[j].r {
            out.push(a[i]);
            i += 1;
        } else {
            out.push(SortEntry {
                local_index: b[j].local_index + offset_b,
                r: b[j].r,
            });
            j += 1;
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend(b[j..].iter().map(|e| SortEntry {
        local_index: e.local_index + offset_b,
        r: e.r,
    }));
    out
}

impl Space {
    /// `cell_sort(cell, axis_mask)`: sorts every axis set in `axis_mask`
    /// that the cell isn't already sorted along. Recurses into children
    /// first, merging their (already local-index-relative) results.
    pub fn cell_sort(&mut self, cell_index: CellIndex, axis_mask: AxisMask) {
        let already = self.cells[cell_index.as_usize()].sorted;
        let missing = already.missing(axis_mask);
        if missing.0 == 0 {
            return;
        }

        let split = self.cells[cell_index.as_usize()].split;
        let progeny = self.cells[cell_index.as_usize()].progeny;

        if split {
            for child in progeny.into_iter().flatten() {
                self.cell_sort(child, missing);
            }
        }

        for axis in 0..NUM_SORT_AXES {
            if !missing.has(axis) {
                continue;
            }
            let entries = if split {
                self.merge_children_sorted(cell_index, progeny, axis)
            } else {
                let cell = &self.cells[cell_index.as_usize()];
                let xs: Vec<_> = self.parts[cell.parts.range()].iter().map(|p| p.x).collect();
                project(cell, &xs, axis)
            };
            self.sort_cache.set(cell_index, axis, entries);
            self.cells[cell_index.as_usize()].sorted.set(axis);
        }

        // A fresh sort resets the clock on "displacement since last sort";
        // `cell_drift` starts accumulating into it again from here.
        self.cells[cell_index.as_usize()].dx_max_sort = 0.0;
    }

    fn merge_children_sorted(
        &self,
        parent: CellIndex,
        progeny: [Option<CellIndex>; 8],
        axis: usize,
    ) -> Vec<SortEntry> {
        let parent_offset = self.cells[parent.as_usize()].parts.offset;
        let mut acc: Vec<SortEntry> = Vec::new();
        for child in progeny.into_iter().flatten() {
            let child_offset = self.cells[child.as_usize()].parts.offset - parent_offset;
            let child_entries = self.sort_cache.entries(child, axis);
            if acc.is_empty() {
                acc = child_entries
                    .iter()
                    .map(|e| SortEntry {
                        local_index: e.local_index + child_offset,
                        r: e.r,
                    })
                    .collect();
            } else {
                acc = merge(&acc, child_entries, child_offset);
            }
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellmesh_types::Vec3;

    #[test]
    fn sort_is_idempotent_and_stable() {
        let mut space = Space::unit_test_space(vec![
            Vec3::new(0.9, 0.1, 0.1),
            Vec3::new(0.1, 0.1, 0.1),
            Vec3::new(0.5, 0.1, 0.1),
            Vec3::new(0.1, 0.1, 0.1), // tie with index 1
        ]);
        let root = CellIndex(0);
        space.cell_sort(root, AxisMask(1 << 0));
        let first = space.sort_cache.entries(root, 0).to_vec();
        space.cell_sort(root, AxisMask(1 << 0));
        let second = space.sort_cache.entries(root, 0).to_vec();
        assert_eq!(first, second);

        // ties broken by original order: local index 1 before 3.
        let tie_positions: Vec<u32> = first
            .iter()
            .filter(|e| e.local_index == 1 || e.local_index == 3)
            .map(|e| e.local_index)
            .collect();
        assert_eq!(tie_positions, vec![1, 3]);
    }

    #[test]
    fn sorting_subset_then_union_matches_union_alone() {
        let mut a = Space::unit_test_space(vec![
            Vec3::new(0.7, 0.0, 0.0),
            Vec3::new(0.2, 0.0, 0.0),
            Vec3::new(0.4, 0.0, 0.0),
        ]);
        let mut b = Space::unit_test_space(vec![
            Vec3::new(0.7, 0.0, 0.0),
            Vec3::new(0.2, 0.0, 0.0),
            Vec3::new(0.4, 0.0, 0.0),
        ]);
        let root = CellIndex(0);
        a.cell_sort(root, AxisMask(0b11));
        b.cell_sort(root, AxisMask(0b1));
        b.cell_sort(root, AxisMask(0b11));
        assert_eq!(a.sort_cache.entries(root, 0), b.sort_cache.entries(root, 0));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arbitrary_positions(max_n: usize) -> impl Strategy<Value = Vec<cellmesh_types::Vec3>> {
        proptest::collection::vec(
            (0.0f64..1.0, 0.0f64..1.0, 0.0f64..1.0)
                .prop_map(|(x, y, z)| cellmesh_types::Vec3::new(x, y, z)),
            1..max_n,
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Sort stability (spec §8 property 3): sorting twice is a no-op,
        /// and sorting `ax1` then `ax1 | ax2` reproduces `ax1`'s own result
        /// from a single combined call, for arbitrary particle clouds.
        #[test]
        fn sort_is_stable_and_idempotent_for_arbitrary_clouds(positions in arbitrary_positions(30)) {
            let root = CellIndex(0);

            let mut once = Space::unit_test_space(positions.clone());
            once.cell_sort(root, AxisMask(0b11));
            let once_entries = once.sort_cache.entries(root, 0).to_vec();

            let mut twice = Space::unit_test_space(positions.clone());
            twice.cell_sort(root, AxisMask(0b11));
            twice.cell_sort(root, AxisMask(0b11));
            prop_assert_eq!(once_entries.clone(), twice.sort_cache.entries(root, 0).to_vec());

            let mut staged = Space::unit_test_space(positions);
            staged.cell_sort(root, AxisMask(0b1));
            staged.cell_sort(root, AxisMask(0b11));
            prop_assert_eq!(once_entries, staged.sort_cache.entries(root, 0).to_vec());
        }
    }
}
