//! The cell (octree node) record (spec §3 `Cell`, §4.1).
//!
//! Per spec §9 "pointer-rich cell tree": `progeny`/`super` are arena indices
//! into the `Space`'s cell pool, not raw pointers. Particle slices are
//! (offset, len) views into the `Space`'s contiguous arrays rather than
//! pointers. Per-cell task slots and link-lists hold `TaskIndex`es owned by
//! the scheduler crate; this crate only stores the slots.

use serde::{Deserialize, Serialize};

use crate::index::{CellIndex, NodeId, TaskIndex};
use crate::particle::Vec3;
use crate::time::Ti;

/// One of the 13 canonical inter-cell axes (spec §4.1 `cell_sort`): the
/// unique relative offsets between adjacent cells in a 3-D grid, up to sign
/// (26 neighbours collapse to 13 axes since direction `d` and `-d` sort the
/// same pair in opposite order).
pub const NUM_SORT_AXES: usize = 13;

/// The 13 canonical axis directions, indexed `0..NUM_SORT_AXES`. Each is one
/// representative of the `{-1,0,1}^3 \ {0,0,0}` offsets modulo sign flip.
pub const SORT_AXES: [(i8, i8, i8); NUM_SORT_AXES] = [
    (1, 0, 0),
    (0, 1, 0),
    (0, 0, 1),
    (1, 1, 0),
    (1, -1, 0),
    (1, 0, 1),
    (1, 0, -1),
    (0, 1, 1),
    (0, 1, -1),
    (1, 1, 1),
    (1, 1, -1),
    (1, -1, 1),
    (1, -1, -1),
];

/// Bitmask over `NUM_SORT_AXES` bits: bit `k` set means the cell's particles
/// are currently sorted by projection onto `SORT_AXES[k]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AxisMask(pub u16);

impl AxisMask {
    pub const NONE: AxisMask = AxisMask(0);
    pub const ALL: AxisMask = AxisMask((1u16 << NUM_SORT_AXES) - 1);

    pub fn has(self, axis: usize) -> bool {
        debug_assert!(axis < NUM_SORT_AXES);
        self.0 & (1 << axis) != 0
    }

    pub fn set(&mut self, axis: usize) {
        debug_assert!(axis < NUM_SORT_AXES);
        self.0 |= 1 << axis;
    }

    pub fn clear(&mut self, axis: usize) {
        debug_assert!(axis < NUM_SORT_AXES);
        self.0 &= !(1 << axis);
    }

    pub fn union(self, other: AxisMask) -> AxisMask {
        AxisMask(self.0 | other.0)
    }

    pub fn missing(self, wanted: AxisMask) -> AxisMask {
        AxisMask(wanted.0 & !self.0)
    }
}

/// Axis direction as a unit-free projection vector, used by `cell_sort`.
pub fn axis_vector(axis: usize) -> Vec3 {
    let (dx, dy, dz) = SORT_AXES[axis];
    Vec3::new(dx as f64, dy as f64, dz as f64)
}

/// `cell_getid(cdim, i, j, k)` from spec §4.1.
pub fn top_cell_id(cdim: [usize; 3], i: usize, j: usize, k: usize) -> usize {
    i * cdim[1] * cdim[2] + j * cdim[2] + k
}

/// A contiguous slice view (offset + length) into one of `Space`'s owned
/// particle arrays. Never owns data; invalidated on rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SliceView {
    pub offset: u32,
    pub len: u32,
}

impl SliceView {
    pub fn range(self) -> std::ops::Range<usize> {
        self.offset as usize..(self.offset as usize + self.len as usize)
    }
}

/// Per-cell task slots that exist at most once per cell (spec §4.2 "Task
/// record" / §4.2.4 "Hierarchical per-cell tasks"). `None` until the graph
/// builder populates them for this cell's `super`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CellTaskSlots {
    pub drift: Option<TaskIndex>,
    pub sorts: Option<TaskIndex>,
    pub init: Option<TaskIndex>,
    pub ghost: Option<TaskIndex>,
    pub extra_ghost: Option<TaskIndex>,
    pub kick1: Option<TaskIndex>,
    pub kick2: Option<TaskIndex>,
    pub timestep: Option<TaskIndex>,
    pub cooling: Option<TaskIndex>,
    pub sourceterms: Option<TaskIndex>,
    /// Reserved: a symmetric "down" pass for the gravity recursion. Spec §9
    /// Open Question — the source never allocates this; we leave the hook
    /// but do not synthesize a task for it until gravity physics needs it.
    pub grav_down: Option<TaskIndex>,
}

/// Per-cell link-lists of multi-occurrence tasks (spec §3 "link-lists for
/// density, gradient, force, grav, send_*, recv_*"). Populated once at
/// graph-construction time, read-only during execution (spec §5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellTaskLinks {
    pub density: Vec<TaskIndex>,
    pub gradient: Vec<TaskIndex>,
    pub force: Vec<TaskIndex>,
    pub grav: Vec<TaskIndex>,
    pub send: Vec<TaskIndex>,
    pub recv: Vec<TaskIndex>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub loc: Vec3,
    pub width: Vec3,

    pub count: u32,
    pub gcount: u32,
    pub scount: u32,

    pub parts: SliceView,
    pub gparts: SliceView,
    pub sparts: SliceView,

    pub progeny: [Option<CellIndex>; 8],
    pub split: bool,
    pub super_cell: CellIndex,
    pub parent: Option<CellIndex>,

    pub h_max: f64,
    pub dx_max_part: f64,
    pub dx_max_sort: f64,

    pub sorted: AxisMask,

    pub ti_end_min: Ti,
    pub ti_end_max: Ti,
    pub ti_old_part: Ti,
    pub ti_sort: Ti,

    pub tasks: CellTaskSlots,
    pub links: CellTaskLinks,

    pub node_id: NodeId,
    /// Stable identifier used to name proxy/MPI-style messages (spec §3
    /// `tag`); dense and reused across rebuilds where possible (spec §4.1
    /// `space_rebuild` guarantee).
    pub tag: u32,

    pub updated: u32,
    pub g_updated: u32,
    pub s_updated: u32,
}

impl Cell {
    pub fn leaf(loc: Vec3, width: Vec3, node_id: NodeId, tag: u32) -> Self {
        Self {
            loc,
            width,
            count: 0,
            gcount: 0,
            scount: 0,
            parts: SliceView::default(),
            gparts: SliceView::default(),
            sparts: SliceView::default(),
            progeny: [None; 8],
            split: false,
            super_cell: CellIndex::INVALID,
            parent: None,
            h_max: 0.0,
            dx_max_part: 0.0,
            dx_max_sort: 0.0,
            sorted: AxisMask::NONE,
            ti_end_min: 0,
            ti_end_max: 0,
            ti_old_part: 0,
            ti_sort: 0,
            tasks: CellTaskSlots::default(),
            links: CellTaskLinks::default(),
            node_id,
            tag,
            updated: 0,
            g_updated: 0,
            s_updated: 0,
        }
    }

    /// Activity predicate (spec §4.1): a cell is active at `t_now` iff its
    /// earliest-ending particle has already reached `t_now`.
    pub fn is_active(&self, t_now: Ti) -> bool {
        self.ti_end_min <= t_now
    }

    pub fn is_local(&self, my_node: NodeId) -> bool {
        self.node_id == my_node
    }

    /// Whether this cell's position is strictly inside its own bounds —
    /// used by the partitioning-totality property (spec §8 property 1).
    pub fn contains(&self, x: Vec3) -> bool {
        x.x >= self.loc.x
            && x.x < self.loc.x + self.width.x
            && x.y >= self.loc.y
            && x.y < self.loc.y + self.width.y
            && x.z >= self.loc.z
            && x.z < self.loc.z + self.width.z
    }

    /// Minimum separation between this cell's and `other`'s bounding boxes
    /// (spec §4.1 rebuild trigger `dmin`), 0 if the boxes touch or overlap.
    pub fn dmin(&self, other: &Cell) -> f64 {
        let axis_gap = |a_lo: f64, a_hi: f64, b_lo: f64, b_hi: f64| -> f64 {
            if a_hi <= b_lo {
                b_lo - a_hi
            } else if b_hi <= a_lo {
                a_lo - b_hi
            } else {
                0.0
            }
        };
        let gx = axis_gap(self.loc.x, self.loc.x + self.width.x, other.loc.x, other.loc.x + other.width.x);
        let gy = axis_gap(self.loc.y, self.loc.y + self.width.y, other.loc.y, other.loc.y + other.width.y);
        let gz = axis_gap(self.loc.z, self.loc.z + self.width.z, other.loc.z, other.loc.z + other.width.z);
        (gx * gx + gy * gy + gz * gz).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_mask_tracks_bits() {
        let mut m = AxisMask::NONE;
        m.set(3);
        assert!(m.has(3));
        assert!(!m.has(4));
        m.clear(3);
        assert!(!m.has(3));
    }

    #[test]
    fn missing_reports_unset_bits_only() {
        let mut have = AxisMask::NONE;
        have.set(0);
        let want = AxisMask(0b101);
        assert_eq!(have.missing(want), AxisMask(0b100));
    }

    #[test]
    fn dmin_zero_for_touching_cells() {
        let a = Cell::leaf(Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0), NodeId(0), 0);
        let b = Cell::leaf(Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0), NodeId(0), 1);
        assert_eq!(a.dmin(&b), 0.0);
    }

    #[test]
    fn dmin_positive_for_separated_cells() {
        let a = Cell::leaf(Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0), NodeId(0), 0);
        let b = Cell::leaf(Vec3::new(2.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0), NodeId(0), 1);
        assert_eq!(a.dmin(&b), 1.0);
    }

    #[test]
    fn activity_predicate_matches_spec() {
        let mut c = Cell::leaf(Vec3::ZERO, Vec3::new(1.0, 1.0, 1.0), NodeId(0), 0);
        c.ti_end_min = 10;
        assert!(c.is_active(10));
        assert!(c.is_active(11));
        assert!(!c.is_active(9));
    }
}
