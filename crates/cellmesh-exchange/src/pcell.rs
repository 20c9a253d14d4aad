//! The `pcell` tree-skeleton message (spec §4.5 step 1, §6): a pre-order
//! packing of shape + counts + tag for every cell in a proxy's outgoing
//! subtrees, and the receiver-side reconstruction of synthetic foreign
//! cells from it.

use cellmesh_types::{Cell, CellIndex, NodeId, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::{ExchangeError, ExchangeResult};

/// One pre-order node of a packed subtree (spec §6: "each node emits
/// `(count, gcount, scount, progeny_mask, tag)` and recurses on each
/// present child").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PCellNode {
    pub count: u32,
    pub gcount: u32,
    pub scount: u32,
    /// Bit `i` set iff progeny slot `i` (the same fixed octant order
    /// `tree::Space::split_node` uses) is present.
    pub progeny_mask: u8,
    pub tag: u32,
    pub children: Vec<PCellNode>,
}

fn pack_node(space: &cellmesh_space::Space, idx: CellIndex) -> PCellNode {
    let cell = &space.cells[idx.as_usize()];
    let progeny = cell.progeny;
    let mut progeny_mask = 0u8;
    let mut children = Vec::new();
    for (i, child) in progeny.iter().enumerate() {
        if let Some(child_idx) = child {
            progeny_mask |= 1 << i;
            children.push(pack_node(space, *child_idx));
        }
    }
    let cell = &space.cells[idx.as_usize()];
    PCellNode {
        count: cell.count,
        gcount: cell.gcount,
        scount: cell.scount,
        progeny_mask,
        tag: cell.tag,
        children,
    }
}

/// Packs every root in `roots` (a proxy's `cells_out`) into one pre-order
/// byte buffer, ready to hand to `Transport::send` under `MessageTag::PCELL`.
pub fn pack_proxy_cells(space: &cellmesh_space::Space, roots: &[CellIndex]) -> ExchangeResult<Vec<u8>> {
    let nodes: Vec<PCellNode> = roots.iter().map(|&idx| pack_node(space, idx)).collect();
    bincode::serialize(&nodes).map_err(|e| ExchangeError::PcellDecode(e.to_string()))
}

pub fn unpack_proxy_cells(bytes: &[u8]) -> ExchangeResult<Vec<PCellNode>> {
    bincode::deserialize(bytes).map_err(|e| ExchangeError::PcellDecode(e.to_string()))
}

/// The fixed octant offsets `tree::Space::split_node` iterates in (`oi, oj,
/// ok` each `0..2`), needed to rebuild geometry for a foreign subtree from
/// nothing but its parent's bounds and the `progeny_mask` bit position.
const OCTANT_OFFSETS: [(f64, f64, f64); 8] = [
    (0.0, 0.0, 0.0),
    (0.0, 0.0, 1.0),
    (0.0, 1.0, 0.0),
    (0.0, 1.0, 1.0),
    (1.0, 0.0, 0.0),
    (1.0, 0.0, 1.0),
    (1.0, 1.0, 0.0),
    (1.0, 1.0, 1.0),
];

/// Reconstructs a synthetic cell tree for one packed root, owned by `owner`
/// (spec §4.5 step 3 "each proxy reconstructs the foreign cells"). The
/// returned cells carry correct geometry and counts but empty `SliceView`s;
/// the caller links those to slices of the node's foreign-particle arrays
/// once the matching payload messages (`xv`/`rho`/...) have arrived.
pub fn reconstruct_foreign_subtree(
    node: &PCellNode,
    loc: Vec3,
    width: Vec3,
    owner: NodeId,
    out: &mut Vec<Cell>,
) -> CellIndex {
    let mut cell = Cell::leaf(loc, width, owner, node.tag);
    cell.count = node.count;
    cell.gcount = node.gcount;
    cell.scount = node.scount;
    let self_idx = CellIndex::from_usize(out.len());
    out.push(cell);

    if node.progeny_mask != 0 {
        let half = Vec3::new(width.x / 2.0, width.y / 2.0, width.z / 2.0);
        let mut progeny = [None; 8];
        let mut child_iter = node.children.iter();
        for (i, &(ox, oy, oz)) in OCTANT_OFFSETS.iter().enumerate() {
            if node.progeny_mask & (1 << i) == 0 {
                continue;
            }
            let child_node = child_iter.next().expect("progeny_mask bit count matches children.len()");
            let child_loc = Vec3::new(loc.x + ox * half.x, loc.y + oy * half.y, loc.z + oz * half.z);
            let child_idx = reconstruct_foreign_subtree(child_node, child_loc, half, owner, out);
            progeny[i] = Some(child_idx);
        }
        out[self_idx.as_usize()].split = true;
        out[self_idx.as_usize()].progeny = progeny;
    }
    self_idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellmesh_space::Boundary;
    use cellmesh_types::{NodeId as Nid, Part, XPart};

    #[test]
    fn pack_unpack_roundtrips_counts_and_shape() {
        let mut space = cellmesh_space::Space::new(Vec3::new(1.0, 1.0, 1.0), Boundary::Periodic, Nid(0), 1);
        space.target_leaf_count = 2;
        let mut parts = Vec::new();
        let mut xparts = Vec::new();
        for i in 0..16u64 {
            let x = Vec3::new((i as f64 + 0.5) / 16.0, 0.5, 0.5);
            parts.push(Part::new_at(i, x, 0.05));
            xparts.push(XPart::default());
        }
        space.parts = parts;
        space.xparts = xparts;
        space.rebuild().unwrap();

        let roots = space.top_cells().to_vec();
        let packed = pack_proxy_cells(&space, &roots).unwrap();
        let nodes = unpack_proxy_cells(&packed).unwrap();
        assert_eq!(nodes.len(), roots.len());

        let total: u32 = nodes.iter().map(|n| n.count).sum();
        assert_eq!(total, 16);
    }

    #[test]
    fn reconstruct_builds_matching_octant_geometry() {
        let node = PCellNode {
            count: 4,
            gcount: 0,
            scount: 0,
            progeny_mask: 0b0000_0001,
            tag: 7,
            children: vec![PCellNode {
                count: 4,
                gcount: 0,
                scount: 0,
                progeny_mask: 0,
                tag: 8,
                children: vec![],
            }],
        };
        let mut out = Vec::new();
        let root_idx = reconstruct_foreign_subtree(
            &node,
            Vec3::ZERO,
            Vec3::new(1.0, 1.0, 1.0),
            NodeId(2),
            &mut out,
        );
        let root = &out[root_idx.as_usize()];
        assert!(root.split);
        let child = &out[root.progeny[0].unwrap().as_usize()];
        assert_eq!(child.width, Vec3::new(0.5, 0.5, 0.5));
        assert_eq!(child.node_id, NodeId(2));
    }
}
