//! Stray-particle redistribution (spec §4.5 paragraph 2): after drift,
//! before rebuild, every particle whose new position falls inside a cell
//! owned by a different node is pulled out into that node's outgoing
//! buffer, with its gravity-partner offset rewritten to the proxy-local
//! index.
//!
//! Built on the same stable dest-bucket machinery `Space::rebuild` uses to
//! group particles by destination leaf (`cellmesh_space::permutation`);
//! here the destination is "stay" (bucket 0) or one of the peer nodes that
//! now owns the cell at this particle's position (spec §9 Open Question:
//! resolved below as a two-step relative-then-absolute remap).

use std::collections::HashMap;

use cellmesh_space::permutation::{
    apply_gparts_permutation, apply_parts_permutation, apply_sparts_permutation, histogram,
    stable_bucket_permutation,
};
use cellmesh_space::Space;
use cellmesh_types::{GPart, NodeId, Part, PartnerRef, SPart, Vec3, XPart};
use serde::{Deserialize, Serialize};

use crate::error::ExchangeResult;

/// Everything headed to one peer node after a stray pass: self-contained,
/// with `Part.gpart`/`GPart.partner` indices already local to this batch
/// (spec: "gravity-partner offset rewritten to the proxy-local index so
/// the receiver can reconstruct linkage"). `Serialize`/`Deserialize` so the
/// repartition driver can ship a batch across `Transport` under
/// `MessageTag::STRAYS`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StrayBatch {
    pub parts: Vec<Part>,
    pub xparts: Vec<XPart>,
    pub gparts: Vec<GPart>,
    pub sparts: Vec<SPart>,
}

fn owning_node(space: &Space, assignment: &HashMap<u32, NodeId>, x: Vec3) -> NodeId {
    space
        .top_cells()
        .iter()
        .find(|&&idx| space.cells[idx.as_usize()].contains(x))
        .and_then(|&idx| assignment.get(&space.cells[idx.as_usize()].tag).copied())
        .unwrap_or(space.node_id)
}

/// Builds the bucket-id array for one position array: `0` for particles
/// that stay, `1 + rank(node)` for particles bound for a remote node,
/// where `rank` is each remote node's position in `dest_order` (ascending
/// `NodeId`, computed once so every array uses the same bucket numbering).
fn dest_buckets(
    space: &Space,
    assignment: &HashMap<u32, NodeId>,
    positions: &[Vec3],
    dest_order: &[NodeId],
) -> Vec<u32> {
    let rank_of: HashMap<NodeId, u32> = dest_order
        .iter()
        .enumerate()
        .map(|(i, &n)| (n, 1 + i as u32))
        .collect();
    positions
        .iter()
        .map(|&x| {
            let owner = owning_node(space, assignment, x);
            if owner == space.node_id {
                0
            } else {
                rank_of[&owner]
            }
        })
        .collect()
}

/// Discovers every distinct remote node referenced by the current particle
/// positions, in ascending order, so all three arrays (gas, star, gravity)
/// agree on bucket numbering.
fn discover_dest_order(space: &Space, assignment: &HashMap<u32, NodeId>) -> Vec<NodeId> {
    let mut set: std::collections::BTreeSet<NodeId> = std::collections::BTreeSet::new();
    for p in &space.parts {
        let owner = owning_node(space, assignment, p.x);
        if owner != space.node_id {
            set.insert(owner);
        }
    }
    for s in &space.sparts {
        let owner = owning_node(space, assignment, s.x);
        if owner != space.node_id {
            set.insert(owner);
        }
    }
    for g in &space.gparts {
        let owner = owning_node(space, assignment, g.x);
        if owner != space.node_id {
            set.insert(owner);
        }
    }
    set.into_iter().collect()
}

/// Splits a permuted, bucket-sorted array into (stay, per-destination
/// slices) given the per-bucket histogram. `stay` is bucket 0; the
/// remaining buckets are returned in `dest_order`'s order.
fn split_by_bucket<T>(mut items: Vec<T>, hist: &[u32]) -> (Vec<T>, Vec<Vec<T>>) {
    let stay_count = hist[0] as usize;
    let tail = items.split_off(stay_count);
    let mut out = Vec::with_capacity(hist.len() - 1);
    let mut rest = tail;
    for &count in &hist[1..] {
        let batch: Vec<T> = rest.drain(0..count as usize).collect();
        out.push(batch);
    }
    (items, out)
}

/// Runs one stray pass: reorders `space`'s particle arrays so everything
/// that stays is packed at the front (restoring the invariant `Space`
/// expects for the next rebuild) and returns one `StrayBatch` per peer node
/// that now owns at least one of this node's particles.
///
/// `assignment` maps top-cell tag -> owning `NodeId`, as produced by the
/// repartition driver or carried over unchanged between repartitions.
pub fn collect_strays(
    space: &mut Space,
    assignment: &HashMap<u32, NodeId>,
) -> ExchangeResult<HashMap<NodeId, StrayBatch>> {
    let dest_order = discover_dest_order(space, assignment);
    if dest_order.is_empty() {
        return Ok(HashMap::new());
    }
    let nr_buckets = 1 + dest_order.len();

    let parts_x: Vec<Vec3> = space.parts.iter().map(|p| p.x).collect();
    let sparts_x: Vec<Vec3> = space.sparts.iter().map(|s| s.x).collect();
    let gparts_x: Vec<Vec3> = space.gparts.iter().map(|g| g.x).collect();

    let parts_dest = dest_buckets(space, assignment, &parts_x, &dest_order);
    let sparts_dest = dest_buckets(space, assignment, &sparts_x, &dest_order);
    let gparts_dest = dest_buckets(space, assignment, &gparts_x, &dest_order);

    let parts_perm = stable_bucket_permutation(&parts_dest);
    let sparts_perm = stable_bucket_permutation(&sparts_dest);
    let gparts_perm = stable_bucket_permutation(&gparts_dest);

    // Same two-pass order `tree::Space::assign_slices` uses: gravity
    // linkage is rewritten from both sides independently, so the order
    // between the two calls below doesn't matter for correctness, only
    // that each runs once.
    apply_gparts_permutation(&mut space.gparts, &mut space.parts, &mut space.sparts, &gparts_perm);
    apply_parts_permutation(&mut space.parts, &mut space.xparts, &mut space.gparts, &parts_perm);
    apply_sparts_permutation(&mut space.sparts, &mut space.gparts, &sparts_perm);

    let parts_hist = histogram(&parts_dest, nr_buckets);
    let sparts_hist = histogram(&sparts_dest, nr_buckets);
    let gparts_hist = histogram(&gparts_dest, nr_buckets);

    let parts_snapshot = std::mem::take(&mut space.parts);
    let xparts_snapshot = std::mem::take(&mut space.xparts);
    let sparts_snapshot = std::mem::take(&mut space.sparts);
    let gparts_snapshot = std::mem::take(&mut space.gparts);

    let (stay_parts, mut out_parts) = split_by_bucket(parts_snapshot, &parts_hist);
    let (stay_xparts, mut out_xparts) = split_by_bucket(xparts_snapshot, &parts_hist);
    let (stay_sparts, mut out_sparts) = split_by_bucket(sparts_snapshot, &sparts_hist);
    let (stay_gparts, mut out_gparts) = split_by_bucket(gparts_snapshot, &gparts_hist);

    space.parts = stay_parts;
    space.xparts = stay_xparts;
    space.sparts = stay_sparts;
    space.gparts = stay_gparts;

    // Each per-destination `GPart.partner`/`Part.gpart` index is still
    // relative to the *global* permuted gparts array; rebase it onto this
    // batch's own outgoing gparts slice (the "proxy-local index" spec §4.5
    // calls for). Indices that don't land in this batch's own gparts slice
    // mean the gas/star half and its gravity half were split across
    // destinations, which the geometry invariant (spec §9: "gravity and
    // hydro never disagree on a particle's position") rules out; such an
    // entry is dropped defensively rather than shipped with a dangling ref.
    let mut batches = HashMap::with_capacity(dest_order.len());
    let mut gparts_base = 0usize;
    let mut parts_base = 0usize;
    let mut sparts_base = 0usize;
    for (rank, &node) in dest_order.iter().enumerate() {
        let mut gparts = std::mem::take(&mut out_gparts[rank]);
        let mut parts = std::mem::take(&mut out_parts[rank]);
        let xparts = std::mem::take(&mut out_xparts[rank]);
        let mut sparts = std::mem::take(&mut out_sparts[rank]);

        let gparts_range = gparts_base..gparts_base + gparts.len();
        for p in parts.iter_mut() {
            p.gpart = p
                .gpart
                .filter(|&g| gparts_range.contains(&(g as usize)))
                .map(|g| g - gparts_range.start as u32);
        }
        for s in sparts.iter_mut() {
            s.gpart = s
                .gpart
                .filter(|&g| gparts_range.contains(&(g as usize)))
                .map(|g| g - gparts_range.start as u32);
        }
        let parts_range = parts_base..parts_base + parts.len();
        let sparts_range = sparts_base..sparts_base + sparts.len();
        for g in gparts.iter_mut() {
            g.partner = match g.partner {
                PartnerRef::Gas(i) if parts_range.contains(&(i as usize)) => {
                    PartnerRef::Gas(i - parts_range.start as u32)
                }
                PartnerRef::Star(i) if sparts_range.contains(&(i as usize)) => {
                    PartnerRef::Star(i - sparts_range.start as u32)
                }
                other @ PartnerRef::Dm(_) => other,
                _ => g.partner,
            };
        }

        gparts_base += gparts.len();
        parts_base += parts.len();
        sparts_base += sparts.len();

        batches.insert(node, StrayBatch { parts: std::mem::take(&mut parts), xparts, gparts: std::mem::take(&mut gparts), sparts: std::mem::take(&mut sparts) });
    }

    Ok(batches)
}

/// Appends an inbound `StrayBatch` onto `space`'s local arrays (the
/// receiving side of the exchange, run before the next rebuild). Indices
/// inside the batch are rebased onto the grown arrays' new tail.
pub fn absorb_strays(space: &mut Space, batch: StrayBatch) {
    let parts_base = space.parts.len() as u32;
    let gparts_base = space.gparts.len() as u32;
    let sparts_base = space.sparts.len() as u32;

    let mut parts = batch.parts;
    let mut sparts = batch.sparts;
    let mut gparts = batch.gparts;

    for p in parts.iter_mut() {
        p.gpart = p.gpart.map(|g| g + gparts_base);
    }
    for s in sparts.iter_mut() {
        s.gpart = s.gpart.map(|g| g + gparts_base);
    }
    for g in gparts.iter_mut() {
        g.partner = match g.partner {
            PartnerRef::Gas(i) => PartnerRef::Gas(i + parts_base),
            PartnerRef::Star(i) => PartnerRef::Star(i + sparts_base),
            other @ PartnerRef::Dm(_) => other,
        };
    }

    space.parts.extend(parts);
    space.xparts.extend(batch.xparts);
    space.sparts.extend(sparts);
    space.gparts.extend(gparts);
}

/// Builds a top-cell-tag -> owner map from `space`'s own tree, the
/// degenerate "nothing has moved" assignment a freshly rebuilt `Space`
/// already satisfies.
pub fn identity_assignment(space: &Space) -> HashMap<u32, NodeId> {
    space
        .top_cells()
        .iter()
        .map(|&idx| {
            let cell = &space.cells[idx.as_usize()];
            (cell.tag, cell.node_id)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellmesh_space::Boundary;

    fn two_particle_space() -> Space {
        let mut space = Space::new(Vec3::new(1.0, 1.0, 1.0), Boundary::Periodic, NodeId(0), 2);
        space.target_leaf_count = 8;
        space.parts = vec![Part::new_at(0, Vec3::new(0.25, 0.5, 0.5), 0.05), Part::new_at(1, Vec3::new(0.75, 0.5, 0.5), 0.05)];
        space.xparts = vec![XPart::default(); 2];
        space.rebuild().unwrap();
        space
    }

    #[test]
    fn particle_owned_by_remote_node_is_collected() {
        let mut space = two_particle_space();
        let assignment: HashMap<u32, NodeId> = space
            .top_cells()
            .iter()
            .map(|&idx| {
                let cell = &space.cells[idx.as_usize()];
                let owner = if cell.contains(Vec3::new(0.75, 0.5, 0.5)) { NodeId(1) } else { NodeId(0) };
                (cell.tag, owner)
            })
            .collect();

        let before_total = space.parts.len();
        let batches = collect_strays(&mut space, &assignment).unwrap();
        let moved: usize = batches.values().map(|b| b.parts.len()).sum();
        assert_eq!(moved + space.parts.len(), before_total);
        assert_eq!(batches.get(&NodeId(1)).map(|b| b.parts.len()), Some(1));
    }

    #[test]
    fn no_strays_when_assignment_matches_local_ownership() {
        let mut space = two_particle_space();
        let assignment = identity_assignment(&space);
        let batches = collect_strays(&mut space, &assignment).unwrap();
        assert!(batches.is_empty());
    }

    #[test]
    fn absorb_reverses_collect_with_rebased_linkage() {
        let mut home = Space::new(Vec3::new(1.0, 1.0, 1.0), Boundary::Periodic, NodeId(1), 2);
        home.target_leaf_count = 8;
        home.parts = vec![Part::new_at(5, Vec3::new(0.1, 0.1, 0.1), 0.05)];
        home.xparts = vec![XPart::default()];
        home.rebuild().unwrap();

        let mut incoming_part = Part::new_at(9, Vec3::new(0.75, 0.5, 0.5), 0.05);
        incoming_part.gpart = Some(0);
        let incoming_gpart = GPart::for_gas(Vec3::new(0.75, 0.5, 0.5), 1.0, 0);
        let batch = StrayBatch {
            parts: vec![incoming_part],
            xparts: vec![XPart::default()],
            gparts: vec![incoming_gpart],
            sparts: vec![],
        };
        absorb_strays(&mut home, batch);
        assert_eq!(home.parts.len(), 2);
        assert_eq!(home.parts[1].gpart, Some(0));
        assert!(matches!(home.gparts[0].partner, PartnerRef::Gas(1)));
    }
}
