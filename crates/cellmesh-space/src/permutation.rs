//! Stable dest-bucket sort and partner-linkage restoration (spec §4.1
//! `space_parts_sort` / `gparts_sort` / `sparts_sort`).
//!
//! "Given a destination-index array ... reorders the particle arrays in
//! place so particles with equal destination are contiguous and ordered by
//! ascending destination. Simultaneously updates the partner-offset fields
//! so gas<->gravity and star<->gravity linkage survives the permutation."

use cellmesh_types::{GPart, Part, PartnerRef, SPart, XPart};

/// `perm[old_index] = new_index`: where an element currently at `old_index`
/// ends up after reordering.
#[derive(Debug, Clone)]
pub struct Permutation {
    pub perm: Vec<u32>,
}

/// Stable sort of `0..dest.len()` by ascending `dest`, breaking ties by
/// original order (spec: "stable across ties", reused here for the
/// dest-bucket sort rather than the per-axis projection sort in
/// `sort.rs`, but the same stability requirement applies).
pub fn stable_bucket_permutation(dest: &[u32]) -> Permutation {
    let mut order: Vec<u32> = (0..dest.len() as u32).collect();
    order.sort_by_key(|&i| dest[i as usize]);
    let mut perm = vec![0u32; dest.len()];
    for (new_index, &old_index) in order.iter().enumerate() {
        perm[old_index as usize] = new_index as u32;
    }
    Permutation { perm }
}

/// Per-leaf-cell particle counts in bucket order, used to derive
/// `SliceView`s once `stable_bucket_permutation` has been applied.
pub fn histogram(dest: &[u32], nr_buckets: usize) -> Vec<u32> {
    let mut counts = vec![0u32; nr_buckets];
    for &d in dest {
        counts[d as usize] += 1;
    }
    counts
}

fn apply_permutation<T: Clone>(items: &[T], perm: &Permutation) -> Vec<T> {
    let mut out: Vec<Option<T>> = vec![None; items.len()];
    for (old_index, item) in items.iter().enumerate() {
        let new_index = perm.perm[old_index] as usize;
        out[new_index] = Some(item.clone());
    }
    out.into_iter()
        .map(|x| x.expect("permutation must be a bijection over the full range"))
        .collect()
}

/// Reorders `parts`/`xparts` in lock-step by `perm`, then rewrites every
/// linked `GPart`'s `PartnerRef::Gas` index to the particle's new position.
/// This is the gas-array half of spec's linkage invariant: "for any particle
/// at new index i, its partner gravity record's neg_offset equals -i."
pub fn apply_parts_permutation(
    parts: &mut Vec<Part>,
    xparts: &mut Vec<XPart>,
    gparts: &mut [GPart],
    perm: &Permutation,
) {
    *parts = apply_permutation(parts, perm);
    *xparts = apply_permutation(xparts, perm);
    for gp in gparts.iter_mut() {
        if let PartnerRef::Gas(old_index) = gp.partner {
            gp.partner = PartnerRef::Gas(perm.perm[old_index as usize]);
        }
    }
}

pub fn apply_sparts_permutation(
    sparts: &mut Vec<SPart>,
    gparts: &mut [GPart],
    perm: &Permutation,
) {
    *sparts = apply_permutation(sparts, perm);
    for gp in gparts.iter_mut() {
        if let PartnerRef::Star(old_index) = gp.partner {
            gp.partner = PartnerRef::Star(perm.perm[old_index as usize]);
        }
    }
}

/// Reorders `gparts` by `perm`, then rewrites every gas/star particle's
/// `.gpart` back-reference to the gravity record's new position.
pub fn apply_gparts_permutation(
    gparts: &mut Vec<GPart>,
    parts: &mut [Part],
    sparts: &mut [SPart],
    perm: &Permutation,
) {
    *gparts = apply_permutation(gparts, perm);
    for p in parts.iter_mut() {
        if let Some(old_index) = p.gpart {
            p.gpart = Some(perm.perm[old_index as usize]);
        }
    }
    for s in sparts.iter_mut() {
        if let Some(old_index) = s.gpart {
            s.gpart = Some(perm.perm[old_index as usize]);
        }
    }
}

/// Checks property (2) ("Linkage round-trip"): every gas/star particle with
/// a gravity partner points at a `GPart` whose own partner ref points back.
pub fn check_linkage(parts: &[Part], sparts: &[SPart], gparts: &[GPart]) -> Result<(), String> {
    for (i, p) in parts.iter().enumerate() {
        if let Some(gidx) = p.gpart {
            match gparts.get(gidx as usize).map(|g| g.partner) {
                Some(PartnerRef::Gas(back)) if back as usize == i => {}
                other => {
                    return Err(format!(
                        "gas particle {i} points at gpart {gidx} but partner is {other:?}"
                    ))
                }
            }
        }
    }
    for (i, s) in sparts.iter().enumerate() {
        if let Some(gidx) = s.gpart {
            match gparts.get(gidx as usize).map(|g| g.partner) {
                Some(PartnerRef::Star(back)) if back as usize == i => {}
                other => {
                    return Err(format!(
                        "star particle {i} points at gpart {gidx} but partner is {other:?}"
                    ))
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellmesh_types::Vec3;

    fn make_gas_with_partner(id: u64, x: Vec3, gpart_index: u32) -> (Part, GPart) {
        let mut p = Part::new_at(id, x, 1.0);
        p.gpart = Some(gpart_index);
        let g = GPart::for_gas(x, 1.0, 0);
        (p, g)
    }

    #[test]
    fn bucket_permutation_is_stable_and_groups_equal_dest() {
        let dest = vec![2, 0, 2, 1, 0];
        let perm = stable_bucket_permutation(&dest);
        let mut new_dest = vec![0u32; dest.len()];
        for (old, &d) in dest.iter().enumerate() {
            new_dest[perm.perm[old] as usize] = d;
        }
        assert_eq!(new_dest, vec![0, 0, 1, 2, 2]);
        // stability: the two old-index-0-bucket entries (indices 1 and 4)
        // keep their relative order.
        assert!(perm.perm[1] < perm.perm[4]);
    }

    #[test]
    fn linkage_round_trips_through_gas_and_gpart_permutation() {
        let (p0, mut g0) = make_gas_with_partner(0, Vec3::new(0.0, 0.0, 0.0), 0);
        let (p1, mut g1) = make_gas_with_partner(1, Vec3::new(1.0, 0.0, 0.0), 1);
        g0.partner = PartnerRef::Gas(0);
        g1.partner = PartnerRef::Gas(1);
        let mut parts = vec![p0, p1];
        let mut xparts = vec![XPart::default(), XPart::default()];
        let mut gparts = vec![g0, g1];

        // Reverse both arrays independently, as a real rebuild might.
        let parts_perm = Permutation { perm: vec![1, 0] };
        let gparts_perm = Permutation { perm: vec![1, 0] };

        apply_gparts_permutation(&mut gparts, &mut parts, &mut [], &gparts_perm);
        apply_parts_permutation(&mut parts, &mut xparts, &mut gparts, &parts_perm);

        check_linkage(&parts, &[], &gparts).expect("linkage must hold after independent permutes");
    }
}
