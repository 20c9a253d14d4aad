//! Deterministic initial-condition generator for the `cellmesh` CLI (spec
//! §6 "CLI surface, illustrative"). Builds the same rotating-velocity
//! Cartesian lattice spec §8 scenario (a) describes, parameterized by the
//! `-n`/`-h`/`-m`/`-s`/`-d`/`-p` flags.

use cellmesh_space::{Boundary, Space};
use cellmesh_types::{NodeId, Part, Vec3, XPart};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

#[derive(Debug, Clone, Copy)]
pub struct IcParams {
    pub particles_per_axis: u32,
    pub smoothing_length: f64,
    pub rho: f64,
    pub size: f64,
    pub perturbation: f64,
    pub h_pert: f64,
}

impl Default for IcParams {
    fn default() -> Self {
        Self {
            particles_per_axis: 8,
            smoothing_length: 0.0,
            rho: 1.0,
            size: 1.0,
            perturbation: 0.0,
            h_pert: 0.0,
        }
    }
}

/// Builds a lattice of `n^3` gas particles on `[0, size)^3`, each displaced
/// by up to `perturbation * spacing` and carrying the scenario (a) velocity
/// field `v = (y, -x, 0)`. Seeded from the lattice parameters so a given
/// `-n`/`-d`/`-p` combination reproduces bit-identical initial conditions
/// across runs (spec §8 property 7).
pub fn lattice_space(
    node_id: NodeId,
    nr_nodes: u32,
    target_leaf_count: u32,
    params: &IcParams,
) -> Space {
    let n = params.particles_per_axis.max(1) as usize;
    let spacing = params.size / n as f64;
    let h = if params.smoothing_length > 0.0 {
        params.smoothing_length
    } else {
        1.2348 * spacing
    };
    let mut rng = Pcg32::seed_from_u64(seed_for(params));

    let mut space = Space::new(
        Vec3::new(params.size, params.size, params.size),
        Boundary::Periodic,
        node_id,
        nr_nodes,
    );
    space.target_leaf_count = target_leaf_count.max(1) as usize;

    let mut parts = Vec::with_capacity(n * n * n);
    let mut xparts = Vec::with_capacity(n * n * n);
    let mut id = 0u64;
    for i in 0..n {
        for j in 0..n {
            for k in 0..n {
                let mut jitter = || rng.gen_range(-0.5..0.5) * params.perturbation * spacing;
                let x = Vec3::new(
                    ((i as f64 + 0.5) * spacing + jitter()).rem_euclid(params.size),
                    ((j as f64 + 0.5) * spacing + jitter()).rem_euclid(params.size),
                    ((k as f64 + 0.5) * spacing + jitter()).rem_euclid(params.size),
                );
                let h_i = h * (1.0 + rng.gen_range(-0.5..0.5) * params.h_pert);
                let mut p = Part::new_at(id, x, h_i);
                p.v = Vec3::new(x.y, -x.x, 0.0);
                p.rho = params.rho;
                parts.push(p);
                xparts.push(XPart::default());
                id += 1;
            }
        }
    }
    space.parts = parts;
    space.xparts = xparts;
    space
}

fn seed_for(params: &IcParams) -> u64 {
    (params.particles_per_axis as u64)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ params.perturbation.to_bits()
        ^ params.h_pert.to_bits().rotate_left(32)
}
