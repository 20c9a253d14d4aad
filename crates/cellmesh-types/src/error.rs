//! Data-model invariant violations (spec §7 "Invariant violation").
//!
//! These are constructed by `cellmesh-space` and `cellmesh-tasks` but named
//! here since they describe violations of the types owned by this crate.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvariantError {
    #[error("particle {particle_id} at x=({x:.6},{y:.6},{z:.6}) is outside its owning cell")]
    ParticleOutsideCell {
        particle_id: u64,
        x: f64,
        y: f64,
        z: f64,
    },
    #[error("gravity partner linkage broken: gas/star index {index} expected partner offset {expected}, found {found}")]
    BrokenPartnerLinkage {
        index: u32,
        expected: u32,
        found: u32,
    },
}
