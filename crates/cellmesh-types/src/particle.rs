//! Particle kinds (spec §3 "Particle kinds").
//!
//! The source encodes gas/star <-> gravity linkage as a sign on an integer
//! offset (positive id for DM, negative offset for gas/star partners). Spec
//! §9 asks for a sum type instead; `PartnerRef` is that sum type, and the
//! "negative offset" invariant becomes: for `Gas`/`Star` variants, the index
//! always names the partner's current position in the local array.

use serde::{Deserialize, Serialize};

use crate::time::{Ti, TimeBin};

/// What a gravity particle's `kind` tag names, and — for gas/star kinds —
/// where to find the partner record. Replaces the raw signed-offset hack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartnerRef {
    /// Dark matter: no hydro partner, carries its own stable id.
    Dm(u64),
    /// Gas partner at this index in the local `parts` array.
    Gas(u32),
    /// Star partner at this index in the local `sparts` array.
    Star(u32),
}

impl PartnerRef {
    pub fn gas_index(self) -> Option<u32> {
        match self {
            PartnerRef::Gas(i) => Some(i),
            _ => None,
        }
    }

    pub fn star_index(self) -> Option<u32> {
        match self {
            PartnerRef::Star(i) => Some(i),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, other: Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn scale(self, s: f64) -> Vec3 {
        Vec3::new(self.x * s, self.y * s, self.z * s)
    }

    pub fn norm2(self) -> f64 {
        self.dot(self)
    }
}

/// Gas particle: hot-loop SPH state (spec §3 `Part`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub id: u64,
    pub x: Vec3,
    pub v: Vec3,
    pub a_hydro: Vec3,
    pub h: f64,
    pub rho: f64,
    /// Internal energy (or entropy, scheme-dependent); opaque to the core.
    pub u: f64,
    /// SPH density-loop accumulators, reset by `hydro_init_part` and
    /// finalized by `hydro_end_density`.
    pub wcount: f64,
    pub wcount_dh: f64,
    pub rho_dh: f64,
    pub div_v: f64,
    pub rot_v: Vec3,
    pub time_bin: TimeBin,
    pub ti_begin: Ti,
    pub ti_end: Ti,
    /// Index of this particle's gravity partner, if it has one.
    pub gpart: Option<u32>,
}

impl Part {
    pub fn new_at(id: u64, x: Vec3, h: f64) -> Self {
        Self {
            id,
            x,
            v: Vec3::ZERO,
            a_hydro: Vec3::ZERO,
            h,
            rho: 0.0,
            u: 0.0,
            wcount: 0.0,
            wcount_dh: 0.0,
            rho_dh: 0.0,
            div_v: 0.0,
            rot_v: Vec3::ZERO,
            time_bin: 0,
            ti_begin: 0,
            ti_end: 0,
            gpart: None,
        }
    }

    /// Resets the per-step density-loop accumulators. Mirrors
    /// `hydro_init_part` from the physics collaborator contract (spec §6);
    /// kept here as the data-only half, the kernel call itself lives behind
    /// `cellmesh_physics::PhysicsKernel`.
    pub fn reset_density_accumulators(&mut self) {
        self.rho = 0.0;
        self.rho_dh = 0.0;
        self.wcount = 0.0;
        self.wcount_dh = 0.0;
        self.div_v = 0.0;
        self.rot_v = Vec3::ZERO;
    }
}

/// Extended gas record: slowly-varying state kept out of the hot loop
/// (spec §3 `XPart`).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct XPart {
    pub v_full: Vec3,
    pub u_full: f64,
    pub entropy_full: f64,
}

impl Default for Vec3 {
    fn default() -> Self {
        Vec3::ZERO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticleKind {
    Gas,
    Dm,
    Star,
}

/// Gravity particle (spec §3 `GPart`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GPart {
    pub x: Vec3,
    pub v: Vec3,
    pub a_grav: Vec3,
    pub mass: f64,
    pub kind: ParticleKind,
    pub partner: PartnerRef,
    pub time_bin: TimeBin,
}

impl GPart {
    pub fn dm(x: Vec3, mass: f64, id: u64) -> Self {
        Self {
            x,
            v: Vec3::ZERO,
            a_grav: Vec3::ZERO,
            mass,
            kind: ParticleKind::Dm,
            partner: PartnerRef::Dm(id),
            time_bin: 0,
        }
    }

    pub fn for_gas(x: Vec3, mass: f64, gas_index: u32) -> Self {
        Self {
            x,
            v: Vec3::ZERO,
            a_grav: Vec3::ZERO,
            mass,
            kind: ParticleKind::Gas,
            partner: PartnerRef::Gas(gas_index),
            time_bin: 0,
        }
    }

    pub fn for_star(x: Vec3, mass: f64, star_index: u32) -> Self {
        Self {
            x,
            v: Vec3::ZERO,
            a_grav: Vec3::ZERO,
            mass,
            kind: ParticleKind::Star,
            partner: PartnerRef::Star(star_index),
            time_bin: 0,
        }
    }
}

/// Star particle (spec §3 `SPart`): analogous to gas, no hydro fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SPart {
    pub id: u64,
    pub x: Vec3,
    pub v: Vec3,
    pub a_grav: Vec3,
    pub mass: f64,
    pub time_bin: TimeBin,
    pub gpart: Option<u32>,
}

impl SPart {
    pub fn new_at(id: u64, x: Vec3, mass: f64) -> Self {
        Self {
            id,
            x,
            v: Vec3::ZERO,
            a_grav: Vec3::ZERO,
            mass,
            time_bin: 0,
            gpart: None,
        }
    }
}
