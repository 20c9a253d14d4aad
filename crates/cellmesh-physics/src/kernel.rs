//! The physics collaborator contract (spec §6 "Physics collaborator
//! contract", spec §1 "treated as external collaborators with named
//! interfaces only").
//!
//! Every operation here is pure with respect to the particle slices passed:
//! it reads and mutates only the particles it is given, never reaches into
//! global state, and never decides scheduling. The core (`cellmesh-tasks`)
//! is the only caller; it hands this trait exactly the particles belonging
//! to the cell(s) a task names.

use cellmesh_types::{GPart, Part, SPart, XPart};

use crate::error::PhysicsError;

pub type PhysicsResult<T> = Result<T, PhysicsError>;

/// Self/pair/gradient/force kernels over one or two cells' particle slices.
/// Named after the source's `runner_doself1_density` /
/// `runner_dopair1_branch_density` family (spec §6): `do_self_*` is the
/// single-cell form, `do_pair_*` the two-cell form, parameterised by the
/// sort axis the pair was enumerated on (spec §4.2 step 1).
pub trait PhysicsKernel: Send + Sync {
    /// `hydro_init_part`: reset density-loop accumulators before any
    /// neighbour contribution is applied.
    fn hydro_init_part(&self, p: &mut Part);

    /// `hydro_end_density`: finalize accumulators after all neighbour cells
    /// (self + 26 pairs) have contributed.
    fn hydro_end_density(&self, p: &mut Part);

    /// `hydro_get_density`: observer used by dumps/tests, spec §6.
    fn hydro_get_density(&self, p: &Part) -> f64;

    /// `hydro_convert_quantities`: optional one-shot conversion after the
    /// initial density loop (e.g. entropy <-> internal energy).
    fn hydro_convert_quantities(&self, _p: &mut Part, _xp: &mut XPart) {}

    fn do_self_density(&self, parts: &mut [Part]) -> PhysicsResult<()>;
    fn do_pair_density(&self, axis: usize, ci: &mut [Part], cj: &mut [Part]) -> PhysicsResult<()>;

    fn do_self_gradient(&self, parts: &mut [Part]) -> PhysicsResult<()>;
    fn do_pair_gradient(&self, axis: usize, ci: &mut [Part], cj: &mut [Part]) -> PhysicsResult<()>;

    fn do_self_force(&self, parts: &mut [Part]) -> PhysicsResult<()>;
    fn do_pair_force(&self, axis: usize, ci: &mut [Part], cj: &mut [Part]) -> PhysicsResult<()>;

    /// Whether this scheme needs the extra gradient loop between density
    /// and force (spec §4.2.4 "extra_ghost and gradient* inserted ...").
    fn needs_gradient_loop(&self) -> bool {
        false
    }
}

/// Gravity kernels: self, pair, and the long-range mesh path (spec §4.2
/// step 2 and step 7).
pub trait GravityKernel: Send + Sync {
    fn do_self_grav(&self, gparts: &mut [GPart]) -> PhysicsResult<()>;
    fn do_pair_grav(&self, gci: &mut [GPart], gcj: &mut [GPart]) -> PhysicsResult<()>;
    fn do_external_grav(&self, gparts: &mut [GPart]) -> PhysicsResult<()>;

    /// `grav_up`: propagate a cell's multipole up toward the mesh gather.
    fn grav_up(&self, gparts: &[GPart]) -> PhysicsResult<[f64; 4]>;
    /// `grav_gather_m`: combine children multipoles into the parent's.
    fn grav_gather_m(&self, children: &[[f64; 4]]) -> PhysicsResult<[f64; 4]>;
    /// `grav_fft`: the long-range mesh solve; returns nothing observable to
    /// the core beyond "completed", consumed by every `grav_mm` task.
    fn grav_fft(&self, mesh: &[f64]) -> PhysicsResult<()>;
    fn grav_mm(&self, gparts: &mut [GPart], multipole: [f64; 4]) -> PhysicsResult<()>;
}

/// Per-particle hooks invoked by `init` / `ghost` / `kick1` / `kick2` /
/// `cooling` / `sourceterms` tasks (spec §4.2.4, spec §6 "follow the same
/// pattern").
pub trait LifecycleKernel: Send + Sync {
    fn init(&self, parts: &mut [Part]) -> PhysicsResult<()>;
    fn ghost(&self, parts: &mut [Part]) -> PhysicsResult<()>;
    fn extra_ghost(&self, _parts: &mut [Part]) -> PhysicsResult<()> {
        Ok(())
    }
    fn kick1(&self, parts: &mut [Part], dt: f64) -> PhysicsResult<()>;
    fn kick2(&self, parts: &mut [Part], dt: f64) -> PhysicsResult<()>;
    fn cooling(&self, _parts: &mut [Part], _dt: f64) -> PhysicsResult<()> {
        Ok(())
    }
    fn sourceterms(&self, _parts: &mut [Part], _dt: f64) -> PhysicsResult<()> {
        Ok(())
    }
    fn black_hole(&self, _sparts: &mut [SPart], _dt: f64) -> PhysicsResult<()> {
        Ok(())
    }
}
