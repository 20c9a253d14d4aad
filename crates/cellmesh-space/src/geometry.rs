//! Periodic wrap-around, top-grid dimensioning (spec §4.1 `space_rebuild`
//! "Recomputes cell dimensions ... applies periodic wrap-around").

use cellmesh_types::Vec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Periodic,
    Open,
}

/// Wraps `x` into `[0, box_size)` component-wise. A no-op under open
/// boundaries.
pub fn wrap(x: Vec3, box_size: Vec3, boundary: Boundary) -> Vec3 {
    if boundary == Boundary::Open {
        return x;
    }
    let wrap1 = |v: f64, b: f64| -> f64 {
        let mut r = v % b;
        if r < 0.0 {
            r += b;
        }
        // Guard against the rare r == b from floating point round-trip.
        if r >= b {
            r -= b;
        }
        r
    };
    Vec3::new(
        wrap1(x.x, box_size.x),
        wrap1(x.y, box_size.y),
        wrap1(x.z, box_size.z),
    )
}

/// Chooses the top-level grid dimension so each top cell's width is roughly
/// `h_max * safety_factor` (spec §4.1: "chooses top-grid dimension cdim so
/// cell width is approximately the maximum smoothing length ... times a
/// safety factor").
pub fn choose_cdim(box_size: Vec3, h_max: f64, safety_factor: f64) -> [usize; 3] {
    let target_width = (h_max * safety_factor).max(1e-12);
    let dim = |b: f64| -> usize { ((b / target_width).floor() as usize).max(1) };
    [dim(box_size.x), dim(box_size.y), dim(box_size.z)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_brings_negative_into_range() {
        let w = wrap(Vec3::new(-0.1, 1.1, 2.3), Vec3::new(1.0, 1.0, 1.0), Boundary::Periodic);
        assert!((w.x - 0.9).abs() < 1e-12);
        assert!((w.y - 0.1).abs() < 1e-12);
        assert!((w.z - 0.3).abs() < 1e-9);
    }

    #[test]
    fn wrap_is_noop_for_open_boundary() {
        let x = Vec3::new(-0.1, 1.1, 2.3);
        assert_eq!(wrap(x, Vec3::new(1.0, 1.0, 1.0), Boundary::Open), x);
    }

    #[test]
    fn cdim_at_least_one_per_axis() {
        let cdim = choose_cdim(Vec3::new(0.1, 0.1, 0.1), 10.0, 3.0);
        assert_eq!(cdim, [1, 1, 1]);
    }

    #[test]
    fn cdim_scales_with_box_over_h() {
        let cdim = choose_cdim(Vec3::new(8.0, 8.0, 8.0), 1.0, 2.0);
        assert_eq!(cdim, [4, 4, 4]);
    }
}
