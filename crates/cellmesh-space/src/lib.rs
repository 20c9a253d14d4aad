//! Spatial decomposition: particle arrays, cell tree, per-axis sort caches,
//! and drift (spec §3/§4.1, components C2/C3).

pub mod drift;
pub mod error;
pub mod geometry;
pub mod permutation;
pub mod sort;
pub mod tree;

pub use drift::{any_cell_active, cell_drift, needs_rebuild};
pub use error::SpaceError;
pub use geometry::{choose_cdim, wrap, Boundary};
pub use permutation::{
    apply_gparts_permutation, apply_parts_permutation, apply_sparts_permutation, check_linkage,
    histogram, stable_bucket_permutation, Permutation,
};
pub use sort::{SortCache, SortEntry};
pub use tree::Space;
