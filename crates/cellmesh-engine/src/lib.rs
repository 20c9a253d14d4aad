//! The `cellmesh` engine: wires the space, task graph, scheduler, and
//! exchange crates into the step loop spec §4.7 describes, plus the
//! ambient CLI/config/logging/error surface a standalone binary needs.

pub mod cli;
pub mod engine;
pub mod error;
pub mod ic;
pub mod logging;
pub mod snapshot;

pub use cli::Cli;
pub use engine::{Engine, EngineConfig, StepOutcome};
pub use error::{fatal_line, EngineError, EngineResult};
pub use ic::{lattice_space, IcParams};
pub use snapshot::{LoggingSnapshotSink, SnapshotSink};

/// Bridges `cellmesh_config::schema::Boundary` onto `cellmesh_space::Boundary`.
/// The two enums exist in separate crates for the same reason `CellWeight`
/// and `GraphConfig` live apart from `Space`: config parsing must not pull
/// in the geometry crate's internals, so `cellmesh-config` declares its own
/// wire-format copy of the same two variants (spec §6 "Configuration").
pub fn boundary_from_config(b: cellmesh_config::Boundary) -> cellmesh_space::Boundary {
    match b {
        cellmesh_config::Boundary::Periodic => cellmesh_space::Boundary::Periodic,
        cellmesh_config::Boundary::Open => cellmesh_space::Boundary::Open,
    }
}
