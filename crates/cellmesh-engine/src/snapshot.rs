//! The snapshot collaborator (spec §6 "Persisted state": "snapshots are
//! opaque to the core; the engine asks the collaborator to write one").
//! On-disk file layouts are an explicit Non-goal (spec §1); this crate only
//! defines the named interface and a deterministic logging test double,
//! the same pattern `cellmesh-physics::test_double` uses for the physics
//! collaborator.

use cellmesh_space::Space;
use cellmesh_types::Ti;

use crate::error::EngineResult;

/// Spec §6 "the engine asks the collaborator to write one"; a real
/// deployment plugs in its own file format here.
pub trait SnapshotSink: Send + Sync {
    fn dump(&self, ti_current: Ti, space: &Space) -> EngineResult<()>;
}

/// Logs a one-line summary instead of writing a file; used by the
/// `cellmesh` binary and by tests exercising the snapshot branch of the
/// step loop without a real collaborator.
#[derive(Debug, Default)]
pub struct LoggingSnapshotSink;

impl SnapshotSink for LoggingSnapshotSink {
    fn dump(&self, ti_current: Ti, space: &Space) -> EngineResult<()> {
        tracing::info!(
            ti_current,
            nr_parts = space.parts.len(),
            nr_gparts = space.gparts.len(),
            nr_sparts = space.sparts.len(),
            "snapshot"
        );
        Ok(())
    }
}
