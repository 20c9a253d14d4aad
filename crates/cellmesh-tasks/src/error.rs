use cellmesh_physics::PhysicsError;
use cellmesh_space::SpaceError;
use thiserror::Error;

/// Spec §7 error taxonomy, the scheduling-layer subset. `EngineError` (in
/// `cellmesh-engine`) wraps this alongside `ExchangeError`/`ConfigError`.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Space(#[from] SpaceError),
    #[error(transparent)]
    Physics(#[from] PhysicsError),
    #[error("link pool exhausted for cell {0}: graph overflow")]
    GraphOverflow(u32),
    #[error("unlock graph contains a cycle at task {0}")]
    CyclicUnlockGraph(u32),
    #[error("a recv task timed out waiting on tag {0}")]
    RecvTimeout(u32),
}
