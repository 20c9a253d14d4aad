use cellmesh_types::InvariantError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpaceError {
    #[error(transparent)]
    Invariant(#[from] InvariantError),
    #[error("rebuild failed: {0}")]
    Rebuild(String),
    #[error("allocation failure: {0}")]
    Allocation(String),
}
