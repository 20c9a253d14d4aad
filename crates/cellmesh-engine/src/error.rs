//! Top-level error type (spec §7, SPEC_FULL component C13). Wraps every
//! subsystem error behind `#[from]`; `cellmesh-exchange`'s `ExchangeError`
//! covers what SPEC_FULL calls `TransportError` (see `DESIGN.md`).

use cellmesh_config::ConfigError;
use cellmesh_exchange::ExchangeError;
use cellmesh_physics::PhysicsError;
use cellmesh_space::SpaceError;
use cellmesh_tasks::SchedulerError;
use cellmesh_types::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Space(#[from] SpaceError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Physics(#[from] PhysicsError),
    #[error("node={node} at=engine::{condition} values={values}")]
    Invariant {
        node: NodeId,
        condition: &'static str,
        values: String,
    },
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Renders any fatal error as a single line: node id, location, offending
/// values (spec §7). Errors that already self-describe a node/location
/// (most `ExchangeError` variants do) still get attributed to the engine
/// step that surfaced them, since that's where the process actually stops.
pub fn fatal_line(node: NodeId, component: &str, err: &EngineError) -> String {
    format!("node={} at=engine::{component} values={err}", node.0)
}
