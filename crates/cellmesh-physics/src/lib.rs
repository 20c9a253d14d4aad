//! Physics collaborator and repartitioner contracts (spec §6, component C6
//! external interfaces). Concrete SPH/gravity/cooling physics is out of
//! scope (spec §1 Non-goals); this crate defines the traits the scheduler
//! calls through and a deterministic reference kernel used by the core's
//! own tests.

pub mod error;
pub mod kernel;
pub mod repartition;
pub mod test_double;

pub use error::PhysicsError;
pub use kernel::{GravityKernel, LifecycleKernel, PhysicsKernel, PhysicsResult};
pub use repartition::{
    CellWeight, GreedyBalanceRepartitioner, NodeAssignment, RepartitionContext, RepartitionKind,
    Repartitioner, StationaryRepartitioner,
};
pub use test_double::{FailingKernel, ReferenceKernel};
