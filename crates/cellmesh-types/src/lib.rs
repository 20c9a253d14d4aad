//! Particle, cell, and integer-timeline data model (spec §3, component C1).
//!
//! This crate owns only data and arena-index relationships; it has no
//! knowledge of scheduling, the task graph, or cross-node exchange. See
//! `cellmesh-space` for the `Space` that owns the particle arrays and
//! assembles cells into a tree, and `cellmesh-tasks` for the task graph that
//! references `CellIndex`/`TaskIndex` defined here.

pub mod cell;
pub mod error;
pub mod index;
pub mod particle;
pub mod time;

pub use cell::{AxisMask, Cell, SliceView, NUM_SORT_AXES, SORT_AXES};
pub use error::InvariantError;
pub use index::{CellIndex, NodeId, ProxyIndex, TaskIndex};
pub use particle::{GPart, Part, ParticleKind, PartnerRef, SPart, Vec3, XPart};
pub use time::{Ti, TimeBin, TimeLine, TimelineError};
