//! Configuration management for cellmesh (component C11).
//!
//! TOML-based configuration with `CELLMESH_*` environment variable
//! overrides, validated before any particle is touched (spec §7).

pub mod config;
pub mod error;
pub mod schema;

pub use config::{apply_env_overrides, load_from_file, load_from_str, validate};
pub use error::ConfigError;
pub use schema::{
    Boundary, Config, DomainSection, LoggingSection, PartitionSection, SchedulerSection,
    SnapshotsSection, StatisticsSection, TimeIntegrationSection,
};
