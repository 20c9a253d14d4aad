//! Keyed configuration sections (spec §6 "Configuration", SPEC_FULL §4 C11).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeIntegrationSection {
    pub time_begin: f64,
    pub time_end: f64,
    pub dt_min: f64,
    pub dt_max: f64,
    #[serde(default = "default_max_nr_timesteps")]
    pub max_nr_timesteps: u64,
}

fn default_max_nr_timesteps() -> u64 {
    1 << 28
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotsSection {
    pub time_first: f64,
    pub delta_time: f64,
    pub basename: String,
    #[serde(default)]
    pub compression: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerSection {
    #[serde(default = "default_nr_queues")]
    pub nr_queues: usize,
    #[serde(default = "default_max_steal_attempts")]
    pub max_steal_attempts: usize,
}

fn default_nr_queues() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_max_steal_attempts() -> usize {
    16
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatisticsSection {
    pub delta_time: f64,
    pub energy_file_name: String,
    pub timestep_file_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    Periodic,
    Open,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DomainSection {
    pub box_size: [f64; 3],
    #[serde(default = "default_boundary")]
    pub boundary: Boundary,
    #[serde(default = "default_target_leaf_count")]
    pub target_leaf_count: u32,
    #[serde(default = "default_maxreldx")]
    pub space_maxreldx: f64,
    #[serde(default = "default_parts_size_grow")]
    pub parts_size_grow: f64,
}

fn default_boundary() -> Boundary {
    Boundary::Periodic
}

fn default_target_leaf_count() -> u32 {
    100
}

fn default_maxreldx() -> f64 {
    0.25
}

fn default_parts_size_grow() -> f64 {
    1.1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartitionSection {
    #[serde(default = "default_nr_nodes")]
    pub nr_nodes: u32,
    /// Fractional CPU-time imbalance threshold `ft` (spec §4.6).
    #[serde(default = "default_imbalance_threshold")]
    pub imbalance_threshold: f64,
    #[serde(default = "default_partitioner")]
    pub partitioner: String,
}

fn default_nr_nodes() -> u32 {
    1
}

fn default_imbalance_threshold() -> f64 {
    0.1
}

fn default_partitioner() -> String {
    "simple".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// `-v 0|1|2|3` verbosity (spec §6 CLI surface).
    #[serde(default)]
    pub verbosity: u8,
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub time_integration: TimeIntegrationSection,
    pub snapshots: SnapshotsSection,
    #[serde(default = "SchedulerSection::default_for_config")]
    pub scheduler: SchedulerSection,
    pub statistics: StatisticsSection,
    pub domain: DomainSection,
    #[serde(default = "PartitionSection::default_for_config")]
    pub partition: PartitionSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl SchedulerSection {
    fn default_for_config() -> Self {
        Self {
            nr_queues: default_nr_queues(),
            max_steal_attempts: default_max_steal_attempts(),
        }
    }
}

impl PartitionSection {
    fn default_for_config() -> Self {
        Self {
            nr_nodes: default_nr_nodes(),
            imbalance_threshold: default_imbalance_threshold(),
            partitioner: default_partitioner(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            verbosity: 0,
            json: false,
        }
    }
}
