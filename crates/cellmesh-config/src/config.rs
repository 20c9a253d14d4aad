//! Config loading, environment overrides, and validation.
//!
//! Loading hierarchy: file, then environment variable overrides, then
//! validation before anything else runs.

use std::path::Path;

use crate::error::ConfigError;
use crate::schema::Config;

pub fn load_from_file(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut config: Config = toml::from_str(&content)?;
    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

pub fn load_from_str(content: &str) -> Result<Config, ConfigError> {
    let mut config: Config = toml::from_str(content)?;
    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

/// Overrides a handful of hot parameters from the environment, `CELLMESH_*`
/// prefixed.
pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = std::env::var("CELLMESH_NR_QUEUES") {
        if let Ok(n) = v.parse() {
            config.scheduler.nr_queues = n;
        }
    }
    if let Ok(v) = std::env::var("CELLMESH_NR_NODES") {
        if let Ok(n) = v.parse() {
            config.partition.nr_nodes = n;
        }
    }
    if let Ok(v) = std::env::var("CELLMESH_VERBOSITY") {
        if let Ok(n) = v.parse() {
            config.logging.verbosity = n;
        }
    }
}

pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.time_integration.time_end <= config.time_integration.time_begin {
        return Err(ConfigError::Validation(format!(
            "time_integration.time_end ({}) must exceed time_begin ({})",
            config.time_integration.time_end, config.time_integration.time_begin
        )));
    }
    if config.time_integration.dt_min <= 0.0 || config.time_integration.dt_max <= 0.0 {
        return Err(ConfigError::Validation(
            "time_integration.dt_min and dt_max must be positive".to_string(),
        ));
    }
    if config.time_integration.dt_min > config.time_integration.dt_max {
        return Err(ConfigError::Validation(
            "time_integration.dt_min must not exceed dt_max".to_string(),
        ));
    }
    if !config.time_integration.max_nr_timesteps.is_power_of_two() {
        return Err(ConfigError::Validation(format!(
            "time_integration.max_nr_timesteps ({}) must be a power of two",
            config.time_integration.max_nr_timesteps
        )));
    }
    if config.scheduler.nr_queues == 0 {
        return Err(ConfigError::Validation(
            "scheduler.nr_queues must be at least 1".to_string(),
        ));
    }
    if config.domain.box_size.iter().any(|&s| s <= 0.0) {
        return Err(ConfigError::Validation(
            "domain.box_size components must be positive".to_string(),
        ));
    }
    if config.domain.target_leaf_count == 0 {
        return Err(ConfigError::Validation(
            "domain.target_leaf_count must be at least 1".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&config.partition.imbalance_threshold) {
        return Err(ConfigError::Validation(
            "partition.imbalance_threshold must be in [0, 1]".to_string(),
        ));
    }
    if config.partition.nr_nodes == 0 {
        return Err(ConfigError::Validation(
            "partition.nr_nodes must be at least 1".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [time_integration]
        time_begin = 0.0
        time_end = 1.0
        dt_min = 1e-6
        dt_max = 1e-2

        [snapshots]
        time_first = 0.0
        delta_time = 0.1
        basename = "snap"

        [statistics]
        delta_time = 0.01
        energy_file_name = "energy.txt"
        timestep_file_name = "timesteps.txt"

        [domain]
        box_size = [1.0, 1.0, 1.0]
    "#;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let config = load_from_str(MINIMAL).unwrap();
        assert_eq!(config.partition.nr_nodes, 1);
        assert!(config.scheduler.nr_queues >= 1);
        assert_eq!(config.domain.target_leaf_count, 100);
    }

    #[test]
    fn rejects_inverted_time_bounds() {
        let bad = MINIMAL.replace("time_end = 1.0", "time_end = -1.0");
        assert!(matches!(
            load_from_str(&bad),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn env_override_applies_after_parse() {
        std::env::set_var("CELLMESH_NR_QUEUES", "7");
        let config = load_from_str(MINIMAL).unwrap();
        std::env::remove_var("CELLMESH_NR_QUEUES");
        assert_eq!(config.scheduler.nr_queues, 7);
    }

    #[test]
    fn rejects_unknown_fields() {
        let bad = format!("{MINIMAL}\n[bogus]\nfield = 1\n");
        assert!(load_from_str(&bad).is_err());
    }
}
