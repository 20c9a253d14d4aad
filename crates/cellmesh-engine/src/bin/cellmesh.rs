//! The `cellmesh` binary: parses the CLI, loads configuration, builds
//! initial conditions, and drives the engine for `-r` steps (spec §6 "CLI
//! surface"). Exit codes follow spec §7: 0 on success, 1 on an argument
//! error, any other nonzero on a fatal runtime error, with a single
//! diagnostic line identifying node, location, and offending values.

use std::sync::Arc;

use anyhow::Context;
use cellmesh_engine::{boundary_from_config, fatal_line, Cli, Engine, EngineConfig, IcParams, LoggingSnapshotSink};
use cellmesh_exchange::{LocalNetwork, LocalTransport};
use cellmesh_physics::{GreedyBalanceRepartitioner, ReferenceKernel};
use cellmesh_tasks::{GraphConfig, Kernels};
use cellmesh_types::{NodeId, TimeLine};
use clap::Parser;

const EXIT_ARGUMENT_ERROR: i32 = 1;
const EXIT_RUNTIME_ERROR: i32 = 2;

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(EXIT_ARGUMENT_ERROR);
        }
    };

    let config_path = cli.config.clone();
    let config = match cellmesh_config::load_from_file(&cli.config).context(format!(
        "loading config from {}",
        config_path.display()
    )) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("node=0 at=config::load values={err:#}");
            std::process::exit(EXIT_ARGUMENT_ERROR);
        }
    };

    cellmesh_engine::logging::init(
        cli.verbosity.unwrap_or(config.logging.verbosity),
        config.logging.json,
    );

    if let Err(code) = run(cli, config) {
        std::process::exit(code);
    }
}

/// `anyhow` only appears here, at the CLI boundary, to attach
/// human-readable context before the single-line diagnostic (spec §7) is
/// printed; `Engine`/subsystem code always returns the typed `EngineError`.
fn run(cli: Cli, config: cellmesh_config::Config) -> Result<(), i32> {
    let node_id = NodeId(0);
    let nr_nodes = config.partition.nr_nodes;

    let params = IcParams {
        particles_per_axis: cli.particles_per_axis,
        smoothing_length: cli.smoothing_length.unwrap_or(0.0),
        rho: cli.rho.unwrap_or(1.0),
        size: cli.size.unwrap_or(config.domain.box_size[0]),
        perturbation: cli.perturbation.unwrap_or(0.0),
        h_pert: cli.h_pert.unwrap_or(0.0),
    };
    let mut space = cellmesh_engine::lattice_space(node_id, nr_nodes, config.domain.target_leaf_count, &params);
    space.boundary = boundary_from_config(config.domain.boundary);

    let timeline = TimeLine::new(
        config.time_integration.time_begin,
        config.time_integration.time_end,
        config.time_integration.max_nr_timesteps,
    )
    .context("building the simulation timeline from [time_integration]")
    .map_err(|err| {
        eprintln!("node={} at=config::timeline values={err:#}", node_id.0);
        EXIT_ARGUMENT_ERROR
    })?;

    let engine_cfg = EngineConfig {
        imbalance_threshold: config.partition.imbalance_threshold,
        max_reldx: config.domain.space_maxreldx,
        snapshot_step: timeline.float_to_ti(config.snapshots.delta_time),
        always_drift: false,
        nr_workers: config.scheduler.nr_queues,
    };

    let kernels = Kernels { hydro: &ReferenceKernel, gravity: None, lifecycle: &ReferenceKernel };
    // A standalone process only ever drives one node; `LocalTransport` over
    // an otherwise-unpeered `LocalNetwork` is wired up so the `-partition
    // nr_nodes > 1` case exercises the exchange path without a real
    // deployment's peer discovery (see DESIGN.md).
    let transport: Option<Arc<dyn cellmesh_exchange::Transport>> = if nr_nodes > 1 {
        let network = LocalNetwork::new();
        Some(Arc::new(LocalTransport::new(network, node_id)))
    } else {
        None
    };

    let mut engine = Engine::new(
        space,
        timeline,
        GraphConfig::default(),
        engine_cfg,
        Box::new(GreedyBalanceRepartitioner),
        transport,
        Box::new(LoggingSnapshotSink),
        kernels,
    )
    .map_err(|err| {
        eprintln!("{}", fatal_line(node_id, "init", &err));
        EXIT_RUNTIME_ERROR
    })?;

    for run_idx in 0..cli.runs {
        if let Err(err) = engine.step() {
            eprintln!("{}", fatal_line(node_id, "step", &err));
            tracing::error!(run_idx, "fatal error during step");
            return Err(EXIT_RUNTIME_ERROR);
        }
    }
    Ok(())
}
