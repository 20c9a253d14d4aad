//! The `cellmesh` binary's command line (spec §6 "CLI surface", SPEC_FULL
//! C12). Flags match spec §6 literally; `-h` is therefore smoothing length,
//! not help, so the auto-generated help flag is disabled.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "cellmesh", version, disable_help_flag = true)]
pub struct Cli {
    /// Particles per axis of the initial lattice.
    #[arg(short = 'n', long = "particles-per-axis")]
    pub particles_per_axis: u32,

    /// Number of engine steps to run.
    #[arg(short = 'r', long = "runs")]
    pub runs: u32,

    /// Smoothing length (defaults to a multiple of the lattice spacing).
    #[arg(short = 'h', long = "smoothing-length")]
    pub smoothing_length: Option<f64>,

    /// Initial density.
    #[arg(short = 'm', long = "rho")]
    pub rho: Option<f64>,

    /// Domain size (a cube of this edge length).
    #[arg(short = 's', long = "size")]
    pub size: Option<f64>,

    /// Lattice position perturbation fraction.
    #[arg(short = 'd', long = "perturbation")]
    pub perturbation: Option<f64>,

    /// Verbosity 0-3 (spec §6).
    #[arg(short = 'v', long = "verbosity", value_parser = clap::value_parser!(u8).range(0..=3))]
    pub verbosity: Option<u8>,

    /// Smoothing-length perturbation.
    #[arg(short = 'p', long = "h-pert")]
    pub h_pert: Option<f64>,

    /// Output tag used as the snapshot basename suffix.
    #[arg(short = 'f', long = "output-tag")]
    pub output_tag: Option<String>,

    /// Path to a TOML configuration file (component C11).
    #[arg(long = "config")]
    pub config: PathBuf,
}
