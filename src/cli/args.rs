//! CLI argument definitions using clap
//!
//! Commands:
//! - rtree-fuzz run [--config <path>] [overrides...]
//! - rtree-fuzz replay --journal <path>
//! - rtree-fuzz show --journal <path>

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Randomized persistence and recovery stress harness for the spatial R-tree index
#[derive(Parser, Debug)]
#[command(name = "rtree-fuzz")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the fuzz loop
    Run(RunArgs),

    /// Re-execute a recorded journal against a fresh database
    Replay {
        /// Journal written by a previous run
        #[arg(long)]
        journal: PathBuf,

        /// Database file to replay into (default: the recorded one)
        #[arg(long)]
        database: Option<PathBuf>,

        /// Engine backend
        #[arg(long, value_enum)]
        engine: Option<EngineKind>,
    },

    /// Print a journal as JSON lines
    Show {
        /// Journal to decode
        #[arg(long)]
        journal: PathBuf,
    },
}

/// Engine backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EngineKind {
    /// DuckDB with the spatial extension
    Duckdb,
    /// In-process simulated engine
    Sim,
}

/// Options of `run`. Each flag overrides the matching config field.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// JSON configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// RNG seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of loop iterations
    #[arg(long)]
    pub iterations: Option<u64>,

    /// Lifecycle cadence in iterations
    #[arg(long)]
    pub interval: Option<u64>,

    /// Sampler width bound
    #[arg(long)]
    pub width: Option<u32>,

    /// Sampler height bound
    #[arg(long)]
    pub height: Option<u32>,

    /// Upper bound (exclusive) on points per insert
    #[arg(long)]
    pub max_points: Option<u32>,

    /// Probability that an operation is an insert
    #[arg(long)]
    pub insert_probability: Option<f64>,

    /// Probability that a tick checkpoints
    #[arg(long)]
    pub checkpoint_weight: Option<f64>,

    /// Probability that a non-checkpoint tick soft-reloads
    #[arg(long)]
    pub soft_reload_weight: Option<f64>,

    /// Database file
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Extension binary to LOAD
    #[arg(long)]
    pub extension: Option<PathBuf>,

    /// Event journal to write
    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// Directory for failure reports
    #[arg(long)]
    pub findings_dir: Option<PathBuf>,

    /// Engine backend
    #[arg(long, value_enum)]
    pub engine: Option<EngineKind>,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
