//! Command-line interface.
//!
//! - `run` builds a [`HarnessConfig`] from an optional JSON file plus flag
//!   overrides and runs the harness, printing the counters on success.
//! - `replay` re-executes a journal.
//! - `show` dumps a journal as JSON lines.

mod args;

pub use args::{Cli, Command, EngineKind, RunArgs};

use std::io::{self, Write};

use tracing::warn;

use crate::engine::Engine;
use crate::engine::sim::SimEngine;
use crate::journal::read_journal;
use crate::replay::replay;
use crate::{Harness, HarnessConfig, HarnessError};

/// Parses the process arguments and runs the chosen command.
pub fn run() -> Result<(), HarnessError> {
    run_command(Cli::parse_args())
}

pub fn run_command(cli: Cli) -> Result<(), HarnessError> {
    match cli.command {
        Command::Run(args) => run_fuzz(args),
        Command::Replay {
            journal,
            database,
            engine,
        } => {
            let engine = make_engine(engine)?;
            let report = replay(&journal, engine.as_ref(), database)?;
            print!("{report}");
            if report.is_faithful() {
                Ok(())
            } else if !report.finding_reproduced() {
                Err(HarnessError::Replay(
                    "replay did not end at the recorded finding".into(),
                ))
            } else {
                Err(HarnessError::Replay(format!(
                    "{} operation(s) diverged from the journal",
                    report.divergences.len()
                )))
            }
        }
        Command::Show { journal } => show(&journal),
    }
}

/// Builds the run configuration: JSON file (or defaults), then flags.
pub fn build_config(args: &RunArgs) -> Result<HarnessConfig, HarnessError> {
    let mut config = match &args.config {
        Some(path) => HarnessConfig::from_json_file(path)?,
        None => HarnessConfig::default(),
    };

    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if let Some(n) = args.iterations {
        config.iterations = n;
    }
    if let Some(n) = args.interval {
        config.lifecycle_interval = n;
    }
    if let Some(w) = args.width {
        config.max_width = w;
    }
    if let Some(h) = args.height {
        config.max_height = h;
    }
    if let Some(n) = args.max_points {
        config.max_points = n;
    }
    if let Some(p) = args.insert_probability {
        config.insert_probability = p;
    }
    if let Some(p) = args.checkpoint_weight {
        config.lifecycle.checkpoint = p;
    }
    if let Some(p) = args.soft_reload_weight {
        config.lifecycle.soft_reload = p;
    }
    if let Some(path) = &args.database {
        config.database_path = path.clone();
    }
    if let Some(path) = &args.extension {
        config.extension_path = path.clone();
    }
    if let Some(path) = &args.journal {
        config.journal_path = Some(path.clone());
    }
    if let Some(dir) = &args.findings_dir {
        config.findings_dir = Some(dir.clone());
    }

    config.validate()?;
    Ok(config)
}

fn run_fuzz(args: RunArgs) -> Result<(), HarnessError> {
    let config = build_config(&args)?;
    let engine = make_engine(args.engine)?;
    let mut harness = Harness::new(config, engine)?;

    match harness.run() {
        Ok(report) => {
            println!("{report}");
            println!("Seed: {}", report.seed);
            Ok(())
        }
        Err(e) => {
            let counters = harness.counters();
            eprintln!(
                "Run with seed {} stopped at iteration {}",
                harness.seed(),
                harness.iteration()
            );
            eprintln!("Checkpoints: {}", counters.checkpoints);
            eprintln!("Restarts: {}", counters.soft_reloads);
            eprintln!("Hard restarts: {}", counters.hard_restarts);
            Err(e)
        }
    }
}

fn show(path: &std::path::Path) -> Result<(), HarnessError> {
    let contents = read_journal(path)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for event in &contents.events {
        serde_json::to_writer(&mut out, event)?;
        writeln!(out)?;
    }
    if let Some(corruption) = contents.corruption {
        warn!(error = %corruption, "journal ends in a damaged record");
        eprintln!("journal damaged: {corruption}");
    }
    Ok(())
}

/// Picks the backend. DuckDB is the default when compiled in.
pub fn make_engine(kind: Option<EngineKind>) -> Result<Box<dyn Engine>, HarnessError> {
    let default = if cfg!(feature = "duckdb") {
        EngineKind::Duckdb
    } else {
        EngineKind::Sim
    };
    match kind.unwrap_or(default) {
        EngineKind::Sim => Ok(Box::new(SimEngine::new())),
        EngineKind::Duckdb => duckdb_engine(),
    }
}

#[cfg(feature = "duckdb")]
fn duckdb_engine() -> Result<Box<dyn Engine>, HarnessError> {
    Ok(Box::new(crate::engine::duckdb::DuckDbEngine::new()))
}

#[cfg(not(feature = "duckdb"))]
fn duckdb_engine() -> Result<Box<dyn Engine>, HarnessError> {
    Err(HarnessError::InvalidConfig(
        "built without the `duckdb` feature; use --engine sim or rebuild with --features duckdb"
            .into(),
    ))
}
