//! # rtree-fuzz
//!
//! A randomized stress harness for a spatially indexed table living inside
//! an external database engine. It drives DuckDB with the spatial
//! extension's R-tree index through a long sequence of random inserts and
//! deletes, interrupted on a fixed cadence by checkpoints, soft reloads and
//! hard restarts, and checks after every transition that nothing was lost,
//! duplicated or left behind in the index.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtree_fuzz::engine::sim::SimEngine;
//! use rtree_fuzz::{Harness, HarnessConfig};
//!
//! let config = HarnessConfig {
//!     iterations: 2_000,
//!     seed: Some(42),
//!     ..HarnessConfig::default()
//! };
//!
//! let mut harness = Harness::new(config, Box::new(SimEngine::new())).unwrap();
//! let report = harness.run().unwrap();
//! println!("{report}");
//! ```
//!
//! ## Components
//!
//! - [`sampler`]: random non-degenerate rectangles within fixed bounds.
//! - [`workload`]: insert / delete operations built from those rectangles.
//! - [`executor`]: runs one statement on the live connection.
//! - [`lifecycle`]: checkpoint, soft reload and hard restart transitions.
//! - [`session`]: the single live connection plus counters.
//! - [`oracle`]: expected-state model and index-versus-scan checks.
//! - [`journal`]: CRC-framed, replayable event log.
//! - [`harness`]: the driver loop tying everything together.
//! - [`replay`]: re-executes a recorded journal.
//! - [`engine`]: the collaborator contract and its backends.

pub mod cli;
pub mod engine;
pub mod executor;
pub mod harness;
pub mod journal;
pub mod lifecycle;
pub mod oracle;
pub mod replay;
pub mod sampler;
pub mod session;
pub mod workload;

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use harness::{Harness, RunReport};
pub use lifecycle::{LifecycleAction, LifecycleWeights};
pub use oracle::{Finding, FindingKind};
pub use session::Counters;

use executor::ExecError;
use harness::SetupStep;
use journal::JournalError;
use lifecycle::LifecycleFailure;
use sampler::GenerationError;

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`Harness`] run.
///
/// Every field has a default, so a JSON config file only needs the fields
/// it changes. The configuration is validated by [`Harness::new`].
///
/// # Example
///
/// ```rust
/// use rtree_fuzz::HarnessConfig;
///
/// let config = HarnessConfig {
///     iterations: 1_000,
///     lifecycle_interval: 100,
///     ..HarnessConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Length of the driver loop.
    ///
    /// Default: 10 000. Must be ≥ 1.
    pub iterations: u64,

    /// Iteration `i` is a lifecycle tick when `i % lifecycle_interval == 0`,
    /// including iteration 0. Every other iteration runs one operation.
    ///
    /// Default: 500. Must be ≥ 1.
    pub lifecycle_interval: u64,

    /// Sampler bounds. Default: 1000 × 1000. Both must be ≥ 2.
    pub max_width: u32,
    pub max_height: u32,

    /// Inserts draw their point count from `[0, max_points)`.
    ///
    /// Default: 1000. Must be ≥ 1.
    pub max_points: u32,

    /// Probability that an operation is an insert.
    ///
    /// Default: 0.5. Must be in [0, 1].
    pub insert_probability: f64,

    /// Nested coin-flip weights choosing the lifecycle transition.
    pub lifecycle: LifecycleWeights,

    /// RNG seed. A random one is drawn (and reported) when unset.
    pub seed: Option<u64>,

    /// Database file. Removed, with its WAL, before the run starts.
    ///
    /// Default: `fuzz.db`.
    pub database_path: PathBuf,

    /// Extension binary loaded into every connection.
    pub extension_path: PathBuf,

    /// Allow loading unsigned extension binaries. Default: true.
    pub allow_unsigned_extensions: bool,

    /// Where to write the event journal, if anywhere.
    pub journal_path: Option<PathBuf>,

    /// Directory for failure reports, if any.
    pub findings_dir: Option<PathBuf>,

    /// Random index-versus-scan probes after each lifecycle event, on top
    /// of the full-extent probe. Default: 2.
    pub probes_per_check: u32,

    /// Verify the row count after every operation. Default: false.
    pub verify_every_op: bool,

    /// Compare the index's leaf entry count with the row count after each
    /// lifecycle event. Default: false.
    pub check_index_entries: bool,

    /// Issue `PRAGMA disable_checkpoint_on_shutdown` before soft reloads as
    /// well as hard restarts. Default: false.
    pub disable_checkpoint_on_soft_reload: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            iterations: 10_000,
            lifecycle_interval: 500,
            max_width: 1000,
            max_height: 1000,
            max_points: 1000,
            insert_probability: 0.5,
            lifecycle: LifecycleWeights::default(),
            seed: None,
            database_path: PathBuf::from("fuzz.db"),
            extension_path: PathBuf::from(
                "build/release/extension/spatial/spatial.duckdb_extension",
            ),
            allow_unsigned_extensions: true,
            journal_path: None,
            findings_dir: None,
            probes_per_check: 2,
            verify_every_op: false,
            check_index_entries: false,
            disable_checkpoint_on_soft_reload: false,
        }
    }
}

impl HarnessConfig {
    /// Validates all configuration parameters.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.iterations < 1 {
            return Err(HarnessError::InvalidConfig("iterations must be >= 1".into()));
        }
        if self.lifecycle_interval < 1 {
            return Err(HarnessError::InvalidConfig(
                "lifecycle_interval must be >= 1".into(),
            ));
        }
        if self.max_width < 2 || self.max_height < 2 {
            return Err(HarnessError::InvalidConfig(
                "max_width and max_height must be >= 2".into(),
            ));
        }
        if self.max_points < 1 {
            return Err(HarnessError::InvalidConfig("max_points must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&self.insert_probability) {
            return Err(HarnessError::InvalidConfig(
                "insert_probability must be in [0, 1]".into(),
            ));
        }
        self.lifecycle.validate().map_err(HarnessError::InvalidConfig)?;
        Ok(())
    }

    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self, HarnessError> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(io::BufReader::new(file))?)
    }
}

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors that end a harness run.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Invalid configuration parameter.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Sampler or workload invariant violated. Always a harness bug.
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Preparing the database before the first iteration failed.
    #[error("setup failed at {step}: {source}")]
    Setup {
        step: SetupStep,
        #[source]
        source: ExecError,
    },

    /// The engine rejected a statement.
    #[error("execution failed at iteration {iteration} ({operation}): {source}")]
    Execution {
        iteration: u64,
        operation: String,
        #[source]
        source: ExecError,
    },

    /// A lifecycle transition failed.
    #[error(
        "lifecycle failure at iteration {iteration} after {operations} operations: {source}"
    )]
    Lifecycle {
        iteration: u64,
        operations: u64,
        #[source]
        source: LifecycleFailure,
    },

    /// Observed state diverged from the model.
    #[error("consistency finding: {0}")]
    Consistency(Box<Finding>),

    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A journal could not be replayed.
    #[error("replay error: {0}")]
    Replay(String),
}

impl HarnessError {
    /// The finding, for consistency errors.
    pub fn finding(&self) -> Option<&Finding> {
        match self {
            HarnessError::Consistency(finding) => Some(finding),
            _ => None,
        }
    }

    /// Process exit code: 2 for a consistency finding, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            HarnessError::Consistency(_) => 2,
            _ => 1,
        }
    }
}
