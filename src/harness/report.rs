//! Run summaries and failure reports.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::journal::Event;
use crate::oracle::Finding;
use crate::session::Counters;
use crate::{HarnessConfig, HarnessError};

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub seed: u64,
    pub iterations: u64,
    /// Row count the table ended with.
    pub expected_rows: u64,
    pub counters: Counters,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Checkpoints: {}", self.counters.checkpoints)?;
        writeln!(f, "Restarts: {}", self.counters.soft_reloads)?;
        write!(f, "Hard restarts: {}", self.counters.hard_restarts)
    }
}

/// Everything a triager needs to reproduce a failed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub seed: u64,
    pub engine: String,
    pub iteration: u64,
    pub error: String,
    pub finding: Option<Finding>,
    pub counters: Counters,
    pub config: HarnessConfig,
    /// Events since the last checkpoint, oldest first.
    pub history: Vec<Event>,
}

impl FailureReport {
    pub fn file_name(&self) -> String {
        format!("failure-{}-{}.json", self.seed, self.iteration)
    }

    /// Writes the report as pretty JSON into `dir`, creating it if needed.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, HarnessError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        let mut out = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut out, self)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}
