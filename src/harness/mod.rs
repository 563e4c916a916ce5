//! # Harness driver
//!
//! The [`Harness`] runs the fuzz loop:
//!
//! 1. **Setup**: remove any previous database, connect, `LOAD` the
//!    extension, create the table and its R-tree index, checkpoint.
//! 2. **Loop**: for `i` in `0..iterations`: if `i` is a multiple of the
//!    lifecycle interval, verify the row count and run one randomly chosen
//!    transition followed by the consistency checks; otherwise generate and
//!    execute one operation.
//! 3. **Finish**: final verification, close the connection, record the
//!    counters.
//!
//! Every random choice comes from one [`StdRng`] seeded from the config (or
//! a fresh seed that is logged and journaled), so a run is fully determined
//! by its seed and configuration.
//!
//! On any error the run stops immediately. Nothing is retried. The error
//! is journaled and, with `findings_dir` set, written as a
//! [`FailureReport`] together with the events since the last checkpoint.

mod checks;
mod report;

#[cfg(test)]
mod tests;

pub use checks::Checks;
pub use report::{FailureReport, RunReport};

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use self::checks::execution_error;

use crate::engine::{ConnectConfig, Engine, Statement};
use crate::executor::{self, ExecError};
use crate::journal::{Event, Journal};
use crate::lifecycle::{LifecycleAction, LifecycleController};
use crate::sampler::RectangleSampler;
use crate::session::{Counters, Session};
use crate::workload::WorkloadGenerator;
use crate::{HarnessConfig, HarnessError};

/// A step of database setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupStep {
    RemoveDatabase,
    Connect,
    LoadExtension,
    CreateTable,
    CreateIndex,
    Checkpoint,
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SetupStep::RemoveDatabase => "remove database",
            SetupStep::Connect => "connect",
            SetupStep::LoadExtension => "load extension",
            SetupStep::CreateTable => "create table",
            SetupStep::CreateIndex => "create index",
            SetupStep::Checkpoint => "checkpoint",
        })
    }
}

/// Prepares a fresh database: removes the old file, connects, loads the
/// extension and creates the indexed table. The schema is checkpointed so
/// that no restart can lose it.
pub fn setup(engine: &dyn Engine, session: &mut Session) -> Result<(), HarnessError> {
    engine
        .remove_database(session.database_path())
        .map_err(ExecError::from)
        .map_err(setup_failed(SetupStep::RemoveDatabase))?;

    let handle = engine
        .connect(Some(session.database_path()), session.connect_config())
        .map_err(ExecError::from)
        .map_err(setup_failed(SetupStep::Connect))?;
    session
        .replace_handle(handle)
        .map_err(ExecError::from)
        .map_err(setup_failed(SetupStep::Connect))?;

    let extension = session.extension_path().to_path_buf();
    executor::execute(session, &Statement::Load { extension })
        .map_err(setup_failed(SetupStep::LoadExtension))?;
    executor::execute(session, &Statement::CreateTable)
        .map_err(setup_failed(SetupStep::CreateTable))?;
    executor::execute(session, &Statement::CreateIndex)
        .map_err(setup_failed(SetupStep::CreateIndex))?;
    executor::execute(session, &Statement::Checkpoint)
        .map_err(setup_failed(SetupStep::Checkpoint))?;

    info!(
        engine = engine.name(),
        path = %session.database_path().display(),
        extension = %session.extension_path().display(),
        "harness: database ready"
    );
    Ok(())
}

fn setup_failed(step: SetupStep) -> impl FnOnce(ExecError) -> HarnessError {
    move |source| HarnessError::Setup { step, source }
}

// ------------------------------------------------------------------------------------------------
// Harness
// ------------------------------------------------------------------------------------------------

/// The fuzz loop and all state it carries.
pub struct Harness {
    config: HarnessConfig,
    engine: Box<dyn Engine>,
    session: Session,
    workload: WorkloadGenerator,
    rng: StdRng,
    seed: u64,
    checks: Checks,
    /// Events since the last checkpoint.
    history: Vec<Event>,
    journal: Option<Journal>,
    iteration: u64,
}

impl fmt::Debug for Harness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Harness")
            .field("engine", &self.engine.name())
            .field("seed", &self.seed)
            .field("iteration", &self.iteration)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Harness {
    /// Validates `config` and prepares a run. Nothing touches the engine
    /// until [`Harness::run`].
    pub fn new(config: HarnessConfig, engine: Box<dyn Engine>) -> Result<Self, HarnessError> {
        config.validate()?;

        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        let sampler = RectangleSampler::new(config.max_width, config.max_height)?;
        let workload =
            WorkloadGenerator::new(sampler, config.insert_probability, config.max_points)?;
        let checks = Checks::new(&config)?;
        let session = Session::new(
            &config.database_path,
            &config.extension_path,
            ConnectConfig {
                allow_unsigned_extensions: config.allow_unsigned_extensions,
            },
        );

        Ok(Self {
            config,
            engine,
            session,
            workload,
            rng: StdRng::seed_from_u64(seed),
            seed,
            checks,
            history: Vec::new(),
            journal: None,
            iteration: 0,
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Iteration reached so far (the failing one after an error).
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn counters(&self) -> Counters {
        self.session.counters()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Events since the last checkpoint.
    pub fn history(&self) -> &[Event] {
        &self.history
    }

    /// Runs the whole loop.
    pub fn run(&mut self) -> Result<RunReport, HarnessError> {
        info!(
            seed = self.seed,
            engine = self.engine.name(),
            iterations = self.config.iterations,
            interval = self.config.lifecycle_interval,
            "harness: starting"
        );

        match self.run_inner() {
            Ok(report) => {
                info!(seed = self.seed, counters = %report.counters, "harness: finished");
                Ok(report)
            }
            Err(e) => {
                error!(
                    seed = self.seed,
                    iteration = self.iteration,
                    counters = %self.session.counters(),
                    error = %e,
                    "harness: run failed"
                );
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    fn run_inner(&mut self) -> Result<RunReport, HarnessError> {
        if let Some(path) = &self.config.journal_path {
            self.journal = Some(Journal::create(path)?);
        }
        self.record(Event::Started {
            seed: self.seed,
            engine: self.engine.name().to_string(),
            config: self.config.clone(),
        })?;

        setup(self.engine.as_ref(), &mut self.session)?;

        for i in 0..self.config.iterations {
            self.iteration = i;
            if i % self.config.lifecycle_interval == 0 {
                self.checks.verify_rows(&mut self.session, i, None)?;
                let action = self.config.lifecycle.choose(&mut self.rng);
                self.transition(action)?;
                if let Some(journal) = &mut self.journal {
                    journal.sync()?;
                }
            } else {
                self.step()?;
            }
        }

        self.iteration = self.config.iterations;
        self.checks.finish(&mut self.session, &mut self.rng, self.iteration)?;
        self.session
            .close_handle()
            .map_err(|e| execution_error(self.iteration, "close", e.into()))?;

        let counters = self.session.counters();
        self.record(Event::Finished {
            iterations: self.config.iterations,
            counters,
        })?;
        if let Some(journal) = &mut self.journal {
            journal.sync()?;
        }

        Ok(RunReport {
            seed: self.seed,
            iterations: self.config.iterations,
            expected_rows: self.checks.model().expected(),
            counters,
        })
    }

    /// Generates, executes and accounts for one operation.
    fn step(&mut self) -> Result<(), HarnessError> {
        let iteration = self.iteration;
        let operation = self.workload.generate(&mut self.rng)?;
        let affected = executor::execute_operation(&mut self.session, &operation)
            .map_err(|e| execution_error(iteration, &operation.to_string(), e))?;

        debug!(iteration, %operation, rows = affected, "harness: operation");
        self.record(Event::Operation {
            iteration,
            operation: operation.clone(),
            affected,
        })?;

        self.checks
            .after_operation(&mut self.session, iteration, &operation, affected)
    }

    /// Runs one lifecycle transition and the checks that follow it.
    fn transition(&mut self, action: LifecycleAction) -> Result<(), HarnessError> {
        let iteration = self.iteration;
        let operations = self.session.counters().operations();
        let controller = LifecycleController::new(self.engine.as_ref())
            .disable_checkpoint_on_soft_reload(self.config.disable_checkpoint_on_soft_reload);

        controller
            .apply(&mut self.session, action)
            .map_err(|source| HarnessError::Lifecycle {
                iteration,
                operations,
                source,
            })?;

        let durable = controller.is_durable(action);

        // Journaled before checking, so a finding is always preceded by the
        // transition that led to it.
        self.record(Event::Lifecycle { iteration, action })?;
        self.checks
            .after_transition(&mut self.session, &mut self.rng, iteration, action, durable)?;

        if durable {
            let before = self.history.len().saturating_sub(1);
            self.history.drain(..before);
        }
        Ok(())
    }

    /// Adds an event to the history and the journal.
    fn record(&mut self, event: Event) -> Result<(), HarnessError> {
        if let Some(journal) = &mut self.journal {
            journal.append(&event)?;
        }
        self.history.push(event);
        Ok(())
    }

    /// Journals the error and writes a failure report. Problems doing so
    /// are logged; the original error is what the caller sees.
    fn record_failure(&mut self, error: &HarnessError) {
        let event = match error.finding() {
            Some(finding) => Event::Finding {
                finding: finding.clone(),
            },
            None => Event::Failed {
                iteration: self.iteration,
                error: error.to_string(),
            },
        };
        if let Some(journal) = &mut self.journal {
            if let Err(e) = journal.append(&event).and_then(|()| journal.sync()) {
                warn!(error = %e, "harness: could not journal failure");
            }
        }

        let Some(dir) = self.config.findings_dir.clone() else {
            return;
        };
        let report = FailureReport {
            seed: self.seed,
            engine: self.engine.name().to_string(),
            iteration: self.iteration,
            error: error.to_string(),
            finding: error.finding().cloned(),
            counters: self.session.counters(),
            config: self.config.clone(),
            history: self.history.clone(),
        };
        match report.write_to(&dir) {
            Ok(path) => warn!(path = %path.display(), "harness: failure report written"),
            Err(e) => warn!(error = %e, "harness: could not write failure report"),
        }
    }
}
