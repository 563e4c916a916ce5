//! # Journal replay
//!
//! Re-executes a recorded run against a fresh database: the same setup,
//! then every journaled operation and lifecycle transition in order. Each
//! operation's affected-row count is compared with the recorded one. A
//! mismatch is a [`Divergence`]; it usually means the engine changed
//! behaviour between the two runs, or that it is not deterministic.
//!
//! Replay stops at the first recorded finding or failure, which is where
//! the original run stopped, and reports it alongside the divergences so
//! the triager can re-run the failing transition under a debugger.


use std::fmt;
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::{ConnectConfig, Engine};
use crate::executor;
use crate::harness::{self, Checks};
use crate::journal::{Event, read_journal};
use crate::lifecycle::{LifecycleAction, LifecycleController, LifecycleWeights};
use crate::oracle::Finding;
use crate::sampler::RectangleSampler;
use crate::session::{Counters, Session};
use crate::workload::{Operation, WorkloadGenerator};
use crate::{HarnessConfig, HarnessError};

/// An operation whose affected-row count differed on replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    pub iteration: u64,
    pub operation: Operation,
    pub recorded: u64,
    pub replayed: u64,
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "iteration {}: {} affected {} rows, recorded {}",
            self.iteration, self.operation, self.replayed, self.recorded
        )
    }
}

/// Outcome of a replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub seed: u64,
    pub operations: u64,
    pub transitions: u64,
    pub divergences: Vec<Divergence>,
    /// Finding the original run stopped at, if any.
    pub recorded_finding: Option<Finding>,
    /// Finding the replay's own checks stopped at, if any.
    pub reproduced: Option<Finding>,
    /// Error the original run stopped at, if any.
    pub recorded_failure: Option<String>,
    /// Damage reading the journal stopped at, if any.
    pub corruption: Option<String>,
    pub counters: Counters,
}

impl ReplayReport {
    /// The replay hit the recorded finding at the same iteration, or both
    /// runs were clean.
    pub fn finding_reproduced(&self) -> bool {
        match (&self.recorded_finding, &self.reproduced) {
            (None, None) => true,
            (Some(recorded), Some(reproduced)) => {
                recorded.kind == reproduced.kind && recorded.iteration == reproduced.iteration
            }
            _ => false,
        }
    }

    /// Replay reproduced every recorded row count and the recorded outcome.
    pub fn is_faithful(&self) -> bool {
        self.divergences.is_empty() && self.finding_reproduced()
    }
}

impl fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Replayed seed {}: {} operations, {} transitions, {} divergences",
            self.seed,
            self.operations,
            self.transitions,
            self.divergences.len()
        )?;
        for divergence in &self.divergences {
            writeln!(f, "  {divergence}")?;
        }
        if let Some(finding) = &self.recorded_finding {
            writeln!(f, "Recorded finding: {finding}")?;
        }
        match &self.reproduced {
            Some(finding) => writeln!(f, "Reproduced finding: {finding}")?,
            None if self.recorded_finding.is_some() => writeln!(f, "Finding not reproduced")?,
            None => {}
        }
        if let Some(failure) = &self.recorded_failure {
            writeln!(f, "Recorded failure: {failure}")?;
        }
        if let Some(corruption) = &self.corruption {
            writeln!(f, "Journal damaged: {corruption}")?;
        }
        Ok(())
    }
}

/// Replays the journal at `journal_path` on `engine`.
///
/// The database path recorded in the journal is used unless `database`
/// overrides it. Any existing database there is removed first.
///
/// The same checks as the recorded run are applied at the same points,
/// with random probe ranges drawn from an RNG advanced exactly as the run
/// advanced it. The first finding they raise ends the replay and is
/// returned in [`ReplayReport::reproduced`].
pub fn replay(
    journal_path: &Path,
    engine: &dyn Engine,
    database: Option<PathBuf>,
) -> Result<ReplayReport, HarnessError> {
    let contents = read_journal(journal_path)?;
    let mut events = contents.events.into_iter();

    let Some(Event::Started { seed, config, .. }) = events.next() else {
        return Err(HarnessError::Replay(format!(
            "{} does not begin with a start record",
            journal_path.display()
        )));
    };
    let events: Vec<Event> = events.collect();

    let database = database.unwrap_or_else(|| config.database_path.clone());
    let mut session = Session::new(
        database,
        &config.extension_path,
        ConnectConfig {
            allow_unsigned_extensions: config.allow_unsigned_extensions,
        },
    );
    harness::setup(engine, &mut session)?;

    info!(seed, journal = %journal_path.display(), "replay: starting");

    let mut replayer = Replayer::new(&config, seed, engine, session)?;
    let outcome = replayer.run(&events);

    let Replayer {
        mut session,
        mut report,
        ..
    } = replayer;
    match outcome {
        Ok(()) => {}
        Err(HarnessError::Consistency(finding)) => {
            warn!(%finding, "replay: finding reproduced");
            report.reproduced = Some(*finding);
        }
        Err(e) => return Err(e),
    }

    report.corruption = contents.corruption.map(|e| e.to_string());
    report.recorded_finding = events.iter().find_map(|event| match event {
        Event::Finding { finding } => Some(finding.clone()),
        _ => None,
    });
    report.recorded_failure = events.iter().find_map(|event| match event {
        Event::Failed { error, .. } => Some(error.clone()),
        _ => None,
    });
    report.counters = session.counters();
    if let Err(e) = session.close_handle() {
        warn!(error = %e, "replay: close failed");
    }
    info!(
        operations = report.operations,
        transitions = report.transitions,
        divergences = report.divergences.len(),
        reproduced = report.reproduced.is_some(),
        "replay: finished"
    );
    Ok(report)
}

/// Replay state: the session, the checks and the RNG the recorded run
/// drew from.
struct Replayer<'a> {
    session: Session,
    checks: Checks,
    workload: WorkloadGenerator,
    weights: LifecycleWeights,
    rng: StdRng,
    controller: LifecycleController<'a>,
    report: ReplayReport,
}

impl<'a> Replayer<'a> {
    fn new(
        config: &HarnessConfig,
        seed: u64,
        engine: &'a dyn Engine,
        session: Session,
    ) -> Result<Self, HarnessError> {
        let sampler = RectangleSampler::new(config.max_width, config.max_height)?;
        Ok(Self {
            session,
            checks: Checks::new(config)?,
            workload: WorkloadGenerator::new(
                sampler,
                config.insert_probability,
                config.max_points,
            )?,
            weights: config.lifecycle,
            rng: StdRng::seed_from_u64(seed),
            controller: LifecycleController::new(engine)
                .disable_checkpoint_on_soft_reload(config.disable_checkpoint_on_soft_reload),
            report: ReplayReport {
                seed,
                operations: 0,
                transitions: 0,
                divergences: Vec::new(),
                recorded_finding: None,
                reproduced: None,
                recorded_failure: None,
                corruption: None,
                counters: Counters::default(),
            },
        })
    }

    fn run(&mut self, events: &[Event]) -> Result<(), HarnessError> {
        for event in events {
            match event {
                Event::Operation {
                    iteration,
                    operation,
                    affected,
                } => self.operation(*iteration, operation, *affected)?,
                Event::Lifecycle { iteration, action } => self.transition(*iteration, *action)?,
                Event::Finding { finding } => {
                    // Findings raised before any transition, at a tick or at
                    // the end, come from a plain row count.
                    return self
                        .checks
                        .verify_rows(&mut self.session, finding.iteration, finding.transition);
                }
                Event::Failed { .. } => return Ok(()),
                Event::Finished { iterations, .. } => {
                    return self.checks.finish(&mut self.session, &mut self.rng, *iterations);
                }
                Event::Started { .. } => {
                    return Err(HarnessError::Replay(
                        "journal contains a second start record".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn operation(
        &mut self,
        iteration: u64,
        operation: &Operation,
        affected: u64,
    ) -> Result<(), HarnessError> {
        // Keeps the RNG where the run had it when it drew this operation.
        self.workload.generate(&mut self.rng)?;

        let replayed = executor::execute_operation(&mut self.session, operation).map_err(
            |source| HarnessError::Execution {
                iteration,
                operation: operation.to_string(),
                source,
            },
        )?;
        self.report.operations += 1;
        if replayed != affected {
            let divergence = Divergence {
                iteration,
                operation: operation.clone(),
                recorded: affected,
                replayed,
            };
            warn!(%divergence, "replay: divergence");
            self.report.divergences.push(divergence);
        }
        self.checks
            .after_operation(&mut self.session, iteration, operation, replayed)
    }

    fn transition(&mut self, iteration: u64, action: LifecycleAction) -> Result<(), HarnessError> {
        self.checks.verify_rows(&mut self.session, iteration, None)?;
        self.weights.choose(&mut self.rng);

        let operations = self.session.counters().operations();
        self.controller
            .apply(&mut self.session, action)
            .map_err(|source| HarnessError::Lifecycle {
                iteration,
                operations,
                source,
            })?;
        self.report.transitions += 1;

        let durable = self.controller.is_durable(action);
        self.checks
            .after_transition(&mut self.session, &mut self.rng, iteration, action, durable)
    }
}
