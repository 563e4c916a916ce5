//! Consistency checks run between engine calls.
//!
//! The run loop and replay share these so that a replayed journal is
//! checked exactly where the recorded run was, drawing its random probe
//! ranges from the same RNG stream.

use rand::Rng;
use tracing::{info, warn};

use crate::engine::{Access, Statement};
use crate::executor::{self, ExecError};
use crate::lifecycle::LifecycleAction;
use crate::oracle::{self, Discrepancy, RowModel};
use crate::sampler::{Rectangle, RectangleSampler};
use crate::session::Session;
use crate::workload::Operation;
use crate::{HarnessConfig, HarnessError};

/// The row model plus the checks configured for a run.
#[derive(Debug, Clone)]
pub struct Checks {
    model: RowModel,
    sampler: RectangleSampler,
    probes_per_check: u32,
    verify_every_op: bool,
    check_index_entries: bool,
}

impl Checks {
    pub fn new(config: &HarnessConfig) -> Result<Self, HarnessError> {
        Ok(Self {
            model: RowModel::new(),
            sampler: RectangleSampler::new(config.max_width, config.max_height)?,
            probes_per_check: config.probes_per_check,
            verify_every_op: config.verify_every_op,
            check_index_entries: config.check_index_entries,
        })
    }

    pub fn model(&self) -> &RowModel {
        &self.model
    }

    /// Accounts for an executed operation and its reported row count.
    pub fn after_operation(
        &mut self,
        session: &mut Session,
        iteration: u64,
        operation: &Operation,
        affected: u64,
    ) -> Result<(), HarnessError> {
        self.model
            .apply(operation, affected)
            .map_err(|d| consistency(d, iteration, None))?;
        if self.verify_every_op {
            self.verify_rows(session, iteration, None)?;
        }
        Ok(())
    }

    /// Compares the table's row count with the model.
    pub fn verify_rows(
        &self,
        session: &mut Session,
        iteration: u64,
        transition: Option<LifecycleAction>,
    ) -> Result<(), HarnessError> {
        let observed = count_rows(session, iteration)?;
        self.model
            .verify(observed)
            .map_err(|d| consistency(d, iteration, transition))
    }

    /// Checks the table after `action` completed. `durable` tells whether
    /// the transition made the current state durable.
    pub fn after_transition<R: Rng + ?Sized>(
        &mut self,
        session: &mut Session,
        rng: &mut R,
        iteration: u64,
        action: LifecycleAction,
        durable: bool,
    ) -> Result<(), HarnessError> {
        match action {
            LifecycleAction::HardRestart => {
                let observed = count_rows(session, iteration)?;
                let lost = self
                    .model
                    .recover(observed)
                    .map_err(|d| consistency(d, iteration, Some(action)))?;
                if lost > 0 {
                    info!(
                        iteration,
                        lost,
                        rows = observed,
                        "harness: hard restart dropped uncheckpointed operations"
                    );
                }
            }
            _ => self.verify_rows(session, iteration, Some(action))?,
        }

        if durable {
            self.model.mark_durable();
        }
        self.check_access_paths(session, rng, iteration, Some(action))
    }

    /// Final row count and access-path checks.
    pub fn finish<R: Rng + ?Sized>(
        &self,
        session: &mut Session,
        rng: &mut R,
        iteration: u64,
    ) -> Result<(), HarnessError> {
        self.verify_rows(session, iteration, None)?;
        self.check_access_paths(session, rng, iteration, None)
    }

    /// Probes the full extent and `probes_per_check` random rectangles
    /// through the index and through a full scan.
    pub fn check_access_paths<R: Rng + ?Sized>(
        &self,
        session: &mut Session,
        rng: &mut R,
        iteration: u64,
        transition: Option<LifecycleAction>,
    ) -> Result<(), HarnessError> {
        let mut ranges = vec![self.sampler.full_extent()];
        for _ in 0..self.probes_per_check {
            ranges.push(self.sampler.sample(rng)?);
        }

        for rect in ranges {
            let indexed = probe(session, iteration, rect, Access::Index)?;
            let scanned = probe(session, iteration, rect, Access::FullScan)?;
            oracle::compare_probe(&rect, &indexed, &scanned)
                .map_err(|d| consistency(d, iteration, transition))?;
        }

        if self.check_index_entries {
            let entries = executor::execute(session, &Statement::IndexEntryCount)
                .map(|rows| rows.row_count())
                .map_err(|e| execution_error(iteration, "index entry count", e))?;
            oracle::compare_index_entries(self.model.expected(), entries)
                .map_err(|d| consistency(d, iteration, transition))?;
        }
        Ok(())
    }
}

fn count_rows(session: &mut Session, iteration: u64) -> Result<u64, HarnessError> {
    executor::execute(session, &Statement::CountRows)
        .map(|rows| rows.row_count())
        .map_err(|e| execution_error(iteration, "count rows", e))
}

fn probe(
    session: &mut Session,
    iteration: u64,
    rect: Rectangle,
    access: Access,
) -> Result<Vec<i64>, HarnessError> {
    executor::execute(session, &Statement::RowIdsWithin { rect, access })
        .map(|rows| rows.into_row_ids())
        .map_err(|e| execution_error(iteration, &format!("probe {rect}"), e))
}

pub(crate) fn execution_error(iteration: u64, operation: &str, source: ExecError) -> HarnessError {
    HarnessError::Execution {
        iteration,
        operation: operation.to_string(),
        source,
    }
}

fn consistency(
    discrepancy: Discrepancy,
    iteration: u64,
    transition: Option<LifecycleAction>,
) -> HarnessError {
    let finding = discrepancy.at(iteration, transition);
    warn!(%finding, "harness: consistency finding");
    HarnessError::Consistency(Box::new(finding))
}
