//! # Consistency oracle
//!
//! The harness cannot see inside the index, so it keeps a model of what the
//! table must contain and compares the engine against it.
//!
//! ## Row model
//!
//! [`RowModel`] tracks the expected row count and, for every operation since
//! the last durable point, the row count right after it. The durable point is
//! a checkpoint, or a graceful close that checkpoints on shutdown.
//!
//! - Between lifecycle events the observed count must equal the expected
//!   count exactly.
//! - After a hard restart the engine may lose any suffix of the operations
//!   since the durable point, so the observed count must equal one of the
//!   recorded prefix counts. Anything else (a count that was never reached,
//!   duplicated replay) is a durability violation.
//!
//! ## Access-path agreement
//!
//! [`compare_probe`] checks that a range query through the R-tree returns
//! exactly the row ids of the same range evaluated by a full scan.


use std::fmt;

use serde::{Deserialize, Serialize};

use crate::lifecycle::LifecycleAction;
use crate::sampler::Rectangle;
use crate::workload::Operation;

/// Class of a consistency finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Observed row count differs from the model.
    RowCountMismatch,
    /// An insert reported a different row count than requested.
    InsertCountMismatch,
    /// A delete reported more rows than the table should hold.
    DeleteCountMismatch,
    /// After a restart the table matches no prefix of the recorded history.
    DurabilityViolation,
    /// Index scan and full scan disagree on a range.
    IndexDivergence,
    /// Index leaf entry count differs from the row count.
    IndexEntryMismatch,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FindingKind::RowCountMismatch => "row count mismatch",
            FindingKind::InsertCountMismatch => "insert count mismatch",
            FindingKind::DeleteCountMismatch => "delete count mismatch",
            FindingKind::DurabilityViolation => "durability violation",
            FindingKind::IndexDivergence => "index divergence",
            FindingKind::IndexEntryMismatch => "index entry mismatch",
        })
    }
}

/// A mismatch detected by the oracle, before it is placed in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discrepancy {
    pub kind: FindingKind,
    pub expected: Option<u64>,
    pub observed: Option<u64>,
    pub detail: String,
}

impl Discrepancy {
    fn new(kind: FindingKind, expected: u64, observed: u64, detail: impl Into<String>) -> Self {
        Self {
            kind,
            expected: Some(expected),
            observed: Some(observed),
            detail: detail.into(),
        }
    }

    /// Places the discrepancy at `iteration`, after `transition` if one had
    /// just completed.
    pub fn at(self, iteration: u64, transition: Option<LifecycleAction>) -> Finding {
        Finding {
            kind: self.kind,
            iteration,
            transition,
            expected: self.expected,
            observed: self.observed,
            detail: self.detail,
        }
    }
}

/// A consistency finding with its position in the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub iteration: u64,
    pub transition: Option<LifecycleAction>,
    pub expected: Option<u64>,
    pub observed: Option<u64>,
    pub detail: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at iteration {}", self.kind, self.iteration)?;
        if let Some(action) = self.transition {
            write!(f, " after {action}")?;
        }
        if let (Some(expected), Some(observed)) = (self.expected, self.observed) {
            write!(f, " (expected {expected}, observed {observed})")?;
        }
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Row model
// ------------------------------------------------------------------------------------------------

/// Expected table contents, reduced to row counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowModel {
    expected: u64,
    /// Row count at the durable point followed by the count after each
    /// later operation. Never empty.
    prefixes: Vec<u64>,
}

impl Default for RowModel {
    fn default() -> Self {
        Self::new()
    }
}

impl RowModel {
    /// Model of an empty, freshly created table.
    pub fn new() -> Self {
        Self {
            expected: 0,
            prefixes: vec![0],
        }
    }

    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// Row counts a recovery may legitimately land on.
    pub fn recoverable_counts(&self) -> &[u64] {
        &self.prefixes
    }

    /// Applies an executed operation and the row count the engine reported.
    pub fn apply(&mut self, operation: &Operation, affected: u64) -> Result<(), Discrepancy> {
        match operation {
            Operation::Insert { point_count, .. } => {
                let requested = u64::from(*point_count);
                if affected != requested {
                    return Err(Discrepancy::new(
                        FindingKind::InsertCountMismatch,
                        requested,
                        affected,
                        format!("{operation}"),
                    ));
                }
                self.expected += affected;
            }
            Operation::Delete { .. } => {
                self.expected = self.expected.checked_sub(affected).ok_or_else(|| {
                    Discrepancy::new(
                        FindingKind::DeleteCountMismatch,
                        self.expected,
                        affected,
                        format!("{operation} removed more rows than the table holds"),
                    )
                })?;
            }
        }
        self.prefixes.push(self.expected);
        Ok(())
    }

    /// The current state became durable.
    pub fn mark_durable(&mut self) {
        self.prefixes.clear();
        self.prefixes.push(self.expected);
    }

    /// Checks an observed row count against the exact expectation.
    pub fn verify(&self, observed: u64) -> Result<(), Discrepancy> {
        if observed != self.expected {
            return Err(Discrepancy::new(
                FindingKind::RowCountMismatch,
                self.expected,
                observed,
                "",
            ));
        }
        Ok(())
    }

    /// Checks the row count seen after a restart that may have lost
    /// post-checkpoint work, and rebases the model onto it.
    ///
    /// Returns the number of operations lost. Counts alone cannot tell
    /// apart prefixes that left the table at the same size, so the latest
    /// matching prefix is taken and the loss may be under-reported.
    pub fn recover(&mut self, observed: u64) -> Result<usize, Discrepancy> {
        let Some(position) = self.prefixes.iter().rposition(|&c| c == observed) else {
            return Err(Discrepancy::new(
                FindingKind::DurabilityViolation,
                self.expected,
                observed,
                format!("recoverable row counts were {}", summarize_counts(&self.prefixes)),
            ));
        };
        let lost = self.prefixes.len() - 1 - position;
        self.prefixes.truncate(position + 1);
        self.expected = observed;
        Ok(lost)
    }
}

// ------------------------------------------------------------------------------------------------
// Probes
// ------------------------------------------------------------------------------------------------

/// Compares the row ids an index scan and a full scan returned for `rect`.
/// Both inputs must be sorted ascending.
pub fn compare_probe(rect: &Rectangle, indexed: &[i64], scanned: &[i64]) -> Result<(), Discrepancy> {
    if indexed == scanned {
        return Ok(());
    }
    let missing = sorted_difference(scanned, indexed);
    let extra = sorted_difference(indexed, scanned);
    Err(Discrepancy::new(
        FindingKind::IndexDivergence,
        scanned.len() as u64,
        indexed.len() as u64,
        format!(
            "range {rect}: {} row(s) missing from index {:?}, {} extra {:?}",
            missing.len(),
            preview(&missing),
            extra.len(),
            preview(&extra),
        ),
    ))
}

/// Compares the index's leaf entry count with the table's row count.
pub fn compare_index_entries(rows: u64, entries: u64) -> Result<(), Discrepancy> {
    if rows != entries {
        return Err(Discrepancy::new(
            FindingKind::IndexEntryMismatch,
            rows,
            entries,
            "",
        ));
    }
    Ok(())
}

fn sorted_difference(a: &[i64], b: &[i64]) -> Vec<i64> {
    let mut out = Vec::new();
    let mut j = 0;
    for &x in a {
        while j < b.len() && b[j] < x {
            j += 1;
        }
        if j >= b.len() || b[j] != x {
            out.push(x);
        }
    }
    out
}

fn preview(ids: &[i64]) -> &[i64] {
    &ids[..ids.len().min(8)]
}

/// First and last few counts of a long prefix list.
fn summarize_counts(counts: &[u64]) -> String {
    const EDGE: usize = 4;
    if counts.len() <= 2 * EDGE {
        return format!("{counts:?}");
    }
    let head = &counts[..EDGE];
    let tail = &counts[counts.len() - EDGE..];
    format!("{head:?} .. {tail:?} ({} counts)", counts.len())
}
