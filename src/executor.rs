//! Operation executor: runs one statement on the session's live connection.
//!
//! The executor refuses to run without a connection. That situation is a
//! harness bug, never an engine condition, so it surfaces as its own error
//! variant instead of being folded into engine errors.

use thiserror::Error;
use tracing::trace;

use crate::engine::{EngineError, RowSet, Statement};
use crate::session::{NotConnected, Session};
use crate::workload::Operation;

/// Errors from executing a statement.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    NotConnected(#[from] NotConnected),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Executes `statement` on the session's live connection.
pub fn execute(session: &mut Session, statement: &Statement) -> Result<RowSet, ExecError> {
    let handle = session.current_handle()?;
    let rows = handle.execute(statement)?;
    trace!(statement = statement.label(), rows = rows.row_count(), "executed");
    Ok(rows)
}

/// Executes a workload operation and returns the affected-row count.
///
/// The result is fully consumed before returning, so the next statement is
/// never issued while this one is still in flight.
pub fn execute_operation(session: &mut Session, operation: &Operation) -> Result<u64, ExecError> {
    let rows = execute(session, &operation.statement())?;
    let counters = session.counters_mut();
    match operation {
        Operation::Insert { .. } => counters.inserts += 1,
        Operation::Delete { .. } => counters.deletes += 1,
    }
    Ok(rows.row_count())
}
