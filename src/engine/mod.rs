//! # Engine collaborator contract
//!
//! The harness never implements storage, indexing or query execution. It
//! drives an external engine through the narrow contract in this module:
//!
//! - [`Engine::connect`] opens a [`Connection`], optionally bound to a
//!   database file, with a [`ConnectConfig`].
//! - [`Connection::execute`] runs one [`Statement`] and returns a [`RowSet`].
//! - [`Connection::close`] consumes the handle and shuts it down.
//!
//! Statements are typed rather than raw SQL strings so that backends which
//! are not SQL engines (the in-process [`sim`] model used by the test suite)
//! can interpret them directly. SQL backends render them through
//! [`Statement`]'s `Display` implementation.
//!
//! ## Backends
//!
//! - [`sim::SimEngine`]: always built; deterministic in-process model with
//!   fault injection.
//! - `duckdb::DuckDbEngine`: behind the `duckdb` cargo feature; the real
//!   target, loading the spatial extension into DuckDB.

#[cfg(feature = "duckdb")]
pub mod duckdb;
pub mod sim;
mod statement;

#[cfg(test)]
mod tests;

use std::io;
use std::path::Path;

use thiserror::Error;

pub use statement::{Access, INDEX_NAME, Statement, TABLE_NAME};

/// Errors reported by an engine backend.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine rejected or failed a statement.
    #[error("engine error: {0}")]
    Engine(String),

    /// The connection could not be opened.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The connection could not be closed cleanly.
    #[error("close failed: {0}")]
    Close(String),

    /// Filesystem error while preparing the database location.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Catalog name DuckDB derives from a database file: its file stem.
pub fn catalog_alias(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "db".to_string())
}

/// Options applied when opening a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectConfig {
    /// Allow loading extension binaries that are not signed.
    pub allow_unsigned_extensions: bool,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            allow_unsigned_extensions: true,
        }
    }
}

/// Result of executing one [`Statement`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSet {
    /// Statement produced no rows (DDL, `LOAD`, `CHECKPOINT`, ...).
    Empty,
    /// Rows changed by a DML statement.
    Affected(u64),
    /// Single numeric value from an aggregate query.
    Scalar(u64),
    /// Row identifiers returned by a probe query, in ascending order.
    RowIds(Vec<i64>),
}

impl RowSet {
    /// Scalar row count: affected rows for DML, the value of a scalar query,
    /// or the number of rows returned.
    pub fn row_count(&self) -> u64 {
        match self {
            RowSet::Empty => 0,
            RowSet::Affected(n) | RowSet::Scalar(n) => *n,
            RowSet::RowIds(ids) => ids.len() as u64,
        }
    }

    /// Consumes the row set, returning row identifiers (empty unless this
    /// is a [`RowSet::RowIds`]).
    pub fn into_row_ids(self) -> Vec<i64> {
        match self {
            RowSet::RowIds(ids) => ids,
            _ => Vec::new(),
        }
    }
}

/// A live connection to the engine.
pub trait Connection: Send {
    /// Executes a single statement and returns its result.
    fn execute(&mut self, statement: &Statement) -> Result<RowSet, EngineError>;

    /// Closes the connection, releasing all engine-side resources.
    fn close(self: Box<Self>) -> Result<(), EngineError>;
}

/// Factory for connections; also owns the database location on disk.
pub trait Engine {
    /// Short backend name used in logs and reports.
    fn name(&self) -> &'static str;

    /// Opens a new connection. `None` opens an engine with no database file
    /// bound (in-memory catalog only).
    fn connect(
        &self,
        path: Option<&Path>,
        config: &ConnectConfig,
    ) -> Result<Box<dyn Connection>, EngineError>;

    /// Removes any pre-existing database at `path`, including side files
    /// such as the write-ahead log. Missing files are not an error.
    fn remove_database(&self, path: &Path) -> Result<(), EngineError>;
}
