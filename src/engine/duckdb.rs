//! DuckDB backend.
//!
//! Opens DuckDB databases through the `duckdb` crate and renders every
//! [`Statement`] as SQL. DML reports its changed-row count, aggregate
//! probes are read as a single `BIGINT`, and row-id probes are collected
//! in order.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ::duckdb::{Config, Connection as DuckConnection};
use tracing::{debug, trace};

use super::{ConnectConfig, Connection, Engine, EngineError, RowSet, Statement};

impl From<::duckdb::Error> for EngineError {
    fn from(e: ::duckdb::Error) -> Self {
        EngineError::Engine(e.to_string())
    }
}

/// Connects to DuckDB.
#[derive(Debug, Default, Clone, Copy)]
pub struct DuckDbEngine;

impl DuckDbEngine {
    pub fn new() -> Self {
        Self
    }

    fn config(config: &ConnectConfig) -> Result<Config, EngineError> {
        let mut duck = Config::default();
        if config.allow_unsigned_extensions {
            duck = duck
                .allow_unsigned_extensions()
                .map_err(|e| EngineError::Connect(e.to_string()))?;
        }
        Ok(duck)
    }
}

impl Engine for DuckDbEngine {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn connect(
        &self,
        path: Option<&Path>,
        config: &ConnectConfig,
    ) -> Result<Box<dyn Connection>, EngineError> {
        let duck_config = Self::config(config)?;
        let conn = match path {
            Some(path) => DuckConnection::open_with_flags(path, duck_config),
            None => DuckConnection::open_in_memory_with_flags(duck_config),
        }
        .map_err(|e| EngineError::Connect(e.to_string()))?;

        debug!(path = ?path, "duckdb: connection opened");
        Ok(Box::new(DuckDbConnection { conn: Some(conn) }))
    }

    fn remove_database(&self, path: &Path) -> Result<(), EngineError> {
        let mut wal = path.as_os_str().to_owned();
        wal.push(".wal");
        for file in [path.to_path_buf(), PathBuf::from(wal)] {
            match fs::remove_file(&file) {
                Ok(()) => debug!(path = %file.display(), "duckdb: removed database file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(EngineError::Io(e)),
            }
        }
        Ok(())
    }
}

/// A live DuckDB connection.
pub struct DuckDbConnection {
    conn: Option<DuckConnection>,
}

impl DuckDbConnection {
    fn conn(&self) -> Result<&DuckConnection, EngineError> {
        self.conn
            .as_ref()
            .ok_or_else(|| EngineError::Engine("connection already closed".into()))
    }
}

impl Connection for DuckDbConnection {
    fn execute(&mut self, statement: &Statement) -> Result<RowSet, EngineError> {
        let conn = self.conn()?;
        let sql = statement.to_string();
        trace!(%sql, "duckdb: execute");

        match statement {
            Statement::InsertPoints { .. } | Statement::DeleteWithin { .. } => {
                let changed = conn.execute(&sql, [])?;
                Ok(RowSet::Affected(changed as u64))
            }
            Statement::CountRows | Statement::IndexEntryCount => {
                let value: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
                Ok(RowSet::Scalar(value.max(0) as u64))
            }
            Statement::RowIdsWithin { .. } => {
                let mut stmt = conn.prepare(&sql)?;
                let ids = stmt
                    .query_map([], |row| row.get::<_, i64>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(RowSet::RowIds(ids))
            }
            _ => {
                conn.execute_batch(&sql)?;
                Ok(RowSet::Empty)
            }
        }
    }

    fn close(mut self: Box<Self>) -> Result<(), EngineError> {
        match self.conn.take() {
            Some(conn) => conn
                .close()
                .map_err(|(_, e)| EngineError::Close(e.to_string())),
            None => Ok(()),
        }
    }
}
