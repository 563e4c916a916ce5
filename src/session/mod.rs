//! # Session state
//!
//! The [`Session`] is the single owner of the live engine connection and
//! the bookkeeping around it. It is passed explicitly to every component;
//! there is no global handle.
//!
//! ## Single-handle invariant
//!
//! At most one connection is live at any time. [`Session::close_handle`]
//! releases the current handle, and [`Session::replace_handle`] closes any
//! handle still installed *before* installing the new one. The lifecycle
//! controller closes first and connects second, so a replacement never
//! overlaps with its predecessor.


use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::engine::{ConnectConfig, Connection, EngineError, catalog_alias};
use crate::lifecycle::LifecycleState;

/// Returned when an operation needs a connection and the session has none.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("session holds no live connection")]
pub struct NotConnected;

/// Cumulative event counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub checkpoints: u64,
    pub soft_reloads: u64,
    pub hard_restarts: u64,
    pub inserts: u64,
    pub deletes: u64,
}

impl Counters {
    /// Inserts plus deletes issued so far.
    pub fn operations(&self) -> u64 {
        self.inserts + self.deletes
    }
}

impl fmt::Display for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checkpoints={} soft_reloads={} hard_restarts={} inserts={} deletes={}",
            self.checkpoints, self.soft_reloads, self.hard_restarts, self.inserts, self.deletes
        )
    }
}

/// The harness's connection and everything needed to re-create it.
pub struct Session {
    handle: Option<Box<dyn Connection>>,
    database_path: PathBuf,
    extension_path: PathBuf,
    connect_config: ConnectConfig,
    counters: Counters,
    state: LifecycleState,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("connected", &self.handle.is_some())
            .field("database_path", &self.database_path)
            .field("extension_path", &self.extension_path)
            .field("counters", &self.counters)
            .field("state", &self.state)
            .finish()
    }
}

impl Session {
    /// Creates a session with no connection yet.
    pub fn new(
        database_path: impl Into<PathBuf>,
        extension_path: impl Into<PathBuf>,
        connect_config: ConnectConfig,
    ) -> Self {
        Self {
            handle: None,
            database_path: database_path.into(),
            extension_path: extension_path.into(),
            connect_config,
            counters: Counters::default(),
            state: LifecycleState::Running,
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn extension_path(&self) -> &Path {
        &self.extension_path
    }

    pub fn connect_config(&self) -> &ConnectConfig {
        &self.connect_config
    }

    /// Catalog name the database file is attached under after a hard
    /// restart (the file stem, as DuckDB names it).
    pub fn catalog_alias(&self) -> String {
        catalog_alias(&self.database_path)
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    /// The live connection.
    pub fn current_handle(&mut self) -> Result<&mut (dyn Connection + 'static), NotConnected> {
        self.handle.as_deref_mut().ok_or(NotConnected)
    }

    /// Installs `new_handle`, closing any handle still installed first.
    ///
    /// If closing the old handle fails, the new handle is dropped and the
    /// session is left without a connection.
    pub fn replace_handle(&mut self, new_handle: Box<dyn Connection>) -> Result<(), EngineError> {
        self.close_handle()?;
        self.handle = Some(new_handle);
        debug!("session: handle installed");
        Ok(())
    }

    /// Closes and removes the current handle. No-op without one.
    pub fn close_handle(&mut self) -> Result<(), EngineError> {
        match self.handle.take() {
            Some(handle) => {
                handle.close()?;
                debug!("session: handle closed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Snapshot of the counters.
    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: LifecycleState) {
        self.state = state;
    }

    pub(crate) fn counters_mut(&mut self) -> &mut Counters {
        &mut self.counters
    }
}
