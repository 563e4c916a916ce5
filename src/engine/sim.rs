//! # Simulated engine
//!
//! An in-process model of a file-backed database with a spatial index,
//! implementing the [`Engine`] / [`Connection`] contract without any
//! external dependency. It exists so the harness can be exercised
//! end-to-end (and deterministically) in tests and dry runs.
//!
//! ## Model
//!
//! Each database "file" is a checkpointed table image plus a write-ahead
//! log of logical mutations issued since the last checkpoint. Opening or
//! attaching a file rebuilds the live table from the image and replays the
//! WAL, then rebuilds the index from the recovered rows.
//!
//! - `CHECKPOINT` folds the live table into the image and clears the WAL.
//! - Closing a connection checkpoints every file-bound catalog unless
//!   `PRAGMA disable_checkpoint_on_shutdown` was issued; the WAL survives
//!   either way.
//! - Table statements fail until the extension is loaded, mirroring the
//!   spatial types and functions being unavailable.
//!
//! ## Faults
//!
//! [`SimFaults`] injects misbehaviour so every class of finding the harness
//! reports can be provoked on purpose.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use super::{
    Access, ConnectConfig, Connection, Engine, EngineError, RowSet, Statement, catalog_alias,
};
use crate::sampler::Rectangle;

type Point = (f64, f64);

/// Faults the simulated engine can inject.
#[derive(Debug, Clone, Default)]
pub struct SimFaults {
    /// Drop the WAL when a database closes without checkpointing. Models an
    /// engine that loses post-checkpoint work on an unclean shutdown, which
    /// the harness must tolerate.
    pub discard_wal_on_unclean_close: bool,

    /// Lose one index entry every time a database file is opened or attached.
    pub drop_index_entry_on_open: bool,

    /// Replay the WAL twice on open, duplicating recovered inserts.
    pub duplicate_wal_replay: bool,

    /// Reject every `ATTACH`.
    pub fail_attach: bool,

    /// Reject every `LOAD`.
    pub fail_load: bool,

    /// Fail every statement once this many statements have run.
    pub fail_after_statements: Option<u64>,

    /// Insert this many fewer points than requested.
    pub short_inserts_by: Option<u32>,

    /// Report this many more deleted rows than were removed.
    pub overcount_deletes_by: Option<u64>,

    /// Leave index entries behind when rows are deleted. Index scans skip
    /// them, so only the index entry count shows the leak.
    pub stale_index_entries_on_delete: bool,
}

// ------------------------------------------------------------------------------------------------
// Shared state
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct TableImage {
    table_exists: bool,
    index_exists: bool,
    rows: BTreeMap<i64, Point>,
    next_rowid: i64,
}

impl TableImage {
    fn insert(&mut self, points: &[Point]) -> Vec<(i64, Point)> {
        points
            .iter()
            .map(|&p| {
                let id = self.next_rowid;
                self.next_rowid += 1;
                self.rows.insert(id, p);
                (id, p)
            })
            .collect()
    }

    fn delete_within(&mut self, rect: &Rectangle) -> Vec<i64> {
        let doomed: Vec<i64> = self
            .rows
            .iter()
            .filter(|(_, (x, y))| rect.contains_strictly(*x, *y))
            .map(|(id, _)| *id)
            .collect();
        for id in &doomed {
            self.rows.remove(id);
        }
        doomed
    }
}

#[derive(Debug, Clone)]
enum WalEntry {
    CreateTable,
    CreateIndex,
    Insert(Vec<Point>),
    Delete(Rectangle),
}

#[derive(Debug, Default)]
struct SimFile {
    image: TableImage,
    wal: Vec<WalEntry>,
}

#[derive(Debug, Default)]
struct SimState {
    files: HashMap<PathBuf, SimFile>,
    faults: SimFaults,
    statements: u64,
    live_connections: usize,
    peak_live_connections: usize,
    connects: u64,
}

/// Deterministic in-process engine. Cloning shares the underlying files.
#[derive(Debug, Clone, Default)]
pub struct SimEngine {
    state: Arc<Mutex<SimState>>,
}

impl SimEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine that injects `faults`.
    pub fn with_faults(faults: SimFaults) -> Self {
        let engine = Self::default();
        if let Ok(mut state) = engine.state.lock() {
            state.faults = faults;
        }
        engine
    }

    /// Replaces the active faults.
    pub fn set_faults(&self, faults: SimFaults) {
        if let Ok(mut state) = self.state.lock() {
            state.faults = faults;
        }
    }

    /// Number of connections currently open.
    pub fn live_connections(&self) -> usize {
        self.state.lock().map(|s| s.live_connections).unwrap_or(0)
    }

    /// Highest number of simultaneously open connections observed.
    pub fn peak_live_connections(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.peak_live_connections)
            .unwrap_or(0)
    }

    /// Total number of successful connects.
    pub fn connects(&self) -> u64 {
        self.state.lock().map(|s| s.connects).unwrap_or(0)
    }

    /// Number of WAL entries pending on `path` (not yet checkpointed).
    pub fn pending_wal_entries(&self, path: &Path) -> usize {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.files.get(path).map(|f| f.wal.len()))
            .unwrap_or(0)
    }

    /// Returns `true` if a database file exists at `path`.
    pub fn database_exists(&self, path: &Path) -> bool {
        self.state
            .lock()
            .map(|s| s.files.contains_key(path))
            .unwrap_or(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, SimState>, EngineError> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Arc<Mutex<SimState>>) -> Result<MutexGuard<'_, SimState>, EngineError> {
    state
        .lock()
        .map_err(|_| EngineError::Engine("sim state mutex poisoned".into()))
}

impl Engine for SimEngine {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn connect(
        &self,
        path: Option<&Path>,
        _config: &ConnectConfig,
    ) -> Result<Box<dyn Connection>, EngineError> {
        let mut state = self.lock()?;

        let main = match path {
            Some(path) => {
                let alias = catalog_alias(path);
                Catalog::open(&mut state, path, alias)
            }
            None => Catalog::in_memory(),
        };

        state.live_connections += 1;
        state.peak_live_connections = state.peak_live_connections.max(state.live_connections);
        state.connects += 1;
        debug!(
            path = ?path,
            live = state.live_connections,
            "sim: connection opened"
        );

        Ok(Box::new(SimConnection {
            state: Arc::clone(&self.state),
            catalogs: vec![main],
            active: 0,
            extension_loaded: false,
            closed: false,
        }))
    }

    fn remove_database(&self, path: &Path) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        if state.files.remove(path).is_some() {
            debug!(path = %path.display(), "sim: removed database");
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Catalogs
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
struct Catalog {
    name: String,
    file: Option<PathBuf>,
    table: TableImage,
    index: BTreeMap<i64, Point>,
    checkpoint_on_shutdown: bool,
}

impl Catalog {
    fn in_memory() -> Self {
        Self {
            name: "memory".into(),
            file: None,
            table: TableImage::default(),
            index: BTreeMap::new(),
            checkpoint_on_shutdown: true,
        }
    }

    /// Recovers a file-bound catalog: checkpointed image plus WAL replay.
    fn open(state: &mut SimState, path: &Path, name: String) -> Self {
        let faults = state.faults.clone();
        let file = state.files.entry(path.to_path_buf()).or_default();

        let mut table = file.image.clone();
        let passes = if faults.duplicate_wal_replay { 2 } else { 1 };
        for _ in 0..passes {
            for entry in &file.wal {
                match entry {
                    WalEntry::CreateTable => table.table_exists = true,
                    WalEntry::CreateIndex => table.index_exists = true,
                    WalEntry::Insert(points) => {
                        table.insert(points);
                    }
                    WalEntry::Delete(rect) => {
                        table.delete_within(rect);
                    }
                }
            }
        }

        let mut index = if table.index_exists {
            table.rows.clone()
        } else {
            BTreeMap::new()
        };
        if faults.drop_index_entry_on_open {
            if let Some((&id, _)) = index.iter().next() {
                index.remove(&id);
            }
        }

        trace!(
            path = %path.display(),
            rows = table.rows.len(),
            wal_entries = file.wal.len(),
            "sim: recovered catalog"
        );

        Self {
            name,
            file: Some(path.to_path_buf()),
            table,
            index,
            checkpoint_on_shutdown: true,
        }
    }

    fn log(&self, state: &mut SimState, entry: WalEntry) {
        if let Some(path) = &self.file {
            state.files.entry(path.clone()).or_default().wal.push(entry);
        }
    }

    fn checkpoint(&self, state: &mut SimState) {
        if let Some(path) = &self.file {
            let file = state.files.entry(path.clone()).or_default();
            file.image = self.table.clone();
            file.wal.clear();
        }
    }

    fn shutdown(&self, state: &mut SimState) {
        if self.file.is_none() {
            return;
        }
        if self.checkpoint_on_shutdown {
            self.checkpoint(state);
        } else if state.faults.discard_wal_on_unclean_close {
            if let Some(file) = self.file.as_ref().and_then(|p| state.files.get_mut(p)) {
                file.wal.clear();
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Connection
// ------------------------------------------------------------------------------------------------

/// Connection handed out by [`SimEngine`].
#[derive(Debug)]
pub struct SimConnection {
    state: Arc<Mutex<SimState>>,
    catalogs: Vec<Catalog>,
    active: usize,
    extension_loaded: bool,
    closed: bool,
}

impl SimConnection {
    fn require_extension(&self, statement: &Statement) -> Result<(), EngineError> {
        if !self.extension_loaded {
            return Err(EngineError::Engine(format!(
                "Catalog Error: spatial extension not loaded ({})",
                statement.label()
            )));
        }
        Ok(())
    }

    fn require_table(&self) -> Result<(), EngineError> {
        if !self.catalogs[self.active].table.table_exists {
            return Err(EngineError::Engine(format!(
                "Catalog Error: Table with name {} does not exist",
                super::TABLE_NAME
            )));
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = lock_state(&self.state)?;
        for catalog in &self.catalogs {
            catalog.shutdown(&mut state);
        }
        state.live_connections = state.live_connections.saturating_sub(1);
        debug!(live = state.live_connections, "sim: connection closed");
        Ok(())
    }
}

fn generate_points(rect: &Rectangle, count: u32, seed: i64) -> Vec<Point> {
    let mut rng = StdRng::seed_from_u64(seed as u64);
    let (x1, y1) = (f64::from(rect.x1()), f64::from(rect.y1()));
    let (w, h) = (
        f64::from(rect.x2() - rect.x1()),
        f64::from(rect.y2() - rect.y1()),
    );
    let mut points = Vec::with_capacity(count as usize);
    while points.len() < count as usize {
        let x = x1 + w * rng.random::<f64>();
        let y = y1 + h * rng.random::<f64>();
        if rect.contains_strictly(x, y) {
            points.push((x, y));
        }
    }
    points
}

impl Connection for SimConnection {
    fn execute(&mut self, statement: &Statement) -> Result<RowSet, EngineError> {
        if self.closed {
            return Err(EngineError::Engine("Connection Error: connection closed".into()));
        }

        let state_handle = Arc::clone(&self.state);
        let mut state = lock_state(&state_handle)?;
        state.statements += 1;
        if let Some(limit) = state.faults.fail_after_statements {
            if state.statements > limit {
                return Err(EngineError::Engine(format!(
                    "injected failure after {limit} statements"
                )));
            }
        }
        trace!(statement = %statement, "sim: execute");

        match statement {
            Statement::Load { extension } => {
                if state.faults.fail_load {
                    return Err(EngineError::Engine(format!(
                        "IO Error: extension {} could not be loaded",
                        extension.display()
                    )));
                }
                self.extension_loaded = true;
                Ok(RowSet::Empty)
            }
            Statement::CreateTable => {
                self.require_extension(statement)?;
                let catalog = &mut self.catalogs[self.active];
                if catalog.table.table_exists {
                    return Err(EngineError::Engine("Catalog Error: table already exists".into()));
                }
                catalog.table.table_exists = true;
                catalog.log(&mut state, WalEntry::CreateTable);
                Ok(RowSet::Empty)
            }
            Statement::CreateIndex => {
                self.require_extension(statement)?;
                self.require_table()?;
                let catalog = &mut self.catalogs[self.active];
                catalog.table.index_exists = true;
                catalog.index = catalog.table.rows.clone();
                catalog.log(&mut state, WalEntry::CreateIndex);
                Ok(RowSet::Empty)
            }
            Statement::InsertPoints { rect, count, seed } => {
                self.require_extension(statement)?;
                self.require_table()?;
                let count = count.saturating_sub(state.faults.short_inserts_by.unwrap_or(0));
                let points = generate_points(rect, count, *seed);
                let catalog = &mut self.catalogs[self.active];
                let inserted = catalog.table.insert(&points);
                if catalog.table.index_exists {
                    catalog.index.extend(inserted.iter().copied());
                }
                catalog.log(&mut state, WalEntry::Insert(points));
                Ok(RowSet::Affected(inserted.len() as u64))
            }
            Statement::DeleteWithin { rect } => {
                self.require_extension(statement)?;
                self.require_table()?;
                let catalog = &mut self.catalogs[self.active];
                let removed = catalog.table.delete_within(rect);
                if !state.faults.stale_index_entries_on_delete {
                    for id in &removed {
                        catalog.index.remove(id);
                    }
                }
                catalog.log(&mut state, WalEntry::Delete(*rect));
                let reported =
                    removed.len() as u64 + state.faults.overcount_deletes_by.unwrap_or(0);
                Ok(RowSet::Affected(reported))
            }
            Statement::Checkpoint => {
                for catalog in &self.catalogs {
                    catalog.checkpoint(&mut state);
                }
                Ok(RowSet::Empty)
            }
            Statement::DisableCheckpointOnShutdown => {
                for catalog in &mut self.catalogs {
                    catalog.checkpoint_on_shutdown = false;
                }
                Ok(RowSet::Empty)
            }
            Statement::Attach { path, alias } => {
                if state.faults.fail_attach {
                    return Err(EngineError::Engine(format!(
                        "IO Error: could not attach {}",
                        path.display()
                    )));
                }
                if self.catalogs.iter().any(|c| &c.name == alias) {
                    return Err(EngineError::Engine(format!(
                        "Binder Error: database {alias} already attached"
                    )));
                }
                let catalog = Catalog::open(&mut state, path, alias.clone());
                self.catalogs.push(catalog);
                Ok(RowSet::Empty)
            }
            Statement::Use { alias } => {
                let position = self
                    .catalogs
                    .iter()
                    .position(|c| &c.name == alias)
                    .ok_or_else(|| {
                        EngineError::Engine(format!("Catalog Error: database {alias} does not exist"))
                    })?;
                self.active = position;
                Ok(RowSet::Empty)
            }
            Statement::CountRows => {
                self.require_extension(statement)?;
                self.require_table()?;
                Ok(RowSet::Scalar(
                    self.catalogs[self.active].table.rows.len() as u64,
                ))
            }
            Statement::RowIdsWithin { rect, access } => {
                self.require_extension(statement)?;
                self.require_table()?;
                let catalog = &self.catalogs[self.active];
                let rows = &catalog.table.rows;
                let within = |(id, (x, y)): (&i64, &Point)| {
                    rect.contains_strictly(*x, *y).then_some(*id)
                };
                // Index entries whose row is gone are skipped on fetch.
                let ids = match access {
                    Access::Index if catalog.table.index_exists => catalog
                        .index
                        .iter()
                        .filter_map(within)
                        .filter(|id| rows.contains_key(id))
                        .collect(),
                    _ => rows.iter().filter_map(within).collect(),
                };
                Ok(RowSet::RowIds(ids))
            }
            Statement::IndexEntryCount => {
                self.require_extension(statement)?;
                let catalog = &self.catalogs[self.active];
                if !catalog.table.index_exists {
                    return Err(EngineError::Engine(format!(
                        "Catalog Error: index {} does not exist",
                        super::INDEX_NAME
                    )));
                }
                Ok(RowSet::Scalar(catalog.index.len() as u64))
            }
        }
    }

    fn close(mut self: Box<Self>) -> Result<(), EngineError> {
        self.shutdown()
    }
}

impl Drop for SimConnection {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
