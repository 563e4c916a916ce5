use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::sampler::Rectangle;

/// Name of the indexed table.
pub const TABLE_NAME: &str = "tbl";

/// Name of the R-tree index on [`TABLE_NAME`].
pub const INDEX_NAME: &str = "idx";

/// How a range probe reaches the rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// A lone `ST_Within` filter against a constant envelope, which the
    /// spatial extension rewrites into an R-tree index scan.
    Index,
    /// Plain coordinate comparisons evaluated by a sequential scan.
    FullScan,
}

/// A statement the harness can issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    /// Load an extension binary (or a named extension).
    Load { extension: PathBuf },
    /// Create the geometry table.
    CreateTable,
    /// Create the R-tree index over the geometry column.
    CreateIndex,
    /// Insert `count` uniformly distributed points strictly inside `rect`.
    InsertPoints { rect: Rectangle, count: u32, seed: i64 },
    /// Delete every row whose geometry lies within `rect`'s envelope.
    DeleteWithin { rect: Rectangle },
    /// Flush in-memory state to the database file.
    Checkpoint,
    /// Skip the automatic checkpoint when the database shuts down.
    DisableCheckpointOnShutdown,
    /// Attach an existing database file under `alias`.
    Attach { path: PathBuf, alias: String },
    /// Switch the active catalog.
    Use { alias: String },
    /// `count(*)` over the table.
    CountRows,
    /// Row ids of rows within `rect`, reached through `access`.
    RowIdsWithin { rect: Rectangle, access: Access },
    /// Number of leaf entries held by the R-tree index.
    IndexEntryCount,
}

impl Statement {
    /// Short label used in logs and error context.
    pub fn label(&self) -> &'static str {
        match self {
            Statement::Load { .. } => "load",
            Statement::CreateTable => "create_table",
            Statement::CreateIndex => "create_index",
            Statement::InsertPoints { .. } => "insert",
            Statement::DeleteWithin { .. } => "delete",
            Statement::Checkpoint => "checkpoint",
            Statement::DisableCheckpointOnShutdown => "disable_checkpoint_on_shutdown",
            Statement::Attach { .. } => "attach",
            Statement::Use { .. } => "use",
            Statement::CountRows => "count_rows",
            Statement::RowIdsWithin { .. } => "row_ids_within",
            Statement::IndexEntryCount => "index_entry_count",
        }
    }
}

fn quote_literal(s: &str) -> String {
    s.replace('\'', "''")
}

fn quote_ident(s: &str) -> String {
    s.replace('"', "\"\"")
}

fn envelope(rect: &Rectangle) -> String {
    format!(
        "ST_MakeEnvelope({}, {}, {}, {})",
        rect.x1(),
        rect.y1(),
        rect.x2(),
        rect.y2()
    )
}

/// Renders the statement as DuckDB SQL.
impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Load { extension } => {
                write!(f, "LOAD '{}'", quote_literal(&extension.to_string_lossy()))
            }
            Statement::CreateTable => write!(f, "CREATE TABLE {TABLE_NAME} (geom GEOMETRY)"),
            Statement::CreateIndex => {
                write!(f, "CREATE INDEX {INDEX_NAME} ON {TABLE_NAME} USING RTREE (geom)")
            }
            Statement::InsertPoints { rect, count, seed } => write!(
                f,
                "INSERT INTO {TABLE_NAME} SELECT geom FROM ST_GeneratePoints(\
                 {{min_x: {}, min_y: {}, max_x: {}, max_y: {}}}::BOX_2D, {count}, {seed}) AS pts(geom)",
                rect.x1(),
                rect.y1(),
                rect.x2(),
                rect.y2()
            ),
            Statement::DeleteWithin { rect } => write!(
                f,
                "DELETE FROM {TABLE_NAME} WHERE ST_Within(geom, {})",
                envelope(rect)
            ),
            Statement::Checkpoint => write!(f, "CHECKPOINT"),
            Statement::DisableCheckpointOnShutdown => {
                write!(f, "PRAGMA disable_checkpoint_on_shutdown")
            }
            Statement::Attach { path, alias } => write!(
                f,
                "ATTACH '{}' AS \"{}\"",
                quote_literal(&path.to_string_lossy()),
                quote_ident(alias)
            ),
            Statement::Use { alias } => write!(f, "USE \"{}\"", quote_ident(alias)),
            Statement::CountRows => write!(f, "SELECT count(*) FROM {TABLE_NAME}"),
            Statement::RowIdsWithin {
                rect,
                access: Access::Index,
            } => write!(
                f,
                "SELECT rowid FROM {TABLE_NAME} WHERE ST_Within(geom, {}) ORDER BY rowid",
                envelope(rect)
            ),
            Statement::RowIdsWithin {
                rect,
                access: Access::FullScan,
            } => write!(
                f,
                "SELECT rowid FROM {TABLE_NAME} \
                 WHERE ST_X(geom) > {} AND ST_X(geom) < {} AND ST_Y(geom) > {} AND ST_Y(geom) < {} \
                 ORDER BY rowid",
                rect.x1(),
                rect.x2(),
                rect.y1(),
                rect.y2()
            ),
            Statement::IndexEntryCount => write!(
                f,
                "SELECT count(row_id) FROM rtree_index_dump('{INDEX_NAME}')"
            ),
        }
    }
}
