use crate::engine::sim::SimEngine;
use crate::engine::{Access, ConnectConfig, Engine, Statement};
use crate::executor;
use crate::sampler::Rectangle;
use crate::session::Session;
use crate::workload::Operation;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times, only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Session connected to `fuzz.db` on `engine`, with the extension loaded and
/// the indexed table created.
pub fn connected_session(engine: &SimEngine) -> Session {
    init_tracing();
    let mut session = Session::new(
        "fuzz.db",
        PathBuf::from("spatial.duckdb_extension"),
        ConnectConfig::default(),
    );
    let handle = engine
        .connect(Some(session.database_path()), session.connect_config())
        .unwrap();
    session.replace_handle(handle).unwrap();
    let extension = session.extension_path().to_path_buf();
    executor::execute(&mut session, &Statement::Load { extension }).unwrap();
    executor::execute(&mut session, &Statement::CreateTable).unwrap();
    executor::execute(&mut session, &Statement::CreateIndex).unwrap();
    session
}

pub fn insert(session: &mut Session, rect: Rectangle, point_count: u32) -> u64 {
    executor::execute_operation(
        session,
        &Operation::Insert {
            rect,
            point_count,
            seed: i64::from(point_count),
        },
    )
    .unwrap()
}

pub fn delete(session: &mut Session, rect: Rectangle) -> u64 {
    executor::execute_operation(session, &Operation::Delete { rect }).unwrap()
}

pub fn count(session: &mut Session) -> u64 {
    executor::execute(session, &Statement::CountRows)
        .unwrap()
        .row_count()
}

/// Row ids in `rect` through the index and through a full scan.
pub fn probe_both(session: &mut Session, rect: Rectangle) -> (Vec<i64>, Vec<i64>) {
    let indexed = executor::execute(
        session,
        &Statement::RowIdsWithin {
            rect,
            access: Access::Index,
        },
    )
    .unwrap()
    .into_row_ids();
    let scanned = executor::execute(
        session,
        &Statement::RowIdsWithin {
            rect,
            access: Access::FullScan,
        },
    )
    .unwrap()
    .into_row_ids();
    (indexed, scanned)
}
