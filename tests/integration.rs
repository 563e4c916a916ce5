//! Integration tests for the public harness API.
//!
//! These tests drive the harness through the public `rtree_fuzz` surface
//! only, against the in-process simulated engine. No internal modules are
//! referenced.
//!
//! ## Coverage areas
//! - **Sampler**: rectangle invariants for many bounds
//! - **Accounting**: row count equals inserts minus deletes between events
//! - **Lifecycle**: the checkpoint / hard restart and delete / soft reload
//!   scenarios, idle reloads, single live connection
//! - **Full runs**: seeded determinism, journaling, replay
//! - **Findings**: faulty engines are caught and reported

use rand::SeedableRng;
use rand::rngs::StdRng;
use rtree_fuzz::engine::sim::{SimEngine, SimFaults};
use rtree_fuzz::engine::{Access, ConnectConfig, Engine, Statement};
use rtree_fuzz::executor;
use rtree_fuzz::lifecycle::LifecycleController;
use rtree_fuzz::replay::replay;
use rtree_fuzz::sampler::{Rectangle, RectangleSampler};
use rtree_fuzz::session::Session;
use rtree_fuzz::workload::{Operation, WorkloadGenerator};
use rtree_fuzz::{
    FindingKind, Harness, HarnessConfig, HarnessError, LifecycleAction, LifecycleWeights,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tempfile::TempDir;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

fn rect(x1: u32, y1: u32, x2: u32, y2: u32) -> Rectangle {
    Rectangle::new(x1, y1, x2, y2).unwrap()
}

/// Session on `engine` with the indexed table created and checkpointed.
fn ready_session(engine: &SimEngine) -> Session {
    let mut session = Session::new("fuzz.db", "spatial.duckdb_extension", ConnectConfig::default());
    rtree_fuzz::harness::setup(engine, &mut session).unwrap();
    session
}

fn count(session: &mut Session) -> u64 {
    executor::execute(session, &Statement::CountRows)
        .unwrap()
        .row_count()
}

fn ids(session: &mut Session, r: Rectangle, access: Access) -> Vec<i64> {
    executor::execute(session, &Statement::RowIdsWithin { rect: r, access })
        .unwrap()
        .into_row_ids()
}

fn config(seed: u64) -> HarnessConfig {
    HarnessConfig {
        iterations: 1_500,
        lifecycle_interval: 150,
        seed: Some(seed),
        database_path: PathBuf::from("fuzz.db"),
        extension_path: PathBuf::from("spatial.duckdb_extension"),
        ..HarnessConfig::default()
    }
}

// ================================================================================================
// Sampler
// ================================================================================================

/// # Scenario
/// Sample rectangles under a range of bounds, down to the 2 × 2 minimum.
///
/// # Expected behavior
/// Every rectangle satisfies `0 <= x1 < x2 < width` and
/// `0 <= y1 < y2 < height`.
#[test]
fn sampler_rectangles_are_well_formed_for_any_bounds() {
    let mut rng = StdRng::seed_from_u64(1);
    for (w, h) in [(2, 2), (2, 1000), (3, 7), (1000, 1000), (65_536, 3)] {
        let sampler = RectangleSampler::new(w, h).unwrap();
        for _ in 0..500 {
            let r = sampler.sample(&mut rng).unwrap();
            assert!(r.x1() < r.x2() && r.x2() < w, "{r} in {w}x{h}");
            assert!(r.y1() < r.y2() && r.y2() < h, "{r} in {w}x{h}");
        }
    }
}

// ================================================================================================
// Accounting
// ================================================================================================

/// # Scenario
/// 500 random operations with no lifecycle event.
///
/// # Expected behavior
/// The table holds the sum of reported insert counts minus the sum of
/// reported delete counts.
#[test]
fn row_count_is_inserts_minus_deletes() {
    let engine = SimEngine::new();
    let mut session = ready_session(&engine);
    let generator =
        WorkloadGenerator::new(RectangleSampler::new(1000, 1000).unwrap(), 0.5, 1000).unwrap();
    let mut rng = StdRng::seed_from_u64(99);

    let (mut inserted, mut deleted) = (0u64, 0u64);
    for _ in 0..500 {
        let op = generator.generate(&mut rng).unwrap();
        let n = executor::execute_operation(&mut session, &op).unwrap();
        match op {
            Operation::Insert { .. } => inserted += n,
            Operation::Delete { .. } => deleted += n,
        }
    }

    assert_eq!(count(&mut session), inserted - deleted);
}

// ================================================================================================
// Lifecycle
// ================================================================================================

/// # Scenario
/// Insert 500 points into (10,10,200,200), checkpoint, hard restart, query
/// (10,10,200,200).
///
/// # Expected behavior
/// 500 rows from both the index and the full scan, with no duplicates.
#[test]
fn checkpointed_insert_survives_hard_restart() {
    let engine = SimEngine::new();
    let mut session = ready_session(&engine);
    let controller = LifecycleController::new(&engine);
    let r = rect(10, 10, 200, 200);

    let inserted = executor::execute_operation(
        &mut session,
        &Operation::Insert {
            rect: r,
            point_count: 500,
            seed: 2024,
        },
    )
    .unwrap();
    assert_eq!(inserted, 500);
    controller
        .apply(&mut session, LifecycleAction::Checkpoint)
        .unwrap();
    controller
        .apply(&mut session, LifecycleAction::HardRestart)
        .unwrap();

    let indexed = ids(&mut session, r, Access::Index);
    let scanned = ids(&mut session, r, Access::FullScan);
    assert_eq!(indexed.len(), 500);
    assert_eq!(indexed, scanned);
    assert_eq!(indexed.iter().collect::<BTreeSet<_>>().len(), 500);
}

/// # Scenario
/// Insert 100 points into (0,0,50,50), delete (0,0,50,50) without a
/// checkpoint, soft reload, query (0,0,50,50).
///
/// # Expected behavior
/// Zero rows from both access paths.
#[test]
fn uncheckpointed_delete_survives_soft_reload() {
    let engine = SimEngine::new();
    let mut session = ready_session(&engine);
    let r = rect(0, 0, 50, 50);

    executor::execute_operation(
        &mut session,
        &Operation::Insert {
            rect: r,
            point_count: 100,
            seed: 7,
        },
    )
    .unwrap();
    let deleted = executor::execute_operation(&mut session, &Operation::Delete { rect: r }).unwrap();
    assert_eq!(deleted, 100);

    LifecycleController::new(&engine)
        .apply(&mut session, LifecycleAction::SoftReload)
        .unwrap();

    assert!(ids(&mut session, r, Access::Index).is_empty());
    assert!(ids(&mut session, r, Access::FullScan).is_empty());
}

/// # Scenario
/// Populate, then run many lifecycle transitions back to back with no
/// operations in between.
///
/// # Expected behavior
/// Row count and both access paths stay identical throughout, and the
/// engine never sees two live connections.
#[test]
fn idle_transitions_change_nothing() {
    let engine = SimEngine::new();
    let mut session = ready_session(&engine);
    let controller = LifecycleController::new(&engine);
    executor::execute_operation(
        &mut session,
        &Operation::Insert {
            rect: rect(100, 100, 900, 900),
            point_count: 999,
            seed: 3,
        },
    )
    .unwrap();
    let full = rect(0, 0, 999, 999);
    let before = (count(&mut session), ids(&mut session, full, Access::Index));

    for action in [
        LifecycleAction::SoftReload,
        LifecycleAction::HardRestart,
        LifecycleAction::Checkpoint,
        LifecycleAction::HardRestart,
        LifecycleAction::SoftReload,
    ] {
        controller.apply(&mut session, action).unwrap();
        let after = (count(&mut session), ids(&mut session, full, Access::Index));
        assert_eq!(before, after, "after {action}");
        assert_eq!(after.1, ids(&mut session, full, Access::FullScan));
    }

    assert_eq!(engine.peak_live_connections(), 1);
    let c = session.counters();
    assert_eq!((c.checkpoints, c.soft_reloads, c.hard_restarts), (1, 2, 2));
}

// ================================================================================================
// Full runs
// ================================================================================================

#[test]
fn seeded_runs_are_reproducible() {
    let a = Harness::new(config(100), Box::new(SimEngine::new()))
        .unwrap()
        .run()
        .unwrap();
    let b = Harness::new(config(100), Box::new(SimEngine::new()))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(a, b);
    assert_eq!(a.counters.operations(), 1_490);
}

/// # Scenario
/// Record a run in a journal and replay it on a fresh engine.
///
/// # Expected behavior
/// The replay reproduces every operation's row count and the counters.
#[test]
fn journaled_run_replays_faithfully() {
    let tmp = TempDir::new().unwrap();
    let journal = tmp.path().join("fuzz.journal");
    let config = HarnessConfig {
        journal_path: Some(journal.clone()),
        ..config(55)
    };

    let run = Harness::new(config, Box::new(SimEngine::new()))
        .unwrap()
        .run()
        .unwrap();
    let engine: Box<dyn Engine> = Box::new(SimEngine::new());
    let report = replay(&journal, engine.as_ref(), None).unwrap();

    assert!(report.is_faithful());
    assert_eq!(report.counters, run.counters);
}

// ================================================================================================
// Findings
// ================================================================================================

/// # Scenario
/// An engine that replays its WAL twice on open, exercised with hard
/// restarts only.
///
/// # Expected behavior
/// The run stops with a durability violation and a failure report lands
/// in the findings directory.
#[test]
fn duplicated_recovery_is_reported() {
    let tmp = TempDir::new().unwrap();
    let findings = tmp.path().join("findings");
    let engine = SimEngine::with_faults(SimFaults {
        duplicate_wal_replay: true,
        ..SimFaults::default()
    });
    let config = HarnessConfig {
        insert_probability: 1.0,
        lifecycle: LifecycleWeights {
            checkpoint: 0.0,
            soft_reload: 0.0,
        },
        findings_dir: Some(findings.clone()),
        ..config(8)
    };

    let err = Harness::new(config, Box::new(engine))
        .unwrap()
        .run()
        .unwrap_err();

    assert!(matches!(
        &err,
        HarnessError::Consistency(f) if f.kind == FindingKind::DurabilityViolation
    ));
    assert_eq!(err.exit_code(), 2);
    assert!(findings.join("failure-8-150.json").exists());
}
