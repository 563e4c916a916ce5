//! Fault injection in the simulated engine.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::engine::sim::{SimEngine, SimFaults};
    use crate::engine::{Access, ConnectConfig, Connection, Engine, RowSet, Statement};
    use crate::sampler::Rectangle;
    use std::path::PathBuf;

    fn db() -> PathBuf {
        PathBuf::from("faults.db")
    }

    fn load() -> Statement {
        Statement::Load {
            extension: PathBuf::from("spatial.duckdb_extension"),
        }
    }

    fn populated(engine: &SimEngine) -> Box<dyn Connection> {
        let mut conn = engine.connect(Some(&db()), &ConnectConfig::default()).unwrap();
        conn.execute(&load()).unwrap();
        conn.execute(&Statement::CreateTable).unwrap();
        conn.execute(&Statement::CreateIndex).unwrap();
        conn.execute(&Statement::Checkpoint).unwrap();
        conn.execute(&Statement::InsertPoints {
            rect: Rectangle::new(0, 0, 100, 100).unwrap(),
            count: 10,
            seed: 3,
        })
        .unwrap();
        conn
    }

    fn reopen(engine: &SimEngine) -> Box<dyn Connection> {
        let mut conn = engine.connect(Some(&db()), &ConnectConfig::default()).unwrap();
        conn.execute(&load()).unwrap();
        conn
    }

    #[test]
    fn fault__discard_wal_loses_post_checkpoint_rows() {
        let engine = SimEngine::with_faults(SimFaults {
            discard_wal_on_unclean_close: true,
            ..SimFaults::default()
        });
        let mut conn = populated(&engine);
        conn.execute(&Statement::DisableCheckpointOnShutdown).unwrap();
        conn.close().unwrap();

        let mut conn = reopen(&engine);
        assert_eq!(conn.execute(&Statement::CountRows).unwrap().row_count(), 0);
    }

    #[test]
    fn fault__duplicate_replay_doubles_rows() {
        let engine = SimEngine::new();
        let mut conn = populated(&engine);
        conn.execute(&Statement::DisableCheckpointOnShutdown).unwrap();
        conn.close().unwrap();

        engine.set_faults(SimFaults {
            duplicate_wal_replay: true,
            ..SimFaults::default()
        });
        let mut conn = reopen(&engine);
        assert_eq!(conn.execute(&Statement::CountRows).unwrap().row_count(), 20);
    }

    #[test]
    fn fault__dropped_index_entry_diverges_from_scan() {
        let engine = SimEngine::new();
        populated(&engine).close().unwrap();

        engine.set_faults(SimFaults {
            drop_index_entry_on_open: true,
            ..SimFaults::default()
        });
        let mut conn = reopen(&engine);
        let rect = Rectangle::new(0, 0, 100, 100).unwrap();
        let index = conn
            .execute(&Statement::RowIdsWithin {
                rect,
                access: Access::Index,
            })
            .unwrap()
            .into_row_ids();
        let scan = conn
            .execute(&Statement::RowIdsWithin {
                rect,
                access: Access::FullScan,
            })
            .unwrap()
            .into_row_ids();
        assert_eq!(index.len() + 1, scan.len());
    }

    #[test]
    fn fault__attach_and_load_failures() {
        let engine = SimEngine::with_faults(SimFaults {
            fail_attach: true,
            fail_load: true,
            ..SimFaults::default()
        });
        let mut conn = engine.connect(None, &ConnectConfig::default()).unwrap();
        assert!(conn.execute(&load()).is_err());
        assert!(
            conn.execute(&Statement::Attach {
                path: db(),
                alias: "faults".into()
            })
            .is_err()
        );
    }

    #[test]
    fn fault__fail_after_statements() {
        let engine = SimEngine::with_faults(SimFaults {
            fail_after_statements: Some(2),
            ..SimFaults::default()
        });
        let mut conn = engine.connect(Some(&db()), &ConnectConfig::default()).unwrap();
        conn.execute(&load()).unwrap();
        conn.execute(&Statement::CreateTable).unwrap();
        let err = conn.execute(&Statement::CreateIndex).unwrap_err();
        assert!(err.to_string().contains("injected failure"));
    }

    #[test]
    fn fault__short_inserts_and_overcounted_deletes() {
        let engine = SimEngine::with_faults(SimFaults {
            short_inserts_by: Some(3),
            overcount_deletes_by: Some(5),
            ..SimFaults::default()
        });
        let mut conn = populated(&engine);
        assert_eq!(conn.execute(&Statement::CountRows).unwrap().row_count(), 7);

        let deleted = conn
            .execute(&Statement::DeleteWithin {
                rect: Rectangle::new(0, 0, 100, 100).unwrap(),
            })
            .unwrap();
        assert_eq!(deleted.row_count(), 12);
        assert_eq!(conn.execute(&Statement::CountRows).unwrap().row_count(), 0);
    }

    /// # Scenario
    /// Deletes leave their index entries behind.
    ///
    /// # Expected behavior
    /// Index and full scan still agree, but the index holds more entries
    /// than the table holds rows.
    #[test]
    fn fault__stale_index_entries_only_show_in_entry_count() {
        let engine = SimEngine::with_faults(SimFaults {
            stale_index_entries_on_delete: true,
            ..SimFaults::default()
        });
        let mut conn = populated(&engine);
        let rect = Rectangle::new(0, 0, 100, 100).unwrap();
        conn.execute(&Statement::DeleteWithin { rect }).unwrap();

        let index = conn
            .execute(&Statement::RowIdsWithin {
                rect,
                access: Access::Index,
            })
            .unwrap();
        assert_eq!(index, RowSet::RowIds(Vec::new()));
        assert_eq!(conn.execute(&Statement::CountRows).unwrap().row_count(), 0);
        assert_eq!(
            conn.execute(&Statement::IndexEntryCount).unwrap().row_count(),
            10
        );
    }
}
