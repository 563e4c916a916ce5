//! Journal append and read-back.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::journal::tests::helpers::*;
    use crate::journal::{Event, Journal, JournalHeader, JournalReader, read_journal};
    use tempfile::TempDir;

    /// # Scenario
    /// Write a short run and read it back.
    ///
    /// # Expected behavior
    /// Every event comes back in order and nothing is reported corrupt.
    #[test]
    fn journal__events_read_back_in_order() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("run.journal");
        let events = sample_events();

        write_events(&path, &events);
        let contents = read_journal(&path).unwrap();

        assert_eq!(contents.events, events);
        assert!(contents.corruption.is_none());
    }

    #[test]
    fn journal__empty_journal_has_header_only() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.journal");

        let size = write_events(&path, &[]);
        assert_eq!(size, JOURNAL_HDR_SIZE);

        let reader = JournalReader::open(&path).unwrap();
        assert_eq!(reader.header().magic, JournalHeader::MAGIC);
        assert_eq!(reader.count(), 0);
    }

    #[test]
    fn journal__create_truncates_existing_file() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("reuse.journal");
        write_events(&path, &sample_events());

        let journal = Journal::create(&path).unwrap();
        assert_eq!(journal.records(), 0);
        drop(journal);

        assert!(read_journal(&path).unwrap().events.is_empty());
    }

    #[test]
    fn journal__records_are_json_tagged() {
        let json = serde_json::to_value(Event::Lifecycle {
            iteration: 500,
            action: crate::lifecycle::LifecycleAction::SoftReload,
        })
        .unwrap();
        assert_eq!(json["event"], "lifecycle");
        assert_eq!(json["action"], "soft_reload");
        assert_eq!(json["iteration"], 500);
    }
}
