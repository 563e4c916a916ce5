use crate::journal::{Event, Journal};
use crate::lifecycle::LifecycleAction;
use crate::sampler::Rectangle;
use crate::session::Counters;
use crate::workload::Operation;
use crate::HarnessConfig;
use std::fs::{self, OpenOptions};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Journal header plus its CRC32, in bytes.
pub const JOURNAL_HDR_SIZE: u64 = 16;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times, only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A short, plausible run: start, two operations, a checkpoint, finish.
pub fn sample_events() -> Vec<Event> {
    let rect = Rectangle::new(10, 10, 200, 200).unwrap();
    vec![
        Event::Started {
            seed: 7,
            engine: "sim".into(),
            config: HarnessConfig::default(),
        },
        Event::Operation {
            iteration: 1,
            operation: Operation::Insert {
                rect,
                point_count: 500,
                seed: 99,
            },
            affected: 500,
        },
        Event::Operation {
            iteration: 2,
            operation: Operation::Delete { rect },
            affected: 500,
        },
        Event::Lifecycle {
            iteration: 3,
            action: LifecycleAction::Checkpoint,
        },
        Event::Finished {
            iterations: 4,
            counters: Counters {
                checkpoints: 1,
                inserts: 1,
                deletes: 1,
                ..Counters::default()
            },
        },
    ]
}

/// Writes `events` to a new journal at `path` and returns the file size.
pub fn write_events(path: &Path, events: &[Event]) -> u64 {
    let mut journal = Journal::create(path).unwrap();
    for event in events {
        journal.append(event).unwrap();
    }
    journal.sync().unwrap();
    drop(journal);
    fs::metadata(path).unwrap().len()
}

/// Truncate the file to the given size.
pub fn truncate_file(path: &Path, size: u64) {
    let f = OpenOptions::new().write(true).open(path).unwrap();
    f.set_len(size).unwrap();
    f.sync_all().unwrap();
}
