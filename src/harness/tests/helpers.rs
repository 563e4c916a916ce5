use crate::HarnessConfig;
use crate::lifecycle::{LifecycleAction, LifecycleWeights};
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

/// 1000 iterations with a tick every 100, seeded.
pub fn small_config(seed: u64) -> HarnessConfig {
    init_tracing();
    HarnessConfig {
        iterations: 1_000,
        lifecycle_interval: 100,
        seed: Some(seed),
        database_path: PathBuf::from("fuzz.db"),
        extension_path: PathBuf::from("spatial.duckdb_extension"),
        ..HarnessConfig::default()
    }
}

/// Weights that always pick `action`.
pub fn only(action: LifecycleAction) -> LifecycleWeights {
    match action {
        LifecycleAction::Checkpoint => LifecycleWeights {
            checkpoint: 1.0,
            soft_reload: 0.0,
        },
        LifecycleAction::SoftReload => LifecycleWeights {
            checkpoint: 0.0,
            soft_reload: 1.0,
        },
        LifecycleAction::HardRestart => LifecycleWeights {
            checkpoint: 0.0,
            soft_reload: 0.0,
        },
    }
}
