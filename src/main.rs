//! rtree-fuzz entry point
//!
//! Installs logging and delegates to the CLI module. Exits with 2 when the
//! run ended in a consistency finding and 1 on any other error.

use rtree_fuzz::cli;
use tracing_subscriber::EnvFilter;

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = cli::run() {
        eprintln!("{e}");
        std::process::exit(e.exit_code());
    }
}
