//! # Ashmem tools
//!
//! Command line tools for exercising ashmem segments and the reclaimer.
//!
//! ## Quickstart guide
//!
//! ```sh
//! cargo run --release --bin=eval_reclaim -- --segments 16 --pages 256 --ops 100000
//! ```
//!
//! This opens 16 segments of 256 pages on the heap backing store, runs a
//! random pin/unpin workload with periodic memory pressure and prints a
//! summary. Use `--backend memfd` for real shared memory and `--output` to
//! save the results as JSON.

use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

/// Initializes `env_logger` (default level `info`) so that log lines do not
/// tear the returned progress bars.
pub fn init_logging_with_progress() -> anyhow::Result<MultiProgress> {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let progress = MultiProgress::new();
    LogWrapper::new(progress.clone(), logger).try_init()?;
    Ok(progress)
}
