//! Logging setup for the command-line front end.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the binary (or to the embedding application).

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Filter directive for a `-v` count: 0 info, 1 debug, 2+ trace.
pub fn level_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Installs a stderr `fmt` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `directive` is used.
pub fn init_logging(directive: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(directive)
            .map_err(|e| anyhow!("invalid log level {directive:?}: {e}"))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}
