//! Log output for the `track-usage` binary.
//!
//! The library only emits `tracing` events; installing a subscriber is left to
//! the binary. `RUST_LOG` takes precedence over the configured level.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Build the filter: `RUST_LOG` if set and valid, else `level`.
pub fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber, writing to stderr so stdout stays parseable.
pub fn init(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

