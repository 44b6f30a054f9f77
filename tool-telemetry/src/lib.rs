//! Tracing setup for processes hosting the script sandbox.
//!
//! The sandbox logs through `tracing` only; installing a subscriber is left
//! to the embedding binary. These helpers install the usual fmt layer.

#![warn(missing_docs, clippy::pedantic)]

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Default directives when neither `RUST_LOG` nor an explicit filter is set.
pub const DEFAULT_FILTER: &str = "info,script_sandbox=debug";

/// Builds the filter: `RUST_LOG` when present, otherwise `fallback`.
///
/// # Errors
///
/// Fails when `fallback` is not a valid filter directive list.
pub fn env_filter(fallback: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(fallback)
            .with_context(|| format!("invalid tracing filter `{fallback}`")),
    }
}

/// Installs a global fmt subscriber.
///
/// # Errors
///
/// Fails on an invalid filter or when a global subscriber is already set.
pub fn try_init(filter: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_names(true)
        .with_env_filter(env_filter(filter)?)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))
        .context("failed to install tracing subscriber")
}

/// Installs a global fmt subscriber, ignoring a subscriber that is already
/// set. Uses [`DEFAULT_FILTER`] when `filter` is `None`.
pub fn init_tracing(filter: Option<&str>) {
    if let Err(err) = try_init(filter.unwrap_or(DEFAULT_FILTER)) {
        tracing::debug!(error = %err, "tracing already initialised");
    }
}
