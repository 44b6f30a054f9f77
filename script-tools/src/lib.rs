//! Scripted tools running in an embedded JavaScript sandbox.
//!
//! Depend on this crate via `cargo add script-tools`. It bundles the
//! workspace crates behind feature flags so embedders can leave out the
//! sandbox, settings loading or tracing setup they do not need.

#![warn(missing_docs, clippy::pedantic)]

/// Tool definitions and identifiers.
pub use tool_primitives as primitives;

/// Tool registry and lookup interface.
pub use tool_registry as registry;

/// Script sandbox and object bridge (enabled by `sandbox` feature).
#[cfg(feature = "sandbox")]
pub use script_sandbox as sandbox;

/// Sandbox settings loading (enabled by `config` feature).
#[cfg(feature = "config")]
pub use tool_config as config;

/// Tracing setup (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use tool_telemetry as telemetry;
