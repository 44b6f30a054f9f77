//! Core shared types for script-backed agent tools.

#![warn(missing_docs, clippy::pedantic)]

mod definition;
mod error;
mod ids;

/// Tool definitions and their parameter schema.
pub use definition::{ParameterType, ToolDefinition, ToolDefinitionBuilder, ToolParameter};
/// Error type and result alias shared across the workspace.
pub use error::{Error, Result};
/// Identifiers for proxies and invocations.
pub use ids::{InvocationId, ProxyId};
