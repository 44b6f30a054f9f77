//! Shared error definitions for tool primitives.

use thiserror::Error;

/// Result alias used throughout the tool runtime.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while manipulating tool primitive types.
#[derive(Debug, Error)]
pub enum Error {
    /// Proxy identifier failed validation.
    #[error("invalid proxy id `{id}`: {reason}")]
    InvalidProxyId {
        /// The offending identifier string.
        id: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Tool name failed validation.
    #[error("invalid tool name `{name}`: {reason}")]
    InvalidToolName {
        /// The offending name.
        name: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Tool definition failed validation.
    #[error("invalid tool definition: {reason}")]
    InvalidDefinition {
        /// Human-readable reason for rejection.
        reason: String,
    },
}
