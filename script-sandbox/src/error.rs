//! Error types for the sandbox and its object bridge.

use std::time::Duration;

use thiserror::Error;
use tool_primitives::ProxyId;

/// Result alias used by the sandbox.
pub type SandboxResult<T> = Result<T, SandboxError>;

/// Errors raised by the Proxy Registry.
///
/// These never reach guest code: bridge callbacks degrade them to `null` or
/// `false` before returning into the interpreter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// An explicit identifier passed to `create` is already registered.
    #[error("proxy id `{0}` is already registered")]
    DuplicateId(ProxyId),

    /// A guest-supplied wire value could not be decoded.
    #[error("malformed bridge value: {0}")]
    Malformed(String),
}

/// Uniform failure shape returned by the execution coordinator.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Guest source could not be parsed.
    #[error("syntax error: {message}")]
    Syntax {
        /// Interpreter diagnostic.
        message: String,
    },

    /// The script threw while running.
    #[error("runtime error: {message}")]
    Runtime {
        /// Exception message, prefixed with the exception name when known.
        message: String,
        /// Guest stack trace, if the engine produced one.
        stack: Option<String>,
    },

    /// The script result has no host-native representation.
    #[error("serialization error: {message}")]
    Serialization {
        /// Why conversion failed.
        message: String,
    },

    /// Context assembly or argument validation failed before evaluation.
    #[error("composition error: {message}")]
    Composition {
        /// What was wrong with the inputs.
        message: String,
    },

    /// Evaluation exceeded its deadline and was interrupted.
    #[error("script exceeded its time limit of {limit:?}")]
    Timeout {
        /// Configured limit.
        limit: Duration,
    },

    /// The embedded engine could not be created or driven.
    #[error("interpreter failure: {message}")]
    Interpreter {
        /// Engine diagnostic.
        message: String,
    },

    /// Work was submitted after the worker pool was closed.
    #[error("worker pool is closed")]
    PoolClosed,

    /// A registry operation failed on the host side.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Nested `callTool` chains went deeper than allowed.
    #[error("call depth {depth} exceeds the limit of {limit}")]
    CallDepthExceeded {
        /// Depth that was attempted.
        depth: usize,
        /// Configured maximum.
        limit: usize,
    },
}

impl SandboxError {
    /// Stable classification string for the orchestration layer.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Syntax { .. } => "SyntaxError",
            Self::Runtime { .. } => "RuntimeError",
            Self::Serialization { .. } => "SerializationError",
            Self::Composition { .. } => "CompositionError",
            Self::Timeout { .. } => "TimeoutError",
            Self::Interpreter { .. } => "InterpreterError",
            Self::PoolClosed => "PoolClosed",
            Self::Bridge(_) => "BridgeError",
            Self::CallDepthExceeded { .. } => "CallDepthExceeded",
        }
    }

    pub(crate) fn composition(message: impl Into<String>) -> Self {
        Self::Composition {
            message: message.into(),
        }
    }

    pub(crate) fn interpreter(message: impl std::fmt::Display) -> Self {
        Self::Interpreter {
            message: message.to_string(),
        }
    }
}
