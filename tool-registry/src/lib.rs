//! Tool discovery and invocation utilities.
//!
//! Tools are registered under unique names together with their parameter
//! schema. Script code reaches them exclusively through the [`ToolLookup`]
//! capability handed to the sandbox, which keeps the set of callable tools
//! explicit and substitutable in tests.

#![warn(missing_docs, clippy::pedantic)]

pub mod registry;

pub use registry::{
    Tool, ToolError, ToolHandle, ToolLookup, ToolMetadata, ToolRegistry, ToolResult,
};
