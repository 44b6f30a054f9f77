//! Script sandbox and host/guest object bridge.
//!
//! Tools defined as small JavaScript programs run inside embedded QuickJS
//! interpreters, one per worker thread. Host mappings are exposed to scripts
//! as live proxies: guest reads and writes go straight to the host
//! [`HostMap`], with no copy in between. Scripts reach the outside world only
//! through `console.*`, `ssePush` (and its helpers) and `callTool`.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use script_sandbox::{HostMap, SandboxConfig, ScriptExecutor};
//! use serde_json::json;
//! use tool_registry::ToolRegistry;
//!
//! let executor = ScriptExecutor::new(SandboxConfig::default(), Arc::new(ToolRegistry::new()))?;
//! let context = HostMap::from_value(json!({"args": {"name": "Alice"}}));
//! let execution = executor.run("context.args.name = 'Bob'; 1 + 1", "demo", Some(context.clone()))?;
//! assert_eq!(execution.result, json!(2));
//! assert_eq!(context.to_json()["args"]["name"], "Bob");
//! # Ok::<(), script_sandbox::SandboxError>(())
//! ```

#![warn(missing_docs, clippy::pedantic)]

mod bridge;
mod callbacks;
mod compose;
mod config;
mod defaults;
mod error;
mod executor;
mod interpreter;
mod pool;
mod registry;
mod scope;
mod script_tool;
mod sink;
mod source;
mod value;
mod wire;

pub use callbacks::call_tool;
pub use compose::{ComposedScript, ExecutionContext, compose, wrap};
pub use config::SandboxConfig;
pub use defaults::{fill_defaults, missing_required};
pub use error::{BridgeError, SandboxError, SandboxResult};
pub use executor::{
    CONTEXT_BINDING, Execution, ExecutorStats, InvocationRequest, ResultType, ScriptExecutor,
};
pub use registry::{ProxyHandle, ProxyRegistry};
pub use script_tool::{ScriptTool, register_script_tool};
pub use sink::{
    ChannelSink, CollectingSink, ConsoleLevel, ConsoleRecord, EventSink, SinkEvent,
};
pub use value::{HostMap, HostValue, MapKey};
pub use wire::{GuestWire, HostWire};
