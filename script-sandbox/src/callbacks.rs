//! Host Callback Surface.
//!
//! The host halves of `console.*`, `ssePush` and `callTool`, plus the
//! bridge trap functions, registered into an interpreter exactly once. The
//! guest-side adapters live in the bootstrap script, which captures these
//! functions and removes them from the global scope.

use std::sync::Arc;

use rquickjs::function::Func;
use rquickjs::{Ctx, Object};
use serde_json::{Value, json};
use tool_primitives::ProxyId;
use tool_registry::ToolLookup;
use tracing::{debug, error, warn};

use crate::defaults::fill_defaults;
use crate::registry::ProxyRegistry;
use crate::scope;
use crate::sink::{ConsoleLevel, ConsoleRecord};
use crate::wire::{GuestWire, HostWire};

const BOOTSTRAP: &str = include_str!("bootstrap.js");

/// Capabilities shared by every callback binding of one executor.
#[derive(Clone)]
pub(crate) struct HostEnv {
    pub(crate) registry: Arc<ProxyRegistry>,
    pub(crate) tools: Arc<dyn ToolLookup>,
    pub(crate) max_call_depth: usize,
}

/// Registers the host functions and runs the bootstrap in `ctx`.
///
/// Returns the bridge object the bootstrap builds. It is never reachable from
/// guest globals.
pub(crate) fn install<'js>(ctx: &Ctx<'js>, env: &HostEnv) -> rquickjs::Result<Object<'js>> {
    let globals: Object = ctx.globals();

    let registry = Arc::clone(&env.registry);
    globals.set(
        "__host_proxy_get",
        Func::from(move |id: String, key: String| -> String {
            ProxyId::new(id)
                .map_or_else(|_| HostWire::null(), |id| registry.bridge_get(&id, &key))
                .to_text()
        }),
    )?;

    let registry = Arc::clone(&env.registry);
    globals.set(
        "__host_proxy_set",
        Func::from(move |id: String, key: String, text: String| -> bool {
            let Ok(id) = ProxyId::new(id) else {
                return false;
            };
            match GuestWire::from_text(&text) {
                Ok(value) => registry.bridge_set(&id, &key, value),
                Err(err) => {
                    debug!(proxy = %id, key = %key, error = %err, "discarding malformed write");
                    false
                }
            }
        }),
    )?;

    let registry = Arc::clone(&env.registry);
    globals.set(
        "__host_proxy_has",
        Func::from(move |id: String, key: String| -> bool {
            ProxyId::new(id).is_ok_and(|id| registry.bridge_has(&id, &key))
        }),
    )?;

    let registry = Arc::clone(&env.registry);
    globals.set(
        "__host_proxy_delete",
        Func::from(move |id: String, key: String| -> bool {
            ProxyId::new(id).is_ok_and(|id| registry.bridge_delete(&id, &key))
        }),
    )?;

    let registry = Arc::clone(&env.registry);
    globals.set(
        "__host_proxy_keys",
        Func::from(move |id: String| -> String {
            let keys = ProxyId::new(id)
                .map(|id| registry.bridge_keys(&id))
                .unwrap_or_default();
            serde_json::to_string(&keys).unwrap_or_else(|_| String::from("[]"))
        }),
    )?;

    globals.set(
        "__host_console",
        Func::from(|level: String, message: String| {
            emit_console(ConsoleLevel::parse(&level), message);
        }),
    )?;

    globals.set(
        "__host_sse_push",
        Func::from(|event: String, data: String| -> bool { push_event(&event, &data) }),
    )?;

    let tools = Arc::clone(&env.tools);
    let max_depth = env.max_call_depth;
    globals.set(
        "__host_call_tool",
        Func::from(move |name: String, args: String| -> String {
            let outcome = call_tool(tools.as_ref(), &name, &args, max_depth);
            serde_json::to_string(&outcome).unwrap_or_else(|_| String::from("null"))
        }),
    )?;

    ctx.eval::<Object<'js>, _>(BOOTSTRAP)
}

/// Sends one console line to tracing and to the active sink, if any.
pub(crate) fn emit_console(level: ConsoleLevel, message: String) {
    let tool_name = scope::tool_name();
    match level {
        ConsoleLevel::Info => debug!(tool = %tool_name, "{message}"),
        ConsoleLevel::Warn => warn!(tool = %tool_name, "{message}"),
        ConsoleLevel::Error => error!(tool = %tool_name, "{message}"),
    }
    let Some(sink) = scope::sink() else {
        return;
    };
    let record = ConsoleRecord {
        level,
        tool_name,
        message,
        timestamp: unix_seconds(),
    };
    if let Ok(data) = serde_json::to_string(&record) {
        sink.send("console", &data);
    }
}

#[allow(clippy::cast_precision_loss)]
fn unix_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Pushes a named event to the active sink. `false` when none is attached.
pub(crate) fn push_event(event: &str, data: &str) -> bool {
    scope::sink().is_some_and(|sink| sink.send(event, data))
}

/// Host side of `callTool`.
///
/// Never fails: a missing tool, unparsable arguments, an exceeded call depth
/// and a failing tool are all reported as JSON objects carrying an `error`
/// field. On success the tool's own output is returned.
#[must_use]
pub fn call_tool(tools: &dyn ToolLookup, name: &str, args: &str, max_depth: usize) -> Value {
    let Some(handle) = tools.lookup(name) else {
        return json!({
            "error": "ToolNotFound",
            "tool": name,
            "message": format!("Tool '{name}' not found"),
            "available": tools.tool_names(),
        });
    };

    let args = if args.trim().is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        match serde_json::from_str::<Value>(args) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) => {
                return json!({
                    "error": "InvalidArgs",
                    "tool": name,
                    "message": "Invalid JSON arguments: expected an object",
                });
            }
            Err(err) => {
                return json!({
                    "error": "InvalidArgs",
                    "tool": name,
                    "message": format!("Invalid JSON arguments: {err}"),
                });
            }
        }
    };

    let depth = scope::depth();
    if depth >= max_depth {
        return json!({
            "error": "ToolError",
            "tool": name,
            "message": format!("call depth {} exceeds the limit of {max_depth}", depth + 1),
        });
    }

    let args = fill_defaults(handle.metadata().parameters(), &args);
    match handle.invoke(args) {
        Ok(result) => result,
        Err(err) => {
            debug!(tool = %name, error = %err, "nested tool call failed");
            json!({
                "error": "ToolError",
                "tool": name,
                "message": err.to_string(),
            })
        }
    }
}
