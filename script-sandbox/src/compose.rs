//! Script Composition Wrapper.
//!
//! Turns a tool's raw source plus its per-call inputs into the
//! [`ExecutionContext`] mapping exposed as `context` and the source that is
//! actually evaluated.

use serde_json::{Map, Value};
use tool_primitives::ToolDefinition;

use crate::defaults::{fill_defaults, missing_required};
use crate::error::{SandboxError, SandboxResult};
use crate::source::declares_execute;
use crate::value::{HostMap, HostValue};

/// Per-invocation inputs handed to a script.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Call arguments. Always a JSON object.
    pub args: Map<String, Value>,
    /// Session metadata supplied by the orchestration layer.
    pub metadata: Map<String, Value>,
    /// Parent tool name when the tool inherits from another.
    pub inherit_from: Option<String>,
    /// Output of the parent tool, when fetched ahead of evaluation.
    pub inherited_result: Option<Value>,
}

impl ExecutionContext {
    /// Builds the live mapping exposed to the guest as `context`.
    #[must_use]
    pub fn into_host_map(self) -> HostMap {
        let map = HostMap::new();
        map.insert("args", HostMap::from_json(self.args));
        map.insert("metadata", HostMap::from_json(self.metadata));
        if let Some(parent) = self.inherit_from {
            map.insert("inherit_from", parent);
        }
        if let Some(result) = self.inherited_result {
            map.insert("inherited_result", HostValue::from(result));
        }
        map
    }
}

/// The output of composition: the context mapping and the runnable source.
#[derive(Debug, Clone)]
pub struct ComposedScript {
    /// Mapping to expose as `context`. Host callers may keep a clone and read
    /// the script's writes after the run.
    pub context: HostMap,
    /// Source to evaluate.
    pub source: String,
}

const CALL_SUPER: &str =
    "const callSuper = () => callTool(context.inherit_from, context.args);\n";

/// Wraps raw tool code.
///
/// Prepends a `callSuper` helper when `inherit_from` is set and appends
/// `return execute(context);` when the code declares an `execute` entry point.
///
/// # Errors
///
/// Returns [`SandboxError::Composition`] if `args` is not a JSON object.
pub fn wrap(
    code: &str,
    args: Value,
    metadata: Map<String, Value>,
    inherit_from: Option<&str>,
) -> SandboxResult<ComposedScript> {
    let Value::Object(args) = args else {
        return Err(SandboxError::composition("tool arguments must be a JSON object"));
    };
    let context = ExecutionContext {
        args,
        metadata,
        inherit_from: inherit_from.map(str::to_owned),
        inherited_result: None,
    };
    Ok(ComposedScript {
        context: context.into_host_map(),
        source: wrap_source(code, inherit_from.is_some()),
    })
}

fn wrap_source(code: &str, inherits: bool) -> String {
    let mut source = String::with_capacity(code.len() + CALL_SUPER.len() + 32);
    if inherits {
        source.push_str(CALL_SUPER);
    }
    source.push_str(code);
    if declares_execute(code) {
        source.push_str("\nreturn execute(context);");
    }
    source
}

/// Composes a stored tool definition with call arguments.
///
/// Fills schema defaults, checks required parameters, then wraps. A
/// prefetched parent output is exposed as `context.inherited_result`.
///
/// # Errors
///
/// Returns [`SandboxError::Composition`] when the arguments are not an
/// object or a required parameter is still missing after default filling.
pub fn compose(
    definition: &ToolDefinition,
    args: Value,
    metadata: Map<String, Value>,
    inherited_result: Option<Value>,
) -> SandboxResult<ComposedScript> {
    if !args.is_object() {
        return Err(SandboxError::composition(format!(
            "arguments for `{}` must be a JSON object",
            definition.name()
        )));
    }
    let schema = definition.json_schema();
    let args = fill_defaults(&schema, &args);
    let missing = missing_required(&schema, &args);
    if !missing.is_empty() {
        return Err(SandboxError::composition(format!(
            "missing required parameter(s) for `{}`: {}",
            definition.name(),
            missing.join(", ")
        )));
    }
    let composed = wrap(definition.code(), args, metadata, definition.inherit_from())?;
    if let Some(result) = inherited_result {
        composed
            .context
            .insert("inherited_result", HostValue::from(result));
    }
    Ok(composed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tool_primitives::{ParameterType, ToolParameter};

    #[test]
    fn context_carries_args_and_metadata() {
        let mut metadata = Map::new();
        metadata.insert("session".into(), json!("s-1"));
        let composed = wrap("context.args.x", json!({"x": 1}), metadata, None).unwrap();
        assert_eq!(
            composed.context.to_json(),
            json!({"args": {"x": 1}, "metadata": {"session": "s-1"}})
        );
        assert_eq!(composed.source, "context.args.x");
    }

    #[test]
    fn execute_entry_point_is_invoked() {
        let composed = wrap(
            "function execute(context) { return context.args; }",
            json!({}),
            Map::new(),
            None,
        )
        .unwrap();
        assert!(composed.source.ends_with("\nreturn execute(context);"));
    }

    #[test]
    fn inheriting_tools_get_call_super() {
        let composed = wrap("callSuper()", json!({"q": "x"}), Map::new(), Some("A")).unwrap();
        assert!(composed.source.starts_with("const callSuper = () => callTool(context.inherit_from, context.args);"));
        assert_eq!(composed.context.to_json()["inherit_from"], json!("A"));
    }

    #[test]
    fn rejects_non_object_args() {
        let err = wrap("1", json!([1]), Map::new(), None).unwrap_err();
        assert_eq!(err.kind(), "CompositionError");
    }

    #[test]
    fn compose_fills_defaults_and_checks_required() {
        let definition = ToolDefinition::builder("shell")
            .parameter(ToolParameter::new("command", ParameterType::String).required())
            .parameter(ToolParameter::new("timeout", ParameterType::Integer).with_default(json!(60)))
            .code("context.args")
            .build()
            .unwrap();

        let composed = compose(&definition, json!({"command": "ls"}), Map::new(), None).unwrap();
        assert_eq!(
            composed.context.to_json()["args"],
            json!({"command": "ls", "timeout": 60})
        );

        let err = compose(&definition, json!({}), Map::new(), None).unwrap_err();
        assert!(err.to_string().contains("command"));
    }

    #[test]
    fn compose_exposes_inherited_result() {
        let definition = ToolDefinition::builder("child")
            .code("context.inherited_result")
            .inherit_from("parent")
            .build()
            .unwrap();
        let composed =
            compose(&definition, json!({}), Map::new(), Some(json!({"ok": true}))).unwrap();
        assert_eq!(composed.context.to_json()["inherited_result"], json!({"ok": true}));
    }
}
