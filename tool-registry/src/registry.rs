//! Runtime registry for tool metadata and execution.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tool_primitives::ToolDefinition;
use tracing::debug;

/// Result alias for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Metadata describing a registered tool.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolMetadata {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default = "empty_object_schema")]
    parameters: Value,
}

fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

impl ToolMetadata {
    /// Creates metadata for the supplied tool name with an empty schema.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidMetadata`] if the name is empty.
    pub fn new(name: impl Into<String>) -> ToolResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ToolError::InvalidMetadata {
                reason: "tool name cannot be empty".into(),
            });
        }

        Ok(Self {
            name,
            description: None,
            parameters: empty_object_schema(),
        })
    }

    /// Derives metadata from a stored tool definition.
    #[must_use]
    pub fn from_definition(definition: &ToolDefinition) -> Self {
        let description = Some(definition.description().to_owned()).filter(|d| !d.is_empty());
        Self {
            name: definition.name().to_owned(),
            description,
            parameters: definition.json_schema(),
        }
    }

    /// Sets the human-readable description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the JSON schema of the tool's arguments.
    #[must_use]
    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }

    /// Returns the tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the optional description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the argument schema used for default filling.
    #[must_use]
    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    /// Renders the function-calling schema advertised to the model.
    #[must_use]
    pub fn function_schema(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description.clone().unwrap_or_default(),
                "parameters": self.parameters,
            }
        })
    }
}

/// Trait implemented by tool executors.
///
/// Invocation is synchronous: script code calls tools from inside a running
/// interpreter and waits for the answer on the same thread.
pub trait Tool: Send + Sync {
    /// Invokes the tool with the given JSON input, returning JSON output.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Execution`] when the tool fails.
    fn invoke(&self, input: Value) -> ToolResult<Value>;
}

impl<F> Tool for F
where
    F: Send + Sync + Fn(Value) -> ToolResult<Value>,
{
    fn invoke(&self, input: Value) -> ToolResult<Value> {
        (self)(input)
    }
}

/// Handle returned by the registry for direct invocation.
#[derive(Clone)]
pub struct ToolHandle {
    metadata: ToolMetadata,
    executor: Arc<dyn Tool>,
}

impl ToolHandle {
    /// Pairs metadata with an executor outside of any registry.
    #[must_use]
    pub fn new(metadata: ToolMetadata, executor: Arc<dyn Tool>) -> Self {
        Self { metadata, executor }
    }

    /// Returns the associated metadata.
    #[must_use]
    pub fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    /// Executes the underlying tool implementation.
    ///
    /// # Errors
    ///
    /// Propagates any [`ToolError::Execution`] returned by the underlying
    /// implementation.
    pub fn invoke(&self, input: Value) -> ToolResult<Value> {
        self.executor.invoke(input)
    }
}

impl std::fmt::Debug for ToolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHandle")
            .field("name", &self.metadata.name)
            .finish_non_exhaustive()
    }
}

/// Capability to resolve tool names at call time.
///
/// The sandbox only ever sees this interface, so tests can hand it a fake and
/// embedders can scope which tools a script may reach.
pub trait ToolLookup: Send + Sync {
    /// Resolves a tool by name.
    fn lookup(&self, name: &str) -> Option<ToolHandle>;

    /// Names of every tool currently resolvable, sorted.
    fn tool_names(&self) -> Vec<String>;
}

/// Registry that stores tool implementations keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<BTreeMap<String, ToolHandle>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("registered", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool implementation.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::DuplicateTool`] if the name is already present.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub fn register_tool<T>(&self, metadata: ToolMetadata, tool: T) -> ToolResult<()>
    where
        T: Tool + 'static,
    {
        let mut inner = self.inner.write().expect("tool registry poisoned");
        let name = metadata.name().to_owned();
        if inner.contains_key(&name) {
            return Err(ToolError::DuplicateTool { name });
        }

        debug!(tool = %name, "tool registered");
        inner.insert(
            name,
            ToolHandle {
                metadata,
                executor: Arc::new(tool),
            },
        );

        Ok(())
    }

    /// Registers a tool, replacing any existing registration of the same name.
    ///
    /// Returns `true` when an earlier registration was replaced.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub fn upsert_tool<T>(&self, metadata: ToolMetadata, tool: T) -> bool
    where
        T: Tool + 'static,
    {
        let mut inner = self.inner.write().expect("tool registry poisoned");
        let name = metadata.name().to_owned();
        debug!(tool = %name, "tool upserted");
        inner
            .insert(
                name,
                ToolHandle {
                    metadata,
                    executor: Arc::new(tool),
                },
            )
            .is_some()
    }

    /// Removes a tool, returning whether it was present.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    pub fn unregister(&self, name: &str) -> bool {
        let mut inner = self.inner.write().expect("tool registry poisoned");
        inner.remove(name).is_some()
    }

    /// Returns a handle to the tool matching the supplied name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ToolHandle> {
        let inner = self.inner.read().ok()?;
        inner.get(name).cloned()
    }

    /// Invokes a registered tool directly.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::UnknownTool`] when the tool is not found or
    /// propagates [`ToolError::Execution`] when the implementation fails.
    pub fn invoke(&self, name: &str, input: Value) -> ToolResult<Value> {
        let handle = self.get(name).ok_or_else(|| ToolError::UnknownTool {
            name: name.to_owned(),
        })?;
        handle.invoke(input)
    }

    /// Lists the metadata of all registered tools.
    ///
    /// # Panics
    ///
    /// Panics if the internal registry lock is poisoned.
    #[must_use]
    pub fn list(&self) -> Vec<ToolMetadata> {
        let inner = self.inner.read().expect("tool registry poisoned");
        inner
            .values()
            .map(|handle| handle.metadata.clone())
            .collect()
    }

    /// Lists registered tool names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.inner
            .read()
            .map(|inner| inner.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl ToolLookup for ToolRegistry {
    fn lookup(&self, name: &str) -> Option<ToolHandle> {
        self.get(name)
    }

    fn tool_names(&self) -> Vec<String> {
        self.names()
    }
}

impl<L> ToolLookup for Arc<L>
where
    L: ToolLookup + ?Sized,
{
    fn lookup(&self, name: &str) -> Option<ToolHandle> {
        (**self).lookup(name)
    }

    fn tool_names(&self) -> Vec<String> {
        (**self).tool_names()
    }
}

/// Errors produced by tool registration and invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Tool metadata failed validation.
    #[error("invalid tool metadata: {reason}")]
    InvalidMetadata {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Tool name collided with an existing registration.
    #[error("tool `{name}` is already registered")]
    DuplicateTool {
        /// Name of the offending tool.
        name: String,
    },

    /// Requested tool does not exist.
    #[error("tool `{name}` is not registered")]
    UnknownTool {
        /// Name of the missing tool.
        name: String,
    },

    /// Tool execution failed.
    #[error("tool execution failed: {reason}")]
    Execution {
        /// Human-readable error returned by the tool implementation.
        reason: String,
    },
}

impl ToolError {
    /// Creates an execution error from the supplied reason.
    #[must_use]
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::Execution {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tool_primitives::{ParameterType, ToolParameter};

    fn metadata() -> ToolMetadata {
        ToolMetadata::new("echo")
            .unwrap()
            .with_description("Echo incoming payload")
    }

    #[test]
    fn register_and_invoke_tool() {
        let registry = ToolRegistry::new();
        registry
            .register_tool(metadata(), |input: Value| -> ToolResult<Value> { Ok(input) })
            .unwrap();

        let payload = json!({ "message": "hello" });
        let output = registry.invoke("echo", payload.clone()).unwrap();
        assert_eq!(output, payload);
    }

    #[test]
    fn duplicate_registration_errors() {
        let registry = ToolRegistry::new();

        registry
            .register_tool(metadata(), |input: Value| -> ToolResult<Value> { Ok(input) })
            .unwrap();

        let err = registry
            .register_tool(ToolMetadata::new("echo").unwrap(), |v: Value| -> ToolResult<Value> { Ok(v) })
            .expect_err("duplicate registration should fail");

        assert!(matches!(err, ToolError::DuplicateTool { name } if name == "echo"));
    }

    #[test]
    fn upsert_replaces_existing_tool() {
        let registry = ToolRegistry::new();
        assert!(!registry.upsert_tool(metadata(), |_: Value| -> ToolResult<Value> { Ok(json!(1)) }));
        assert!(registry.upsert_tool(metadata(), |_: Value| -> ToolResult<Value> { Ok(json!(2)) }));
        assert_eq!(registry.invoke("echo", Value::Null).unwrap(), json!(2));
        assert!(registry.unregister("echo"));
        assert!(registry.get("echo").is_none());
    }

    #[test]
    fn unknown_tool_errors() {
        let registry = ToolRegistry::new();
        let err = registry
            .invoke("missing", Value::Null)
            .expect_err("unknown tool should error");

        assert!(matches!(err, ToolError::UnknownTool { name } if name == "missing"));
    }

    #[test]
    fn invalid_metadata_errors() {
        let err = ToolMetadata::new("").expect_err("empty name should error");
        assert!(matches!(err, ToolError::InvalidMetadata { .. }));
    }

    #[test]
    fn lookup_lists_sorted_names() {
        let registry = ToolRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry
                .register_tool(ToolMetadata::new(name).unwrap(), |v: Value| -> ToolResult<Value> { Ok(v) })
                .unwrap();
        }
        let lookup: &dyn ToolLookup = &registry;
        assert_eq!(lookup.tool_names(), vec!["alpha", "mid", "zeta"]);
        assert!(lookup.lookup("mid").is_some());
        assert!(lookup.lookup("nope").is_none());
    }

    #[test]
    fn metadata_from_definition_carries_schema() {
        let definition = ToolDefinition::builder("greet")
            .description("Say hello")
            .parameter(ToolParameter::new("name", ParameterType::String).required())
            .code("function execute(context) { return 'hi ' + context.args.name; }")
            .build()
            .unwrap();
        let metadata = ToolMetadata::from_definition(&definition);
        assert_eq!(metadata.description(), Some("Say hello"));
        assert_eq!(metadata.parameters()["required"], json!(["name"]));
        assert_eq!(
            metadata.function_schema()["function"]["name"],
            json!("greet")
        );
    }
}
