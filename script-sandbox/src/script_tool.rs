//! Tools whose behaviour is a stored script.

use std::sync::{Arc, Weak};

use serde_json::{Map, Value};
use tool_primitives::ToolDefinition;
use tool_registry::{Tool, ToolError, ToolHandle, ToolMetadata, ToolRegistry, ToolResult};
use tracing::debug;

use crate::compose::{ComposedScript, compose};
use crate::defaults::fill_defaults;
use crate::error::{SandboxError, SandboxResult};
use crate::executor::{InvocationRequest, ScriptExecutor};
use crate::scope::{self, Frame};
use crate::sink::EventSink;

/// A [`ToolDefinition`] executed through a [`ScriptExecutor`].
///
/// Holds the executor weakly: registering a script tool in the registry the
/// executor itself looks tools up in does not create a cycle.
#[derive(Debug, Clone)]
pub struct ScriptTool {
    definition: ToolDefinition,
    executor: Weak<ScriptExecutor>,
}

impl ScriptTool {
    /// Binds `definition` to `executor`.
    #[must_use]
    pub fn new(definition: ToolDefinition, executor: &Arc<ScriptExecutor>) -> Self {
        Self {
            definition,
            executor: Arc::downgrade(executor),
        }
    }

    /// The wrapped definition.
    #[must_use]
    pub const fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    /// Registry metadata derived from the definition.
    #[must_use]
    pub fn metadata(&self) -> ToolMetadata {
        ToolMetadata::from_definition(&self.definition)
    }

    fn executor(&self) -> SandboxResult<Arc<ScriptExecutor>> {
        self.executor.upgrade().ok_or(SandboxError::PoolClosed)
    }

    /// Runs the tool with explicit session metadata and sink.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Composition`] for invalid arguments or a
    /// missing parent, otherwise whatever the script run reports.
    pub fn invoke_with(
        &self,
        args: Value,
        metadata: Map<String, Value>,
        sink: Option<Arc<dyn EventSink>>,
    ) -> SandboxResult<Value> {
        let executor = self.executor()?;
        let args = self.with_defaults(&args);
        let inherited = self.prefetch_parent(&executor, &args, &metadata, sink.as_ref())?;
        let request = self.request(args, metadata, sink, inherited)?;
        Ok(executor.invoke(request)?.result)
    }

    /// Asynchronous form of [`Self::invoke_with`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::invoke_with`].
    pub async fn invoke_async(
        &self,
        args: Value,
        metadata: Map<String, Value>,
        sink: Option<Arc<dyn EventSink>>,
    ) -> SandboxResult<Value> {
        let executor = self.executor()?;
        let args = self.with_defaults(&args);
        let inherited = match self.parent_handle(&executor)? {
            Some(parent) => {
                let args = args.clone();
                let metadata = metadata.clone();
                let sink = sink.clone();
                let output = tokio::task::spawn_blocking(move || {
                    invoke_parent(&parent, args, metadata, sink)
                })
                .await
                .map_err(SandboxError::interpreter)??;
                Some(output)
            }
            None => None,
        };
        let request = self.request(args, metadata, sink, inherited)?;
        Ok(executor.invoke_async(request).await?.result)
    }

    /// The parent sees the same arguments `callSuper` would forward.
    fn with_defaults(&self, args: &Value) -> Value {
        fill_defaults(&self.definition.json_schema(), args)
    }

    fn request(
        &self,
        args: Value,
        metadata: Map<String, Value>,
        sink: Option<Arc<dyn EventSink>>,
        inherited: Option<Value>,
    ) -> SandboxResult<InvocationRequest> {
        let ComposedScript { context, source } =
            compose(&self.definition, args, metadata.clone(), inherited)?;
        let mut request = InvocationRequest::new(source, self.definition.name())
            .with_context(context)
            .with_metadata(metadata);
        if let Some(sink) = sink {
            request = request.with_sink(sink);
        }
        Ok(request)
    }

    fn parent_handle(&self, executor: &ScriptExecutor) -> SandboxResult<Option<ToolHandle>> {
        if !executor.config().prefetch_parent() {
            return Ok(None);
        }
        let Some(parent) = self.definition.inherit_from() else {
            return Ok(None);
        };
        executor.tools().lookup(parent).map(Some).ok_or_else(|| {
            SandboxError::composition(format!(
                "parent tool `{parent}` of `{}` is not registered",
                self.definition.name()
            ))
        })
    }

    fn prefetch_parent(
        &self,
        executor: &ScriptExecutor,
        args: &Value,
        metadata: &Map<String, Value>,
        sink: Option<&Arc<dyn EventSink>>,
    ) -> SandboxResult<Option<Value>> {
        let Some(parent) = self.parent_handle(executor)? else {
            return Ok(None);
        };
        debug!(tool = self.definition.name(), parent = parent.metadata().name(), "prefetching parent output");
        invoke_parent(&parent, args.clone(), metadata.clone(), sink.cloned()).map(Some)
    }
}

fn invoke_parent(
    parent: &ToolHandle,
    args: Value,
    metadata: Map<String, Value>,
    sink: Option<Arc<dyn EventSink>>,
) -> SandboxResult<Value> {
    let current = scope::current();
    let _frame = scope::enter(Frame {
        tool_name: parent.metadata().name().to_owned(),
        metadata,
        sink,
        deadline: current.as_ref().and_then(|frame| frame.deadline),
        depth: current.as_ref().map_or(0, |frame| frame.depth),
    });
    let args = fill_defaults(parent.metadata().parameters(), &args);
    parent.invoke(args).map_err(|err| SandboxError::Runtime {
        message: format!("parent tool `{}` failed: {err}", parent.metadata().name()),
        stack: None,
    })
}

impl Tool for ScriptTool {
    fn invoke(&self, input: Value) -> ToolResult<Value> {
        let (metadata, sink) = scope::current()
            .map(|frame| (frame.metadata, frame.sink))
            .unwrap_or_default();
        self.invoke_with(input, metadata, sink)
            .map_err(|err| ToolError::execution(format!("{}: {err}", err.kind())))
    }
}

/// Registers `definition` as a script tool in `registry`.
///
/// # Errors
///
/// Returns [`ToolError::DuplicateTool`] if the name is taken.
pub fn register_script_tool(
    registry: &ToolRegistry,
    executor: &Arc<ScriptExecutor>,
    definition: ToolDefinition,
) -> ToolResult<()> {
    let tool = ScriptTool::new(definition, executor);
    registry.register_tool(tool.metadata(), tool)
}
