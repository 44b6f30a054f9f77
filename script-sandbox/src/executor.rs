//! Execution Coordinator.
//!
//! Each invocation moves through `PENDING → CONTEXT_BOUND → EVALUATING →
//! {SUCCEEDED | FAILED} → RELEASED`. Top-level invocations are dispatched to
//! the worker pool and run on that worker's long-lived interpreter. Nested
//! invocations issued from a script through `callTool` run inline on the
//! calling worker in a fresh interpreter, so a blocked caller never waits on
//! its own queue.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tool_primitives::{InvocationId, ProxyId};
use tool_registry::ToolLookup;
use tracing::{debug, info_span, warn};

use crate::callbacks::HostEnv;
use crate::config::SandboxConfig;
use crate::error::{SandboxError, SandboxResult};
use crate::interpreter::Interpreter;
use crate::pool::{WorkerPool, WorkerState};
use crate::registry::ProxyRegistry;
use crate::scope::{self, Frame};
use crate::sink::EventSink;
use crate::source;
use crate::value::HostMap;

/// Guest name the execution context is bound to.
pub const CONTEXT_BINDING: &str = "context";

/// Type tag of a script result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    /// Plain object, or a value with no JSON form.
    Object,
    /// Array.
    Array,
    /// String.
    String,
    /// Number.
    Number,
    /// Boolean.
    Boolean,
    /// `null` or `undefined`.
    Null,
}

impl ResultType {
    /// Lower-case tag as reported to callers.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Array => "array",
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Null => "null",
        }
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful outcome of an invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// The source as submitted by the caller.
    pub code: String,
    /// The wrapped source the interpreter actually evaluated.
    pub prepared: String,
    /// Host-native result.
    pub result: Value,
    /// Type tag of `result`.
    pub result_type: ResultType,
}

/// Inputs of one invocation.
#[derive(Clone)]
pub struct InvocationRequest {
    code: String,
    tool_name: String,
    context: Option<HostMap>,
    bindings: Vec<(String, HostMap)>,
    sink: Option<Arc<dyn EventSink>>,
    metadata: Map<String, Value>,
}

impl InvocationRequest {
    /// Creates a request for `code` attributed to `tool_name`.
    #[must_use]
    pub fn new(code: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            tool_name: tool_name.into(),
            context: None,
            bindings: Vec::new(),
            sink: None,
            metadata: Map::new(),
        }
    }

    /// Exposes `context` to the script as the global `context`.
    #[must_use]
    pub fn with_context(mut self, context: HostMap) -> Self {
        self.context = Some(context);
        self
    }

    /// Exposes an additional mapping under a global `name`.
    #[must_use]
    pub fn expose(mut self, name: impl Into<String>, map: HostMap) -> Self {
        self.bindings.push((name.into(), map));
        self
    }

    /// Attaches the sink receiving console lines and pushed events.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Attaches session metadata inherited by nested tool calls.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// The submitted source.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The tool the script belongs to.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }
}

impl fmt::Debug for InvocationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationRequest")
            .field("tool_name", &self.tool_name)
            .field("code_len", &self.code.len())
            .field("has_context", &self.context.is_some())
            .field("bindings", &self.bindings.iter().map(|(name, _)| name).collect::<Vec<_>>())
            .field("has_sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

/// Counters describing executor activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    /// Interpreters created, pooled and nested.
    pub interpreters_created: u64,
    /// Times the host surface was installed into an interpreter.
    pub callback_registrations: u64,
    /// Invocations evaluated, successful or not.
    pub invocations: u64,
    /// Invocations that ended in an error.
    pub failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    interpreters_created: AtomicU64,
    callback_registrations: AtomicU64,
    invocations: AtomicU64,
    failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ExecutorStats {
        ExecutorStats {
            interpreters_created: self.interpreters_created.load(Ordering::Relaxed),
            callback_registrations: self.callback_registrations.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    config: SandboxConfig,
    env: HostEnv,
    counters: Counters,
}

/// Releases every registered root on drop, so a context proxy never
/// outlives its invocation.
struct Exposure<'a> {
    registry: &'a ProxyRegistry,
    roots: Vec<ProxyId>,
}

impl<'a> Exposure<'a> {
    const fn new(registry: &'a ProxyRegistry) -> Self {
        Self {
            registry,
            roots: Vec::new(),
        }
    }

    fn register(&mut self, map: HostMap) -> SandboxResult<ProxyId> {
        let id = self.registry.create(map, None)?;
        self.roots.push(id.clone());
        Ok(id)
    }

    fn release(&mut self) -> Vec<ProxyId> {
        let registry = self.registry;
        self.roots
            .drain(..)
            .flat_map(|root| registry.sweep(&root))
            .collect()
    }
}

impl Drop for Exposure<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

impl Shared {
    fn create_interpreter(&self) -> SandboxResult<Interpreter> {
        let interpreter = Interpreter::new(&self.config)?;
        Counters::bump(&self.counters.interpreters_created);
        Ok(interpreter)
    }

    fn run_pooled(&self, state: &mut WorkerState, request: InvocationRequest) -> SandboxResult<Execution> {
        let mut interpreter = match state.interpreter.take() {
            Some(interpreter) => interpreter,
            None => {
                debug!(worker = state.index, "creating worker interpreter");
                self.create_interpreter()?
            }
        };
        let deadline = self.config.timeout().map(|limit| Instant::now() + limit);
        let outcome = self.execute(&mut interpreter, request, 1, deadline);
        state.interpreter = Some(interpreter);
        outcome
    }

    fn run_nested(&self, request: InvocationRequest) -> SandboxResult<Execution> {
        let depth = scope::depth() + 1;
        let limit = self.config.max_call_depth();
        if depth > limit {
            Counters::bump(&self.counters.failures);
            return Err(SandboxError::CallDepthExceeded { depth, limit });
        }
        let own = self.config.timeout().map(|limit| Instant::now() + limit);
        let inherited = scope::current().and_then(|frame| frame.deadline);
        let deadline = match (own, inherited) {
            (Some(own), Some(inherited)) => Some(own.min(inherited)),
            (own, inherited) => own.or(inherited),
        };
        let mut interpreter = self.create_interpreter()?;
        self.execute(&mut interpreter, request, depth, deadline)
    }

    fn execute(
        &self,
        interpreter: &mut Interpreter,
        request: InvocationRequest,
        depth: usize,
        deadline: Option<Instant>,
    ) -> SandboxResult<Execution> {
        let invocation = InvocationId::random();
        let span = info_span!("script", tool = %request.tool_name, %invocation, depth);
        let _entered = span.enter();

        Counters::bump(&self.counters.invocations);
        let outcome = self.evaluate(interpreter, request, depth, deadline);
        if let Err(err) = &outcome {
            Counters::bump(&self.counters.failures);
            warn!(kind = err.kind(), error = %err, "script invocation failed");
        }
        outcome
    }

    fn evaluate(
        &self,
        interpreter: &mut Interpreter,
        request: InvocationRequest,
        depth: usize,
        deadline: Option<Instant>,
    ) -> SandboxResult<Execution> {
        if interpreter.ensure_callbacks(&self.env)? {
            Counters::bump(&self.counters.callback_registrations);
        }

        let InvocationRequest {
            code,
            tool_name,
            context,
            bindings,
            sink,
            metadata,
        } = request;
        let _frame = scope::enter(Frame {
            tool_name,
            metadata,
            sink,
            deadline,
            depth,
        });

        let mut exposure = Exposure::new(&self.env.registry);
        let mut bound = Vec::with_capacity(bindings.len() + 1);
        if let Some(context) = context {
            bound.push((CONTEXT_BINDING.to_owned(), exposure.register(context)?));
        }
        for (name, map) in bindings {
            let id = exposure.register(map)?;
            bound.push((name, id));
        }

        let prepared = source::prepare(&code);
        let outcome = interpreter.bind(&bound).and_then(|()| {
            interpreter.arm(deadline);
            let evaluated = interpreter.evaluate(&prepared);
            interpreter.disarm();
            evaluated
        });

        let names: Vec<String> = bound.into_iter().map(|(name, _)| name).collect();
        if let Err(err) = interpreter.unbind(&names) {
            debug!(error = %err, "failed to unbind exposed names");
        }
        let swept = exposure.release();
        if let Err(err) = interpreter.forget(&swept) {
            debug!(error = %err, "failed to purge cached proxies");
        }

        let (result, result_type) = outcome?;
        Ok(Execution {
            code,
            prepared,
            result,
            result_type,
        })
    }
}

/// Runs scripts on a pool of worker-owned interpreters.
pub struct ScriptExecutor {
    shared: Arc<Shared>,
    pool: WorkerPool,
}

impl ScriptExecutor {
    /// Starts the worker pool.
    ///
    /// Interpreters are created lazily, on each worker's first job.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Interpreter`] if a worker thread cannot be spawned.
    pub fn new(config: SandboxConfig, tools: Arc<dyn ToolLookup>) -> SandboxResult<Arc<Self>> {
        let pool = WorkerPool::new(&config)?;
        let env = HostEnv {
            registry: Arc::new(ProxyRegistry::new()),
            tools,
            max_call_depth: config.max_call_depth(),
        };
        Ok(Arc::new(Self {
            shared: Arc::new(Shared {
                config,
                env,
                counters: Counters::default(),
            }),
            pool,
        }))
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.shared.config
    }

    /// Registry holding the proxies of running invocations.
    #[must_use]
    pub fn registry(&self) -> &Arc<ProxyRegistry> {
        &self.shared.env.registry
    }

    /// Tool lookup used by `callTool`.
    #[must_use]
    pub fn tools(&self) -> &Arc<dyn ToolLookup> {
        &self.shared.env.tools
    }

    /// Snapshot of the activity counters.
    #[must_use]
    pub fn stats(&self) -> ExecutorStats {
        self.shared.counters.snapshot()
    }

    /// Number of worker threads.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.pool.size().get()
    }

    /// Runs a script and blocks until it finishes.
    ///
    /// From a sandbox worker (a nested `callTool`) the script runs inline in
    /// a fresh interpreter; anywhere else it is queued on the pool. Avoid
    /// calling this from an async task; use [`Self::invoke_async`] there.
    ///
    /// # Errors
    ///
    /// Returns the [`SandboxError`] describing why the script failed.
    pub fn invoke(&self, request: InvocationRequest) -> SandboxResult<Execution> {
        if scope::on_worker() {
            return self.shared.run_nested(request);
        }
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        let shared = Arc::clone(&self.shared);
        self.pool.submit(Box::new(move |state: &mut WorkerState| {
            let _ = tx.send(shared.run_pooled(state, request));
        }))?;
        rx.recv()
            .map_err(|_| SandboxError::interpreter("worker dropped the invocation"))?
    }

    /// Runs a script on the pool, suspending the calling task until it
    /// finishes. Same contract as [`Self::invoke`].
    ///
    /// # Errors
    ///
    /// Returns the [`SandboxError`] describing why the script failed.
    pub async fn invoke_async(&self, request: InvocationRequest) -> SandboxResult<Execution> {
        if scope::on_worker() {
            return self.shared.run_nested(request);
        }
        let (tx, rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        self.pool.submit(Box::new(move |state: &mut WorkerState| {
            let _ = tx.send(shared.run_pooled(state, request));
        }))?;
        rx.await
            .map_err(|_| SandboxError::interpreter("worker dropped the invocation"))?
    }

    /// Shorthand for [`Self::invoke`] with an optional context mapping.
    ///
    /// # Errors
    ///
    /// Returns the [`SandboxError`] describing why the script failed.
    pub fn run(&self, code: &str, tool_name: &str, context: Option<HostMap>) -> SandboxResult<Execution> {
        let mut request = InvocationRequest::new(code, tool_name);
        if let Some(context) = context {
            request = request.with_context(context);
        }
        self.invoke(request)
    }

    /// Rejects further invocations. Queued work still completes.
    pub fn close(&self) {
        self.pool.close();
    }

    /// Closes the pool and waits for the workers to drain.
    pub fn shutdown(&self) {
        self.pool.join();
    }

    /// Returns `true` once the executor has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

impl fmt::Debug for ScriptExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptExecutor")
            .field("workers", &self.workers())
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
