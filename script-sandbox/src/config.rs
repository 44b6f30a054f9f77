//! Runtime limits and pool sizing for the sandbox.

use std::num::NonZeroUsize;
use std::time::Duration;

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;
const DEFAULT_MAX_STACK: usize = 1024 * 1024;
const DEFAULT_CALL_DEPTH: usize = 8;
const WORKER_THREAD_STACK: usize = 16 * 1024 * 1024;

/// Settings consumed by [`crate::ScriptExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    workers: NonZeroUsize,
    timeout: Option<Duration>,
    memory_limit: Option<usize>,
    max_stack_size: Option<usize>,
    max_call_depth: usize,
    prefetch_parent: bool,
    thread_name_prefix: String,
}

impl SandboxConfig {
    /// Creates a configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of worker threads.
    #[must_use]
    pub const fn with_workers(mut self, workers: NonZeroUsize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the per-invocation time limit. `None` disables interruption.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the interpreter heap limit in bytes.
    #[must_use]
    pub const fn with_memory_limit(mut self, bytes: Option<usize>) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Sets the interpreter stack limit in bytes.
    #[must_use]
    pub const fn with_max_stack_size(mut self, bytes: Option<usize>) -> Self {
        self.max_stack_size = bytes;
        self
    }

    /// Sets how deep nested `callTool` chains may go.
    #[must_use]
    pub const fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Runs a tool's parent before the tool itself and exposes its output as
    /// `context.inherited_result`.
    #[must_use]
    pub const fn with_prefetch_parent(mut self, enabled: bool) -> Self {
        self.prefetch_parent = enabled;
        self
    }

    /// Sets the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Number of worker threads.
    #[must_use]
    pub const fn workers(&self) -> NonZeroUsize {
        self.workers
    }

    /// Per-invocation time limit.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Interpreter heap limit in bytes.
    #[must_use]
    pub const fn memory_limit(&self) -> Option<usize> {
        self.memory_limit
    }

    /// Interpreter stack limit in bytes.
    #[must_use]
    pub const fn max_stack_size(&self) -> Option<usize> {
        self.max_stack_size
    }

    /// Maximum nested `callTool` depth.
    #[must_use]
    pub const fn max_call_depth(&self) -> usize {
        self.max_call_depth
    }

    /// Whether parent tools are run ahead of their children.
    #[must_use]
    pub const fn prefetch_parent(&self) -> bool {
        self.prefetch_parent
    }

    /// Worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(&self) -> &str {
        &self.thread_name_prefix
    }

    pub(crate) const fn worker_stack_size() -> usize {
        WORKER_THREAD_STACK
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            workers: NonZeroUsize::new(DEFAULT_WORKERS).expect("non-zero"),
            timeout: Some(DEFAULT_TIMEOUT),
            memory_limit: Some(DEFAULT_MEMORY_LIMIT),
            max_stack_size: Some(DEFAULT_MAX_STACK),
            max_call_depth: DEFAULT_CALL_DEPTH,
            prefetch_parent: false,
            thread_name_prefix: String::from("script-worker"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let config = SandboxConfig::default();
        assert_eq!(config.workers().get(), 4);
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.max_call_depth(), 8);
        assert!(!config.prefetch_parent());
        assert_eq!(config.thread_name_prefix(), "script-worker");
    }

    #[test]
    fn builders_override() {
        let config = SandboxConfig::new()
            .with_workers(NonZeroUsize::new(1).unwrap())
            .with_timeout(None)
            .with_prefetch_parent(true);
        assert_eq!(config.workers().get(), 1);
        assert!(config.timeout().is_none());
        assert!(config.prefetch_parent());
    }
}
