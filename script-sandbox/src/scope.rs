//! Ambient per-thread invocation frames.
//!
//! Host callbacks run synchronously on the thread evaluating the script, so
//! the active tool name, event sink, metadata and deadline are kept in a
//! thread-local stack. Nested `callTool` invocations push a frame on top of
//! their caller's and pop it when they return.

use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};

use crate::sink::EventSink;

/// Ambient state for one running script.
#[derive(Clone)]
pub(crate) struct Frame {
    pub(crate) tool_name: String,
    pub(crate) metadata: Map<String, Value>,
    pub(crate) sink: Option<Arc<dyn EventSink>>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) depth: usize,
}

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
    static ON_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Pops its frame when dropped, on every exit path.
pub(crate) struct FrameGuard {
    _private: (),
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        FRAMES.with(|frames| {
            frames.borrow_mut().pop();
        });
    }
}

/// Pushes `frame` for the current thread.
pub(crate) fn enter(frame: Frame) -> FrameGuard {
    FRAMES.with(|frames| frames.borrow_mut().push(frame));
    FrameGuard { _private: () }
}

/// Snapshot of the innermost frame.
pub(crate) fn current() -> Option<Frame> {
    FRAMES.with(|frames| frames.borrow().last().cloned())
}

/// Depth of the innermost frame, or zero outside any script.
pub(crate) fn depth() -> usize {
    FRAMES.with(|frames| frames.borrow().last().map_or(0, |frame| frame.depth))
}

/// Name of the tool whose script is running on this thread.
pub(crate) fn tool_name() -> String {
    FRAMES.with(|frames| {
        frames
            .borrow()
            .last()
            .map_or_else(|| String::from("quickjs"), |frame| frame.tool_name.clone())
    })
}

/// Sink attached to the innermost frame.
pub(crate) fn sink() -> Option<Arc<dyn EventSink>> {
    FRAMES.with(|frames| frames.borrow().last().and_then(|frame| frame.sink.clone()))
}

/// Marks the current thread as a sandbox worker.
pub(crate) fn mark_worker() {
    ON_WORKER.with(|flag| flag.set(true));
}

/// Returns `true` on sandbox worker threads.
pub(crate) fn on_worker() -> bool {
    ON_WORKER.with(Cell::get)
}
