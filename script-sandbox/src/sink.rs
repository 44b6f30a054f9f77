//! Output sinks receiving console lines and pushed events from scripts.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Destination for events emitted by a running script.
///
/// Implementations must not block for long: `send` is called synchronously
/// from inside guest evaluation.
pub trait EventSink: Send + Sync {
    /// Delivers one named event. Returns `false` if it could not be delivered.
    fn send(&self, event: &str, data: &str) -> bool;
}

/// One event as delivered to a sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkEvent {
    /// Event name, e.g. `content`, `console`, `done`, `error`.
    pub event: String,
    /// Payload; JSON text for structured data.
    pub data: String,
}

impl SinkEvent {
    /// Creates an event.
    #[must_use]
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

/// Severity of a console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    /// `console.log`
    Info,
    /// `console.warn`
    Warn,
    /// `console.error`
    Error,
}

impl ConsoleLevel {
    pub(crate) fn parse(level: &str) -> Self {
        match level {
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => Self::Info,
        }
    }
}

/// Payload of a `console` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleRecord {
    /// Severity.
    pub level: ConsoleLevel,
    /// Tool whose script produced the line.
    pub tool_name: String,
    /// Space-joined rendering of the arguments.
    pub message: String,
    /// Fractional Unix seconds.
    pub timestamp: f64,
}

/// Sink that stores events in memory. Mostly useful in tests.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl CollectingSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns a copy of everything received so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex has been poisoned by a previous panic.
    #[must_use]
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().expect("collecting sink poisoned").clone()
    }

    /// Removes and returns everything received so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex has been poisoned by a previous panic.
    #[must_use]
    pub fn drain(&self) -> Vec<SinkEvent> {
        let mut lock = self.events.lock().expect("collecting sink poisoned");
        lock.drain(..).collect()
    }

    /// Parses every `console` event whose payload is a console record.
    #[must_use]
    pub fn console_records(&self) -> Vec<ConsoleRecord> {
        self.events()
            .into_iter()
            .filter(|event| event.event == "console")
            .filter_map(|event| serde_json::from_str(&event.data).ok())
            .collect()
    }
}

impl EventSink for CollectingSink {
    fn send(&self, event: &str, data: &str) -> bool {
        self.events
            .lock()
            .map(|mut events| events.push(SinkEvent::new(event, data)))
            .is_ok()
    }
}

/// Sink forwarding events into a tokio channel, typically drained by a
/// streaming response writer.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    /// Creates a sink together with the receiving end of its channel.
    #[must_use]
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<SinkEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { sender }), receiver)
    }
}

impl EventSink for ChannelSink {
    fn send(&self, event: &str, data: &str) -> bool {
        self.sender.send(SinkEvent::new(event, data)).is_ok()
    }
}
