//! Structured progress events streamed to an external observer.
//!
//! Every event pair is opened with [`InFlight::start`], which emits the
//! `running` event, and closed by consuming the returned handle with
//! [`InFlight::complete`]. The handle is moved on completion, so a pair can
//! never be completed twice. A handle dropped while still open (its future
//! was cancelled, or it unwound) closes the pair with a `Cancelled` event.

use crate::models::SearchResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Thoughts,
    Web,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Running,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Pairs the `running` event with its `completed` event.
    pub id: String,
    /// The tool invocation that owns this event.
    pub tool_call_id: String,
    pub title: String,
    pub message: String,
    pub kind: EventKind,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queries: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<SearchResult>>,
    pub emitted_at: DateTime<Utc>,
}

/// Append-only consumer of progress events.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Forwards events into an unbounded channel. A closed receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ProgressSink for MemorySink {
    fn emit(&self, event: ProgressEvent) {
        debug!(
            id = %event.id,
            tool_call_id = %event.tool_call_id,
            status = ?event.status,
            title = %event.title,
            "progress"
        );
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// An opened event pair waiting for its terminal `completed` event.
#[must_use = "an in-flight event must be completed"]
pub struct InFlight {
    sink: Arc<dyn ProgressSink>,
    id: String,
    tool_call_id: String,
    kind: EventKind,
    queries: Option<Vec<String>>,
    open: bool,
}

pub const CANCELLED_TITLE: &str = "Cancelled";

impl InFlight {
    /// Emits the `running` event under a freshly generated correlation id.
    pub fn start(
        sink: &Arc<dyn ProgressSink>,
        tool_call_id: &str,
        kind: EventKind,
        title: impl Into<String>,
        message: impl Into<String>,
        queries: Option<Vec<String>>,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        sink.emit(ProgressEvent {
            id: id.clone(),
            tool_call_id: tool_call_id.to_string(),
            title: title.into(),
            message: message.into(),
            kind,
            status: EventStatus::Running,
            queries: queries.clone(),
            results: None,
            emitted_at: Utc::now(),
        });
        Self {
            sink: Arc::clone(sink),
            id,
            tool_call_id: tool_call_id.to_string(),
            kind,
            queries,
            open: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn complete(
        mut self,
        title: impl Into<String>,
        message: impl Into<String>,
        results: Option<Vec<SearchResult>>,
    ) {
        self.finish(title.into(), message.into(), results);
    }

    fn finish(&mut self, title: String, message: String, results: Option<Vec<SearchResult>>) {
        if !std::mem::replace(&mut self.open, false) {
            return;
        }
        self.sink.emit(ProgressEvent {
            id: std::mem::take(&mut self.id),
            tool_call_id: std::mem::take(&mut self.tool_call_id),
            title,
            message,
            kind: self.kind,
            status: EventStatus::Completed,
            queries: self.queries.take(),
            results,
            emitted_at: Utc::now(),
        });
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.open {
            debug!(id = %self.id, tool_call_id = %self.tool_call_id, "closing abandoned progress event");
            self.finish(CANCELLED_TITLE.to_string(), "Stopped before completion".to_string(), None);
        }
    }
}
