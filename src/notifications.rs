//! Notification system for flow events.
//!
//! The core never blocks on user-facing messaging: events are handed
//! to every registered sink and sink failures are logged, not
//! propagated.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// All flow events that can be dispatched to sinks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum FlowEvent {
    /// The current step changed
    #[serde(rename = "step.changed")]
    StepChanged { from: usize, to: usize },

    /// A navigation request arrived while another was in flight
    #[serde(rename = "navigation.rejected")]
    NavigationRejected { requested: usize },

    /// The watchdog force-released a hung navigation lock
    #[serde(rename = "navigation.timed_out")]
    NavigationTimedOut { request_id: Uuid, held_secs: u64 },

    /// Forward navigation was blocked by validation
    #[serde(rename = "validation.failed")]
    ValidationFailed {
        step_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
        message: String,
    },

    /// Saving progress failed; navigation proceeds regardless
    #[serde(rename = "progress.save_failed")]
    ProgressSaveFailed { reason: String },

    /// An upload burst began
    #[serde(rename = "upload.started")]
    UploadStarted { file: String },

    /// A failed attempt is being retried
    #[serde(rename = "upload.retried")]
    UploadRetried { file: String, attempt: u32 },

    /// A file exhausted its automatic attempts
    #[serde(rename = "upload.failed")]
    UploadFailed {
        file: String,
        attempts: u32,
        error: String,
    },

    /// A file finished uploading
    #[serde(rename = "upload.completed")]
    UploadCompleted { file: String, remote_ref: String },

    /// Finalization finished for a parent record
    #[serde(rename = "upload.finalized")]
    UploadsFinalized { parent_id: String, uploaded: usize },
}

/// A sink that receives flow events. Delivery is fire-and-forget from
/// the core's perspective.
pub trait NotificationSink: Send + Sync {
    /// Short name used when logging delivery failures.
    fn name(&self) -> &str;

    fn deliver(&self, event: &FlowEvent) -> anyhow::Result<()>;
}

/// Central dispatcher fanning each event out to every registered sink.
pub struct NotificationService {
    sinks: Vec<Arc<dyn NotificationSink>>,
    enabled: bool,
}

impl NotificationService {
    pub fn new() -> Self {
        Self {
            sinks: Vec::new(),
            enabled: true,
        }
    }

    /// A service with no sinks that drops every event (for hosts that
    /// do their own surfacing, and for tests).
    pub fn disabled() -> Self {
        Self {
            sinks: Vec::new(),
            enabled: false,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Dispatch an event to all sinks. A failing sink is logged and
    /// skipped; it never starves the remaining sinks or the caller.
    pub fn notify(&self, event: &FlowEvent) {
        if !self.enabled {
            return;
        }
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(event) {
                tracing::warn!(sink = sink.name(), error = %e, "Notification delivery failed");
            }
        }
    }
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new()
    }
}

/// Default sink that surfaces events through the tracing pipeline.
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn deliver(&self, event: &FlowEvent) -> anyhow::Result<()> {
        match event {
            FlowEvent::NavigationTimedOut { .. }
            | FlowEvent::UploadFailed { .. }
            | FlowEvent::ProgressSaveFailed { .. } => {
                tracing::warn!(?event, "flow event");
            }
            _ => tracing::info!(?event, "flow event"),
        }
        Ok(())
    }
}

/// Records delivered events for test assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<FlowEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FlowEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contains(&self, predicate: impl Fn(&FlowEvent) -> bool) -> bool {
        self.events().iter().any(|e| predicate(e))
    }
}

impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn deliver(&self, event: &FlowEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}
