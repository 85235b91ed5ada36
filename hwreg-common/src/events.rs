//! Upload event types and broadcast bus
//!
//! Progress of an upload run is published as [`UploadEvent`]s on an
//! [`EventBus`]. Subscribers (SSE clients, log sinks, tests) receive every
//! event emitted after they subscribe; nothing is replayed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Upload run event
///
/// Serialized with an internal `type` tag for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UploadEvent {
    /// A run was accepted by the supervisor
    RunStarted {
        run_id: Uuid,
        /// True when the run replays the previous run's failed records
        retry: bool,
        timestamp: DateTime<Utc>,
    },

    /// Pre-flight duplicate check finished for all candidates
    PreflightChecked {
        run_id: Uuid,
        candidates: usize,
        already_registered: usize,
    },

    /// Processing of one record began
    RecordStarted {
        run_id: Uuid,
        /// Zero-based position in the run
        index: usize,
        total: usize,
        serial: String,
    },

    /// One status poll of a submitted record
    PollAttempt {
        run_id: Uuid,
        serial: String,
        attempt: u32,
        max_attempts: u32,
    },

    /// A record reached its final row for this run
    RecordCompleted {
        run_id: Uuid,
        index: usize,
        serial: String,
        result: String,
        status: String,
        reason: String,
    },

    /// The run finished and its outcome is available
    RunCompleted {
        run_id: Uuid,
        success: bool,
        total: usize,
        succeeded: usize,
        failed: usize,
        duplicate: usize,
        pending: usize,
        timestamp: DateTime<Utc>,
    },

    /// Every candidate was already registered; nothing was submitted
    RunBlocked {
        run_id: Uuid,
        serials: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// The run aborted before processing any record
    RunFailed {
        run_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// The run was stopped by a cancel or shutdown request
    RunCancelled {
        run_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl UploadEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            UploadEvent::RunStarted { .. } => "RunStarted",
            UploadEvent::PreflightChecked { .. } => "PreflightChecked",
            UploadEvent::RecordStarted { .. } => "RecordStarted",
            UploadEvent::PollAttempt { .. } => "PollAttempt",
            UploadEvent::RecordCompleted { .. } => "RecordCompleted",
            UploadEvent::RunCompleted { .. } => "RunCompleted",
            UploadEvent::RunBlocked { .. } => "RunBlocked",
            UploadEvent::RunFailed { .. } => "RunFailed",
            UploadEvent::RunCancelled { .. } => "RunCancelled",
        }
    }

    /// Run the event belongs to
    pub fn run_id(&self) -> Uuid {
        match self {
            UploadEvent::RunStarted { run_id, .. }
            | UploadEvent::PreflightChecked { run_id, .. }
            | UploadEvent::RecordStarted { run_id, .. }
            | UploadEvent::PollAttempt { run_id, .. }
            | UploadEvent::RecordCompleted { run_id, .. }
            | UploadEvent::RunCompleted { run_id, .. }
            | UploadEvent::RunBlocked { run_id, .. }
            | UploadEvent::RunFailed { run_id, .. }
            | UploadEvent::RunCancelled { run_id, .. } => *run_id,
        }
    }

    /// True for the last event a run emits
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadEvent::RunCompleted { .. }
                | UploadEvent::RunBlocked { .. }
                | UploadEvent::RunFailed { .. }
        )
    }
}

/// Broadcast bus for upload events
///
/// Cheap to clone; all clones share one channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<UploadEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers that fall more than `capacity` events behind miss
    /// the oldest events (`RecvError::Lagged`).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: UploadEvent) {
        let _ = self.tx.send(event);
    }
}
