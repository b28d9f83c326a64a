//! Event types and EventBus
//!
//! Server-wide notifications (project changes, orchestration runs) broadcast
//! over a tokio broadcast channel and forwarded to `/api/events` SSE clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// QuickVibe event types
///
/// Serialized with a `type` tag for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum QvEvent {
    /// Project created or updated (save, update, generation, orchestration)
    ProjectSaved {
        project_id: String,
        user_id: String,
        created: bool,
        timestamp: DateTime<Utc>,
    },

    /// Project removed with all its children
    ProjectDeleted {
        project_id: String,
        user_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Public project forked into another user's account
    ProjectForked {
        source_id: String,
        fork_id: String,
        user_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Collaborator joined a project by accepting an invite
    CollaboratorJoined {
        project_id: String,
        user_id: String,
        role: String,
        timestamp: DateTime<Utc>,
    },

    /// Orchestration run started
    OrchestrationStarted {
        run_id: String,
        user_id: String,
        task_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Orchestration run finished (success or failure)
    OrchestrationFinished {
        run_id: String,
        user_id: String,
        success: bool,
        timestamp: DateTime<Utc>,
    },
}

impl QvEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            QvEvent::ProjectSaved { .. } => "ProjectSaved",
            QvEvent::ProjectDeleted { .. } => "ProjectDeleted",
            QvEvent::ProjectForked { .. } => "ProjectForked",
            QvEvent::CollaboratorJoined { .. } => "CollaboratorJoined",
            QvEvent::OrchestrationStarted { .. } => "OrchestrationStarted",
            QvEvent::OrchestrationFinished { .. } => "OrchestrationFinished",
        }
    }

    /// User the event concerns; SSE subscribers only see their own events
    pub fn user_id(&self) -> &str {
        match self {
            QvEvent::ProjectSaved { user_id, .. }
            | QvEvent::ProjectDeleted { user_id, .. }
            | QvEvent::ProjectForked { user_id, .. }
            | QvEvent::CollaboratorJoined { user_id, .. }
            | QvEvent::OrchestrationStarted { user_id, .. }
            | QvEvent::OrchestrationFinished { user_id, .. } => user_id,
        }
    }
}

/// Broadcast bus for [`QvEvent`]
///
/// Cloning shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QvEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    ///
    /// ```
    /// use qv_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<QvEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; `Err` when nobody is subscribed
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: QvEvent) -> Result<usize, broadcast::error::SendError<QvEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: QvEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
