//! Domain event system: out-of-band notifications about a turn.
//!
//! The orchestrator publishes events as phases complete, tools run, and the
//! work queue grows. Observers (metrics, audit logs) subscribe without being
//! on the streaming path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// The three phases of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Plan,
    Act,
    Response,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Plan => "plan",
            Self::Act => "act",
            Self::Response => "response",
        };
        f.write_str(name)
    }
}

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A phase finished successfully
    PhaseCompleted {
        turn_id: String,
        phase: Phase,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed in-process
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An act step appended work to the queue
    StepsInserted {
        turn_id: String,
        count: usize,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// The final answer was generated
    ResponseGenerated {
        turn_id: String,
        model: String,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// The turn ended in a fatal error
    TurnFailed {
        turn_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
