//! Turn-level streaming events.
//!
//! `TurnEvent` is the combined, fine-grained view of a turn: every phase's
//! raw token stream plus the structural milestones between them. The
//! reasoning and text channels are derived views meant for end users; this
//! stream is for transports and debugging tools.

use planact_core::event::Phase;
use planact_core::plan::{ActionRecord, Plan};
use planact_core::provider::{FinishReason, Usage};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

/// Events emitted while a turn runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    PhaseStarted { phase: Phase },

    /// Raw structured-output token from the planner.
    PlanDelta { content: String },

    /// The plan the act phase will work through.
    PlanReady { plan: Plan },

    StepStarted { iteration: usize, title: String },

    /// Raw token from an act step.
    ActDelta { content: String },

    /// An in-process tool is being called.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// A declared tool was called; the caller must fulfill it.
    ExternalToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// An act step put new steps at the front of the queue.
    StepsInserted {
        count: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    ActionRecorded { record: ActionRecord },

    /// Final-answer token.
    ResponseDelta { content: String },

    PhaseCompleted { phase: Phase, duration_ms: u64 },

    /// The turn finished; final metadata.
    Done {
        turn_id: String,
        finish_reason: FinishReason,
        usage: Usage,
        iterations: usize,
        tool_calls_made: usize,
    },

    /// The turn ended in a fatal error.
    Error { message: String },
}

impl TurnEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PhaseStarted { .. } => "phase_started",
            Self::PlanDelta { .. } => "plan_delta",
            Self::PlanReady { .. } => "plan_ready",
            Self::StepStarted { .. } => "step_started",
            Self::ActDelta { .. } => "act_delta",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::ExternalToolCall { .. } => "external_tool_call",
            Self::StepsInserted { .. } => "steps_inserted",
            Self::ActionRecorded { .. } => "action_recorded",
            Self::ResponseDelta { .. } => "response_delta",
            Self::PhaseCompleted { .. } => "phase_completed",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

/// Write side of the combined event stream.
///
/// Emitting never waits: an observer that falls behind loses events
/// instead of stalling the turn.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<TurnEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<TurnEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: TurnEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(TrySendError::Full(event)) = tx.try_send(event) {
            debug!(event = event.event_type(), "Event stream full, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_plan_delta() {
        let event = TurnEvent::PlanDelta {
            content: "{\"steps\"".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"plan_delta""#));
    }

    #[test]
    fn event_serialization_steps_inserted_omits_missing_reason() {
        let event = TurnEvent::StepsInserted {
            count: 2,
            reason: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"steps_inserted""#));
        assert!(!json.contains("reason"));
    }

    #[test]
    fn event_serialization_done() {
        let event = TurnEvent::Done {
            turn_id: "abc".into(),
            finish_reason: FinishReason::Stop,
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
            },
            iterations: 2,
            tool_calls_made: 1,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"done""#));
        assert!(json.contains(r#""finish_reason":"stop""#));
        assert!(json.contains(r#""iterations":2"#));
    }

    #[test]
    fn event_type_names() {
        assert_eq!(
            TurnEvent::PhaseStarted { phase: Phase::Act }.event_type(),
            "phase_started"
        );
        assert_eq!(
            TurnEvent::ExternalToolCall {
                id: "a".into(),
                name: "b".into(),
                input: serde_json::Value::Null
            }
            .event_type(),
            "external_tool_call"
        );
        assert_eq!(
            TurnEvent::Error {
                message: "x".into()
            }
            .event_type(),
            "error"
        );
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"phase_completed","phase":"plan","duration_ms":12}"#;
        let event: TurnEvent = serde_json::from_str(json).unwrap();
        match event {
            TurnEvent::PhaseCompleted { phase, duration_ms } => {
                assert_eq!(phase, Phase::Plan);
                assert_eq!(duration_ms, 12);
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[tokio::test]
    async fn full_sink_drops_instead_of_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = EventSink::new(tx);
        sink.emit(TurnEvent::ResponseDelta { content: "a".into() });
        sink.emit(TurnEvent::ResponseDelta { content: "b".into() });
        drop(sink);

        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            received.push(event);
        }
        assert_eq!(received.len(), 1);
    }

    #[test]
    fn disabled_sink_accepts_events() {
        EventSink::disabled().emit(TurnEvent::Error {
            message: "ignored".into(),
        });
    }
}
