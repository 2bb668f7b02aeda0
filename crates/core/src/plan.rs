//! Plan and action-history types.
//!
//! These are the structured outputs the model produces during a turn, so
//! their serde representation (camelCase) is also the wire shape the model
//! is asked to emit. The JSON schemas handed to the provider live next to
//! the types they describe.

use serde::{Deserialize, Serialize};

/// Optional hint on how a plan step intends to use tools.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_to_internal: Option<bool>,
}

/// One unit of intended work. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub title: String,

    pub instructions: String,

    pub relevant_context: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_strategy: Option<ToolStrategy>,
}

impl PlanStep {
    pub fn new(
        title: impl Into<String>,
        instructions: impl Into<String>,
        relevant_context: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            instructions: instructions.into(),
            relevant_context: relevant_context.into(),
            tool_strategy: None,
        }
    }

    /// Attach a tool strategy hint.
    pub fn with_tool_strategy(mut self, strategy: ToolStrategy) -> Self {
        self.tool_strategy = Some(strategy);
        self
    }
}

/// Ordered plan for a turn. Zero steps means "no decomposition needed".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// JSON schema the plan generation is asked to follow.
    pub fn json_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "steps": {
                    "type": "array",
                    "items": plan_step_schema()
                }
            },
            "required": ["steps"]
        })
    }
}

/// Recorded outcome of one processed queue item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub action: String,

    pub observation: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_steps: Option<Vec<PlanStep>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_steps_reason: Option<String>,
}

impl ActionRecord {
    pub fn new(action: impl Into<String>, observation: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            observation: observation.into(),
            added_steps: None,
            added_steps_reason: None,
        }
    }

    /// Record used when a step's output could not be parsed.
    pub fn fallback(step: &PlanStep, raw_output: &str) -> Self {
        let raw = raw_output.trim();
        let observation = if raw.is_empty() {
            "The step completed without a structured result.".to_string()
        } else {
            raw.to_string()
        };
        Self::new(format!("Executed step: {}", step.title), observation)
    }

    /// Record used when a tool call has to be fulfilled by the caller.
    pub fn external_execution(tool_name: &str, call_id: &str) -> Self {
        Self::new(
            format!("Requested tool '{tool_name}' (call {call_id})"),
            format!(
                "Tool '{tool_name}' has no in-process executor; call {call_id} requires external fulfillment by the caller."
            ),
        )
    }

    /// JSON schema each act step is asked to follow.
    pub fn json_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string" },
                "observation": { "type": "string" },
                "addedSteps": { "type": "array", "items": plan_step_schema() },
                "addedStepsReason": { "type": "string" }
            },
            "required": ["action", "observation"]
        })
    }
}

fn plan_step_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "title": { "type": "string" },
            "instructions": { "type": "string" },
            "relevantContext": { "type": "string" },
            "toolStrategy": {
                "type": "object",
                "properties": {
                    "toolName": { "type": "string" },
                    "reason": { "type": "string" },
                    "fallbackToInternal": { "type": "boolean" }
                }
            }
        },
        "required": ["title", "instructions", "relevantContext"]
    })
}
