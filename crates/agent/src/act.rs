//! Act phase: works through the plan one step at a time.
//!
//! The plan seeds a FIFO work queue. Each iteration pops one step and makes
//! one model call for it with the executable toolset attached; tool calls
//! are run and fed back until the model answers with an `ActionRecord`.
//! A record may carry `addedSteps`, which go to the front of the queue in
//! their original order, ahead of anything queued earlier.
//!
//! The loop stops when the queue is empty or after `2 × step_budget`
//! iterations, whichever comes first. Hitting the ceiling is logged, not
//! fatal: later phases work with whatever history exists.
//!
//! ```text
//! queue: [A, B]          pop A → record{addedSteps: [S1, S2]}
//! queue: [S1, S2, B]     pop S1 ...
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use planact_config::{ActConfig, EngineConfig};
use planact_core::error::Result;
use planact_core::event::{DomainEvent, EventBus};
use planact_core::message::{Conversation, Message, MessageToolCall};
use planact_core::plan::{ActionRecord, Plan, PlanStep};
use planact_core::provider::{Provider, ProviderRequest, ResponseFormat, Usage};
use planact_core::structured::parse_partial;
use planact_core::tool::{ToolCall, ToolOutcome};
use planact_tools::{MergedToolset, ToolEntry};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::prompts;
use crate::reply::ReplyStream;
use crate::stream_event::{EventSink, TurnEvent};

/// A declared-tool call the caller has to fulfill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// What the act loop produced.
#[derive(Debug, Clone, Default)]
pub struct ActOutcome {
    /// One record per processed queue item, in execution order
    pub history: Vec<ActionRecord>,
    pub external_calls: Vec<ExternalToolCall>,
    pub iterations: usize,
    pub tool_calls_made: usize,
    /// Steps still queued when the iteration ceiling was reached
    pub unfinished_steps: usize,
}

pub struct ActPhase {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    config: ActConfig,
    event_bus: Arc<EventBus>,
    turn_id: String,
}

/// Result of processing one queue item.
struct StepExecution {
    record: ActionRecord,
    external: Option<ExternalToolCall>,
    tool_calls: usize,
}

/// How a single tool call resolved.
enum Dispatch {
    /// Text to feed back to the model as the tool's result.
    Observed(String),
    /// The call must be fulfilled by the caller; the step ends here.
    External(ExternalToolCall),
}

impl ActPhase {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, config: &EngineConfig) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            config: config.act.clone(),
            event_bus: Arc::new(EventBus::default()),
            turn_id: String::new(),
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn with_turn_id(mut self, turn_id: impl Into<String>) -> Self {
        self.turn_id = turn_id.into();
        self
    }

    pub async fn run(
        &self,
        conversation: &Conversation,
        plan: &Plan,
        tools: &MergedToolset,
        events: &EventSink,
        usage: &mut Usage,
    ) -> Result<ActOutcome> {
        let mut queue: VecDeque<PlanStep> = plan.steps.iter().cloned().collect();
        let max_iterations = self.config.max_iterations();
        let mut outcome = ActOutcome::default();

        while outcome.iterations < max_iterations {
            let Some(step) = queue.pop_front() else {
                break;
            };
            outcome.iterations += 1;

            debug!(
                iteration = outcome.iterations,
                step = %step.title,
                queued = queue.len(),
                "Act iteration"
            );
            events.emit(TurnEvent::StepStarted {
                iteration: outcome.iterations,
                title: step.title.clone(),
            });

            let executed = self
                .execute_step(&step, conversation, &outcome.history, tools, events, usage)
                .await?;
            outcome.tool_calls_made += executed.tool_calls;
            outcome.external_calls.extend(executed.external);

            let record = executed.record;
            if let Some(added) = record.added_steps.as_deref()
                && !added.is_empty()
            {
                self.insert_steps(
                    &mut queue,
                    added,
                    record.added_steps_reason.as_deref(),
                    events,
                );
            }

            events.emit(TurnEvent::ActionRecorded {
                record: record.clone(),
            });
            outcome.history.push(record);
        }

        if !queue.is_empty() {
            outcome.unfinished_steps = queue.len();
            warn!(
                iterations = outcome.iterations,
                max_iterations,
                unfinished = queue.len(),
                "Act iteration ceiling reached, leaving remaining steps unexecuted"
            );
        }

        info!(
            iterations = outcome.iterations,
            records = outcome.history.len(),
            tool_calls = outcome.tool_calls_made,
            "Act phase complete"
        );
        Ok(outcome)
    }

    /// One queue item: model call, tool rounds, record.
    async fn execute_step(
        &self,
        step: &PlanStep,
        conversation: &Conversation,
        history: &[ActionRecord],
        tools: &MergedToolset,
        events: &EventSink,
        usage: &mut Usage,
    ) -> Result<StepExecution> {
        let mut messages = vec![Message::system(prompts::act_system(
            conversation.system_instructions().as_deref(),
        ))];
        messages.extend(conversation.dialogue().cloned());
        messages.push(Message::user(prompts::act_step(step, history)));

        let definitions = tools.definitions();
        let mut tool_calls = 0usize;
        let mut last_content = String::new();

        for round in 1..=self.config.max_tool_rounds {
            let mut request =
                ProviderRequest::streaming(&self.model, messages.clone(), self.temperature);
            request.max_tokens = Some(self.max_tokens);
            request.tools = definitions.clone();
            request.response_format = Some(ResponseFormat::JsonSchema {
                name: "action_record".into(),
                schema: ActionRecord::json_schema(),
            });

            let mut stream = ReplyStream::open(self.provider.as_ref(), request).await?;
            while let Some(delta) = stream.next_delta().await? {
                events.emit(TurnEvent::ActDelta { content: delta });
            }
            let reply = stream.finish().await?;
            if let Some(call_usage) = &reply.usage {
                usage.accumulate(call_usage);
            }

            if reply.tool_calls.is_empty() {
                let record = match parse_partial::<ActionRecord>(&reply.content) {
                    Some(record) => record,
                    None => {
                        debug!(step = %step.title, "Step output is not an action record, using fallback");
                        ActionRecord::fallback(step, &reply.content)
                    }
                };
                return Ok(StepExecution {
                    record,
                    external: None,
                    tool_calls,
                });
            }

            last_content.clone_from(&reply.content);
            messages.push(Message::assistant_with_tool_calls(
                reply.content,
                reply.tool_calls.clone(),
            ));

            for tc in &reply.tool_calls {
                tool_calls += 1;
                match self.dispatch(tc, tools, events).await {
                    Dispatch::Observed(output) => {
                        messages.push(Message::tool_result(&tc.id, output));
                    }
                    Dispatch::External(call) => {
                        return Ok(StepExecution {
                            record: ActionRecord::external_execution(&call.name, &call.id),
                            external: Some(call),
                            tool_calls,
                        });
                    }
                }
            }
            debug!(step = %step.title, round, "Tool round complete");
        }

        warn!(
            step = %step.title,
            max_tool_rounds = self.config.max_tool_rounds,
            "Step ran out of tool rounds without a result"
        );
        Ok(StepExecution {
            record: ActionRecord::fallback(step, &last_content),
            external: None,
            tool_calls,
        })
    }

    async fn dispatch(
        &self,
        tc: &MessageToolCall,
        tools: &MergedToolset,
        events: &EventSink,
    ) -> Dispatch {
        let arguments = match parse_arguments(&tc.arguments) {
            Ok(arguments) => arguments,
            Err(e) => {
                warn!(tool = %tc.name, error = %e, "Tool call arguments are not valid JSON");
                return Dispatch::Observed(format!(
                    "Error: arguments for '{}' are not valid JSON: {e}",
                    tc.name
                ));
            }
        };

        let executable = matches!(tools.get(&tc.name), Some(ToolEntry::Executable { .. }));
        if executable {
            events.emit(TurnEvent::ToolCall {
                id: tc.id.clone(),
                name: tc.name.clone(),
                input: arguments.clone(),
            });
        }

        let call = ToolCall {
            id: tc.id.clone(),
            name: tc.name.clone(),
            arguments,
        };

        let start = Instant::now();
        let result = tools.execute(&call).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(ToolOutcome::Completed(result)) => {
                self.event_bus.publish(DomainEvent::ToolExecuted {
                    tool_name: call.name.clone(),
                    success: result.success,
                    duration_ms,
                    timestamp: Utc::now(),
                });
                events.emit(TurnEvent::ToolResult {
                    id: call.id,
                    name: call.name,
                    output: result.output.clone(),
                    success: result.success,
                });
                Dispatch::Observed(result.output)
            }
            Ok(ToolOutcome::RequiresExternalExecution {
                tool_name,
                call_id,
                arguments,
            }) => {
                info!(tool = %tool_name, call_id = %call_id, "Tool call requires external fulfillment");
                events.emit(TurnEvent::ExternalToolCall {
                    id: call_id.clone(),
                    name: tool_name.clone(),
                    input: arguments.clone(),
                });
                Dispatch::External(ExternalToolCall {
                    id: call_id,
                    name: tool_name,
                    input: arguments,
                })
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool call failed");
                if executable {
                    self.event_bus.publish(DomainEvent::ToolExecuted {
                        tool_name: call.name.clone(),
                        success: false,
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                }
                let output = format!("Error: {e}");
                events.emit(TurnEvent::ToolResult {
                    id: call.id,
                    name: call.name,
                    output: output.clone(),
                    success: false,
                });
                Dispatch::Observed(output)
            }
        }
    }

    fn insert_steps(
        &self,
        queue: &mut VecDeque<PlanStep>,
        added: &[PlanStep],
        reason: Option<&str>,
        events: &EventSink,
    ) {
        for step in added.iter().rev() {
            queue.push_front(step.clone());
        }

        let count = added.len();
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        match reason {
            Some(reason) => info!(count, reason, "Steps inserted at the front of the queue"),
            None => warn!(count, "Steps inserted at the front of the queue without a reason"),
        }

        events.emit(TurnEvent::StepsInserted {
            count,
            reason: reason.map(str::to_string),
        });
        self.event_bus.publish(DomainEvent::StepsInserted {
            turn_id: self.turn_id.clone(),
            count,
            reason: reason.map(str::to_string),
            timestamp: Utc::now(),
        });
    }
}

fn parse_arguments(raw: &str) -> std::result::Result<serde_json::Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw)
}
