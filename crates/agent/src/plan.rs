//! Plan phase: one structured-output call that produces the turn's plan.
//!
//! The planner sees tool names and descriptions but never gets tools
//! attached: a call is either structured output or tool use, not both.
//! The plan streams in as JSON; every time the buffer repairs into a valid
//! `Plan`, that parse replaces the previous one. Whatever parsed last when
//! the stream ends is the plan. If nothing ever parsed, the plan is empty.

use std::sync::Arc;

use planact_config::EngineConfig;
use planact_core::error::Result;
use planact_core::message::{Conversation, Message};
use planact_core::plan::Plan;
use planact_core::provider::{Provider, ProviderRequest, ResponseFormat, Usage};
use planact_core::structured::parse_partial;
use planact_tools::ToolCatalog;
use tracing::{debug, info, warn};

use crate::prompts;
use crate::reply::ReplyStream;
use crate::stream_event::{EventSink, TurnEvent};

pub struct PlanPhase {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_steps: usize,
}

impl PlanPhase {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, config: &EngineConfig) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: config.plan.temperature,
            max_tokens: config.max_tokens,
            max_steps: config.plan.max_steps,
        }
    }

    pub async fn run(
        &self,
        conversation: &Conversation,
        catalog: &ToolCatalog,
        events: &EventSink,
        usage: &mut Usage,
    ) -> Result<Plan> {
        let system = prompts::plan_system(
            catalog,
            self.max_steps,
            conversation.system_instructions().as_deref(),
        );
        let mut messages = vec![Message::system(system)];
        messages.extend(conversation.dialogue().cloned());

        let mut request = ProviderRequest::streaming(&self.model, messages, self.temperature);
        request.max_tokens = Some(self.max_tokens);
        request.response_format = Some(ResponseFormat::JsonSchema {
            name: "plan".into(),
            schema: Plan::json_schema(),
        });

        let mut stream = ReplyStream::open(self.provider.as_ref(), request).await?;
        let mut latest: Option<Plan> = None;

        while let Some(delta) = stream.next_delta().await? {
            events.emit(TurnEvent::PlanDelta { content: delta });
            if let Some(plan) = parse_partial::<Plan>(stream.content()) {
                latest = Some(plan);
            }
        }

        let reply = stream.finish().await?;
        if let Some(call_usage) = &reply.usage {
            usage.accumulate(call_usage);
        }

        let mut plan = match latest {
            Some(plan) => plan,
            None => {
                debug!(
                    output_len = reply.content.len(),
                    "No parseable plan in planner output, using an empty plan"
                );
                Plan::empty()
            }
        };

        if plan.len() > self.max_steps {
            warn!(
                steps = plan.len(),
                max_steps = self.max_steps,
                "Plan exceeds the step limit, truncating"
            );
            plan.steps.truncate(self.max_steps);
        }

        info!(steps = plan.len(), "Plan ready");
        events.emit(TurnEvent::PlanReady { plan: plan.clone() });
        Ok(plan)
    }
}
