//! Orchestrator: runs Plan → Act → Response and fans the turn out to the
//! caller's channels.
//!
//! A turn exposes:
//!
//! - `events`: the combined [`TurnEvent`] stream,
//! - `reasoning`: narration blocks for each plan step and action record,
//!   only when reasoning was requested,
//! - `text`: the final answer's deltas,
//! - `finish_reason` and `usage` futures.
//!
//! ```text
//!   engine task                         reasoning task
//!   ───────────                         ──────────────
//!   plan phase ──── plan_done(Plan) ──▶ plan blocks
//!   act phase  ──── act_done(records) ▶ action blocks, close channel
//!   wait       ◀─── reasoning_done ────
//!   response phase → text channel
//! ```
//!
//! The rendezvous signals guarantee the reasoning channel is closed before
//! the first text chunk is sent. Without reasoning there is no gating.
//!
//! Model resolution and tool merging happen before anything is spawned, so
//! configuration errors (including a `Specific` tool choice naming a
//! missing tool) surface before any model call.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use planact_config::EngineConfig;
use planact_core::error::{Error, Result};
use planact_core::event::{DomainEvent, EventBus, Phase};
use planact_core::message::{Conversation, Message};
use planact_core::plan::{ActionRecord, Plan};
use planact_core::provider::{FinishReason, Usage};
use planact_core::tool::Tool;
use planact_providers::ModelResolver;
use planact_tools::{DeclaredTool, MergedToolset, ToolChoice, ToolMerger, ToolSources};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::act::{ActPhase, ExternalToolCall};
use crate::plan::PlanPhase;
use crate::prompts;
use crate::respond::{ResponsePhase, TextChunk};
use crate::stream_event::{EventSink, TurnEvent};

/// One conversation turn to run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    /// Model id or alias; the configured default when absent
    #[serde(default)]
    pub model: Option<String>,

    pub messages: Vec<Message>,

    #[serde(default)]
    pub declared_tools: Vec<DeclaredTool>,

    #[serde(default)]
    pub tool_choice: ToolChoice,

    /// Builtin tools eligible for this turn; all of them when absent
    #[serde(default)]
    pub enabled_builtin_tools: Option<Vec<String>>,

    #[serde(default)]
    pub reasoning_requested: bool,
}

impl TurnRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_declared_tools(mut self, tools: Vec<DeclaredTool>) -> Self {
        self.declared_tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = choice;
        self
    }

    pub fn with_enabled_builtin_tools(mut self, names: Vec<String>) -> Self {
        self.enabled_builtin_tools = Some(names);
        self
    }

    pub fn with_reasoning(mut self, requested: bool) -> Self {
        self.reasoning_requested = requested;
        self
    }
}

/// Result of a non-streaming turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    pub id: String,
    /// Unix timestamp (seconds)
    pub created: i64,
    pub model: String,
    pub text: String,
    pub finish_reason: FinishReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub action_history: Vec<ActionRecord>,
    pub reasoning_blocks: Vec<String>,
    /// Declared-tool calls the caller has to fulfill
    pub tool_calls: Vec<ExternalToolCall>,
}

/// Everything a successful turn produced besides its streams.
#[derive(Debug, Clone)]
pub struct TurnSummary {
    pub plan: Plan,
    pub action_history: Vec<ActionRecord>,
    pub external_calls: Vec<ExternalToolCall>,
    pub text: String,
    pub finish_reason: FinishReason,
    pub iterations: usize,
    /// Tool calls dispatched during act, in-process and external
    pub tool_calls_made: usize,
}

/// The caller's view of a running turn.
pub struct TurnStream {
    pub turn_id: String,
    pub created: DateTime<Utc>,
    /// Canonical `provider/model` id serving the turn
    pub model: String,
    pub events: ReceiverStream<TurnEvent>,
    /// Ends immediately when reasoning was not requested.
    pub reasoning: UnboundedReceiverStream<String>,
    /// Ends with [`TextChunk::Error`] if the turn fails.
    pub text: ReceiverStream<TextChunk>,
    pub finish_reason: oneshot::Receiver<FinishReason>,
    pub usage: oneshot::Receiver<Usage>,
    pub outcome: oneshot::Receiver<Result<TurnSummary>>,
}

/// Runs turns against a resolver, a configuration, and the server's tools.
pub struct Orchestrator {
    resolver: Arc<ModelResolver>,
    config: Arc<EngineConfig>,
    event_bus: Arc<EventBus>,
    builtin_tools: Vec<Arc<dyn Tool>>,
    provisioned_tools: Vec<Arc<dyn Tool>>,
}

impl Orchestrator {
    pub fn new(resolver: Arc<ModelResolver>, config: Arc<EngineConfig>) -> Self {
        Self {
            resolver,
            config,
            event_bus: Arc::new(EventBus::default()),
            builtin_tools: Vec::new(),
            provisioned_tools: Vec::new(),
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Server-builtin tools, subject to each request's enable-list.
    pub fn with_builtin_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.builtin_tools = tools;
        self
    }

    /// Externally provisioned tools (lowest precedence).
    pub fn with_provisioned_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.provisioned_tools = tools;
        self
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Start a turn and return its channels.
    ///
    /// Must be called within a Tokio runtime. Fails without spawning
    /// anything when the request has no user message, the model cannot be
    /// resolved, or the tool choice names a tool that is not available.
    pub fn run_stream(&self, request: TurnRequest) -> Result<TurnStream> {
        let conversation = Conversation::new(request.messages);
        if conversation.last_user_message().is_none() {
            return Err(Error::config("request contains no user message"));
        }

        let resolved = self.resolver.resolve(request.model.as_deref())?;

        let mut merger = ToolMerger::new(request.tool_choice);
        if let Some(enabled) = request.enabled_builtin_tools {
            merger = merger.with_enabled_builtins(enabled);
        }
        let toolset = merger.merge(ToolSources {
            declared: request.declared_tools,
            builtin: self.builtin_tools.clone(),
            provisioned: self.provisioned_tools.clone(),
        })?;

        let turn_id = uuid::Uuid::new_v4().to_string();
        let capacity = self.config.events.channel_capacity;
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let (text_tx, text_rx) = mpsc::channel(capacity);
        let (reasoning_tx, reasoning_rx) = mpsc::unbounded_channel();
        let (finish_tx, finish_rx) = oneshot::channel();
        let (usage_tx, usage_rx) = oneshot::channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let span = info_span!("turn", turn_id = %turn_id, model = %resolved.canonical_id);

        let mut task = TurnTask {
            turn_id: turn_id.clone(),
            model: resolved.canonical_id.clone(),
            plan: PlanPhase::new(resolved.provider.clone(), &resolved.model_name, &self.config),
            act: ActPhase::new(resolved.provider.clone(), &resolved.model_name, &self.config)
                .with_event_bus(self.event_bus.clone())
                .with_turn_id(&turn_id),
            respond: ResponsePhase::new(resolved.provider, &resolved.model_name, &self.config),
            conversation,
            toolset,
            phase_timeout: self.config.phase_timeout(),
            event_bus: self.event_bus.clone(),
            events: EventSink::new(event_tx),
            plan_done: None,
            act_done: None,
            reasoning_done: None,
        };

        if request.reasoning_requested {
            let (plan_tx, plan_rx) = oneshot::channel();
            let (act_tx, act_rx) = oneshot::channel();
            let (done_tx, done_rx) = oneshot::channel();
            task.plan_done = Some(plan_tx);
            task.act_done = Some(act_tx);
            task.reasoning_done = Some(done_rx);
            tokio::spawn(narrate(plan_rx, act_rx, reasoning_tx, done_tx).instrument(span.clone()));
        } else {
            drop(reasoning_tx);
        }

        tokio::spawn(task.drive(text_tx, finish_tx, usage_tx, outcome_tx).instrument(span));

        Ok(TurnStream {
            turn_id,
            created: Utc::now(),
            model: resolved.canonical_id,
            events: ReceiverStream::new(event_rx),
            reasoning: UnboundedReceiverStream::new(reasoning_rx),
            text: ReceiverStream::new(text_rx),
            finish_reason: finish_rx,
            usage: usage_rx,
            outcome: outcome_rx,
        })
    }

    /// Run a turn to completion.
    ///
    /// Fatal errors (configuration, phase timeout, provider failure) are
    /// returned as `Err`.
    pub async fn run(&self, request: TurnRequest) -> Result<TurnResponse> {
        let TurnStream {
            turn_id,
            created,
            model,
            events,
            reasoning,
            mut text,
            finish_reason,
            usage,
            outcome,
        } = self.run_stream(request)?;
        drop(events);

        let reasoning_blocks: Vec<String> = reasoning.collect().await;
        while text.next().await.is_some() {}

        let summary = outcome
            .await
            .map_err(|_| Error::Internal("turn ended without reporting an outcome".into()))??;
        let finish_reason = finish_reason.await.unwrap_or(summary.finish_reason);

        Ok(TurnResponse {
            id: turn_id,
            created: created.timestamp(),
            model,
            text: summary.text,
            finish_reason,
            usage: usage.await.ok(),
            action_history: summary.action_history,
            reasoning_blocks,
            tool_calls: summary.external_calls,
        })
    }
}

/// Engine side of a turn, moved into its own task.
struct TurnTask {
    turn_id: String,
    model: String,
    plan: PlanPhase,
    act: ActPhase,
    respond: ResponsePhase,
    conversation: Conversation,
    toolset: MergedToolset,
    phase_timeout: Duration,
    event_bus: Arc<EventBus>,
    events: EventSink,
    plan_done: Option<oneshot::Sender<Plan>>,
    act_done: Option<oneshot::Sender<Vec<ActionRecord>>>,
    reasoning_done: Option<oneshot::Receiver<()>>,
}

impl TurnTask {
    async fn drive(
        mut self,
        text: mpsc::Sender<TextChunk>,
        finish_tx: oneshot::Sender<FinishReason>,
        usage_tx: oneshot::Sender<Usage>,
        outcome_tx: oneshot::Sender<Result<TurnSummary>>,
    ) {
        info!(
            tools = self.toolset.len(),
            reasoning = self.reasoning_done.is_some(),
            "Turn started"
        );

        let mut usage = Usage::default();
        let result = self.execute(&text, &mut usage).await;

        // On failure the reasoning channel still closes before the error chunk.
        drop(self.plan_done.take());
        drop(self.act_done.take());
        if let Some(done) = self.reasoning_done.take() {
            let _ = done.await;
        }

        let failure = match &result {
            Ok(summary) => {
                info!(
                    records = summary.action_history.len(),
                    tokens = usage.total_tokens,
                    finish_reason = %summary.finish_reason,
                    "Turn complete"
                );
                self.events.emit(TurnEvent::Done {
                    turn_id: self.turn_id.clone(),
                    finish_reason: summary.finish_reason,
                    usage,
                    iterations: summary.iterations,
                    tool_calls_made: summary.tool_calls_made,
                });
                self.event_bus.publish(DomainEvent::ResponseGenerated {
                    turn_id: self.turn_id.clone(),
                    model: self.model.clone(),
                    tokens_used: usage.total_tokens,
                    timestamp: Utc::now(),
                });
                None
            }
            Err(e) => {
                error!(error = %e, "Turn failed");
                let message = e.to_string();
                self.events.emit(TurnEvent::Error {
                    message: message.clone(),
                });
                self.event_bus.publish(DomainEvent::TurnFailed {
                    turn_id: self.turn_id.clone(),
                    error_message: message.clone(),
                    timestamp: Utc::now(),
                });
                Some(message)
            }
        };

        let finish_reason = match &result {
            Ok(summary) => summary.finish_reason,
            Err(_) => FinishReason::Error,
        };
        let _ = finish_tx.send(finish_reason);
        let _ = usage_tx.send(usage);
        let _ = outcome_tx.send(result);

        if let Some(message) = failure {
            let _ = text.send(TextChunk::Error(message)).await;
        }
    }

    async fn execute(
        &mut self,
        text: &mpsc::Sender<TextChunk>,
        usage: &mut Usage,
    ) -> Result<TurnSummary> {
        // ── Plan ──
        let started = self.begin(Phase::Plan);
        let catalog = self.toolset.catalog();
        let plan = within(
            Phase::Plan,
            self.phase_timeout,
            self.plan.run(&self.conversation, &catalog, &self.events, usage),
        )
        .await?;
        self.complete(Phase::Plan, started);
        if let Some(tx) = self.plan_done.take() {
            let _ = tx.send(plan.clone());
        }

        // ── Act ──
        let started = self.begin(Phase::Act);
        let act = within(
            Phase::Act,
            self.phase_timeout,
            self.act
                .run(&self.conversation, &plan, &self.toolset, &self.events, usage),
        )
        .await?;
        self.complete(Phase::Act, started);
        if let Some(tx) = self.act_done.take() {
            let _ = tx.send(act.history.clone());
        }

        // ── Reasoning gate ──
        if let Some(done) = self.reasoning_done.take() {
            debug!("Waiting for the reasoning channel to drain");
            let _ = done.await;
        }

        // ── Response ──
        let started = self.begin(Phase::Response);
        let response = within(
            Phase::Response,
            self.phase_timeout,
            self.respond.run(
                &self.conversation,
                &plan,
                &act.history,
                &self.events,
                text,
                usage,
            ),
        )
        .await?;
        self.complete(Phase::Response, started);

        Ok(TurnSummary {
            plan,
            action_history: act.history,
            external_calls: act.external_calls,
            text: response.text,
            finish_reason: response.finish_reason,
            iterations: act.iterations,
            tool_calls_made: act.tool_calls_made,
        })
    }

    fn begin(&self, phase: Phase) -> Instant {
        debug!(%phase, "Phase started");
        self.events.emit(TurnEvent::PhaseStarted { phase });
        Instant::now()
    }

    fn complete(&self, phase: Phase, started: Instant) {
        let duration_ms = started.elapsed().as_millis() as u64;
        debug!(%phase, duration_ms, "Phase completed");
        self.events
            .emit(TurnEvent::PhaseCompleted { phase, duration_ms });
        self.event_bus.publish(DomainEvent::PhaseCompleted {
            turn_id: self.turn_id.clone(),
            phase,
            duration_ms,
            timestamp: Utc::now(),
        });
    }
}

/// Bound a phase by its wall-clock ceiling.
async fn within<T>(
    phase: Phase,
    limit: Duration,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, work).await {
        Ok(result) => result,
        Err(_) => {
            warn!(%phase, timeout_secs = limit.as_secs(), "Phase timed out");
            Err(Error::PhaseTimeout {
                phase,
                timeout_secs: limit.as_secs(),
            })
        }
    }
}

/// Reasoning side of a turn: emits blocks as each handoff arrives, then
/// closes the channel and releases the engine.
async fn narrate(
    plan_done: oneshot::Receiver<Plan>,
    act_done: oneshot::Receiver<Vec<ActionRecord>>,
    blocks: mpsc::UnboundedSender<String>,
    reasoning_done: oneshot::Sender<()>,
) {
    let count = narrate_blocks(plan_done, act_done, &blocks).await;
    debug!(blocks = count, "Reasoning channel complete");
    drop(blocks);
    let _ = reasoning_done.send(());
}

async fn narrate_blocks(
    plan_done: oneshot::Receiver<Plan>,
    act_done: oneshot::Receiver<Vec<ActionRecord>>,
    blocks: &mpsc::UnboundedSender<String>,
) -> usize {
    // A dropped handoff means the engine failed.
    let Ok(plan) = plan_done.await else {
        return 0;
    };
    for (i, step) in plan.steps.iter().enumerate() {
        let _ = blocks.send(prompts::narrate_step(i, step));
    }

    let Ok(history) = act_done.await else {
        return plan.len();
    };
    for (i, record) in history.iter().enumerate() {
        let _ = blocks.send(prompts::narrate_action(i, record));
    }
    plan.len() + history.len()
}
