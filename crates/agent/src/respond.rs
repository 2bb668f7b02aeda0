//! Response phase: the single call that writes the user-facing answer.

use std::sync::Arc;

use planact_config::EngineConfig;
use planact_core::error::Result;
use planact_core::message::{Conversation, Message};
use planact_core::plan::{ActionRecord, Plan};
use planact_core::provider::{FinishReason, Provider, ProviderRequest, Usage};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::prompts;
use crate::reply::ReplyStream;
use crate::stream_event::{EventSink, TurnEvent};

/// An item on the text channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextChunk {
    /// Final-answer content.
    Delta(String),
    /// The turn failed; always the last item.
    Error(String),
}

#[derive(Debug, Clone)]
pub struct ResponseOutcome {
    pub text: String,
    pub finish_reason: FinishReason,
}

pub struct ResponsePhase {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ResponsePhase {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, config: &EngineConfig) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: config.response.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Stream the answer onto `text`. No tools are attached.
    pub async fn run(
        &self,
        conversation: &Conversation,
        plan: &Plan,
        history: &[ActionRecord],
        events: &EventSink,
        text: &mpsc::Sender<TextChunk>,
        usage: &mut Usage,
    ) -> Result<ResponseOutcome> {
        let user_message = conversation
            .last_user_message()
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let messages = vec![
            Message::system(prompts::response_system(
                conversation.system_instructions().as_deref(),
            )),
            Message::user(prompts::response_user(user_message, plan, history)),
        ];
        let mut request = ProviderRequest::streaming(&self.model, messages, self.temperature);
        request.max_tokens = Some(self.max_tokens);

        let mut stream = ReplyStream::open(self.provider.as_ref(), request).await?;
        while let Some(delta) = stream.next_delta().await? {
            events.emit(TurnEvent::ResponseDelta {
                content: delta.clone(),
            });
            if text.send(TextChunk::Delta(delta)).await.is_err() {
                debug!("Text channel closed, finishing the response without a reader");
            }
        }

        let reply = stream.finish().await?;
        if let Some(call_usage) = &reply.usage {
            usage.accumulate(call_usage);
        }

        let finish_reason = reply.finish_reason.unwrap_or_default();
        info!(chars = reply.content.len(), %finish_reason, "Response generated");
        Ok(ResponseOutcome {
            text: reply.content,
            finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{Script, ScriptedProvider};
    use planact_core::plan::PlanStep;
    use planact_core::provider::StreamChunk;

    fn phase(provider: Arc<ScriptedProvider>) -> ResponsePhase {
        ResponsePhase::new(provider, "gpt-4o-mini", &EngineConfig::default())
    }

    #[tokio::test]
    async fn answer_streams_onto_text_channel() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::text("2 + 2 equals 4.")]));
        let (tx, mut rx) = mpsc::channel(64);
        let mut usage = Usage::default();

        let conversation = Conversation::new(vec![
            Message::user("Hi"),
            Message::assistant("Hello!"),
            Message::user("What is 2+2?"),
        ]);
        let plan = Plan {
            steps: vec![PlanStep::new("Compute", "Add 2 and 2", "")],
        };
        let history = vec![ActionRecord::new("Added 2 and 2", "The sum is 4")];

        let outcome = phase(provider.clone())
            .run(&conversation, &plan, &history, &EventSink::disabled(), &tx, &mut usage)
            .await
            .unwrap();
        drop(tx);

        let mut streamed = String::new();
        while let Some(chunk) = rx.recv().await {
            match chunk {
                TextChunk::Delta(d) => streamed.push_str(&d),
                TextChunk::Error(e) => panic!("unexpected error {e}"),
            }
        }
        assert_eq!(streamed, "2 + 2 equals 4.");
        assert_eq!(outcome.text, streamed);
        assert_eq!(outcome.finish_reason, FinishReason::Stop);
        assert_eq!(usage.total_tokens, 15);

        let request = &provider.requests()[0];
        assert!(request.tools.is_empty());
        assert!(request.response_format.is_none());
        assert_eq!(request.messages.len(), 2);
        let prompt = &request.messages[1].content;
        assert!(prompt.contains("User request: What is 2+2?"));
        assert!(prompt.contains("The sum is 4"));
        assert!(prompt.contains("Compute"));
    }

    #[tokio::test]
    async fn finish_reason_comes_from_the_stream() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Chunks(vec![
            StreamChunk::text("It was a dark and"),
            StreamChunk {
                finish_reason: Some(FinishReason::Length),
                done: true,
                ..StreamChunk::default()
            },
        ])]));
        let (tx, _rx) = mpsc::channel(64);
        let conversation = Conversation::new(vec![Message::user("Tell me a story")]);

        let outcome = phase(provider)
            .run(&conversation, &Plan::empty(), &[], &EventSink::disabled(), &tx, &mut Usage::default())
            .await
            .unwrap();
        assert_eq!(outcome.finish_reason, FinishReason::Length);
    }

    #[tokio::test]
    async fn closed_text_channel_does_not_fail() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::text("unread answer")]));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let conversation = Conversation::new(vec![Message::user("Hi")]);

        let outcome = phase(provider)
            .run(&conversation, &Plan::empty(), &[], &EventSink::disabled(), &tx, &mut Usage::default())
            .await
            .unwrap();
        assert_eq!(outcome.text, "unread answer");
    }
}
