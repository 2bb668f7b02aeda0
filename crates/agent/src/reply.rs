//! Accumulating a streamed model reply.
//!
//! Every phase makes streaming calls and needs the same bookkeeping: text
//! deltas forwarded as they arrive, tool-call fragments stitched together,
//! the last usage and finish reason kept.

use planact_core::error::Result;
use planact_core::message::MessageToolCall;
use planact_core::provider::{ChunkReceiver, FinishReason, Provider, ProviderRequest, Usage};

/// Everything a finished streaming call produced.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub content: String,
    pub tool_calls: Vec<MessageToolCall>,
    pub usage: Option<Usage>,
    pub finish_reason: Option<FinishReason>,
}

/// An in-flight streaming call.
pub struct ReplyStream {
    rx: ChunkReceiver,
    reply: Reply,
}

impl ReplyStream {
    pub async fn open(provider: &dyn Provider, request: ProviderRequest) -> Result<Self> {
        let rx = provider.stream(request).await?;
        Ok(Self {
            rx,
            reply: Reply::default(),
        })
    }

    /// The next non-empty text delta, or `None` once the stream has ended.
    pub async fn next_delta(&mut self) -> Result<Option<String>> {
        while let Some(chunk) = self.rx.recv().await {
            let chunk = chunk?;

            for tc in chunk.tool_calls {
                self.merge_tool_call(tc);
            }
            if chunk.usage.is_some() {
                self.reply.usage = chunk.usage;
            }
            if chunk.finish_reason.is_some() {
                self.reply.finish_reason = chunk.finish_reason;
            }

            if let Some(text) = chunk.content
                && !text.is_empty()
            {
                self.reply.content.push_str(&text);
                return Ok(Some(text));
            }
        }
        Ok(None)
    }

    /// Text accumulated so far.
    pub fn content(&self) -> &str {
        &self.reply.content
    }

    /// Drain whatever is left and return the complete reply.
    pub async fn finish(mut self) -> Result<Reply> {
        while self.next_delta().await?.is_some() {}
        Ok(self.reply)
    }

    // Fragments with the same id are one call; an id-less fragment
    // continues the previous call.
    fn merge_tool_call(&mut self, tc: MessageToolCall) {
        let calls = &mut self.reply.tool_calls;
        let existing = if tc.id.is_empty() {
            calls.last_mut()
        } else {
            calls.iter_mut().find(|t| t.id == tc.id)
        };
        match existing {
            Some(existing) => {
                if existing.name.is_empty() {
                    existing.name = tc.name;
                }
                existing.arguments.push_str(&tc.arguments);
            }
            None => calls.push(tc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{Script, ScriptedProvider, tool_call_chunk};
    use planact_core::error::{Error, ProviderError};
    use planact_core::provider::StreamChunk;

    #[tokio::test]
    async fn deltas_and_fragments_accumulate() {
        let provider = ScriptedProvider::new(vec![Script::Chunks(vec![
            StreamChunk::text("Hel"),
            StreamChunk::text(""),
            StreamChunk::text("lo"),
            tool_call_chunk("call_1", "lookup", r#"{"order"#),
            tool_call_chunk("", "", r#"_id": "A"}"#),
            StreamChunk {
                done: true,
                usage: Some(Usage {
                    prompt_tokens: 3,
                    completion_tokens: 4,
                    total_tokens: 7,
                }),
                finish_reason: Some(FinishReason::ToolCalls),
                ..StreamChunk::default()
            },
        ])]);

        let request = ProviderRequest::streaming("m", vec![], 0.0);
        let mut stream = ReplyStream::open(&provider, request).await.unwrap();
        assert_eq!(stream.next_delta().await.unwrap().as_deref(), Some("Hel"));
        assert_eq!(stream.next_delta().await.unwrap().as_deref(), Some("lo"));
        assert_eq!(stream.content(), "Hello");

        let reply = stream.finish().await.unwrap();
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].arguments, r#"{"order_id": "A"}"#);
        assert_eq!(reply.usage.unwrap().total_tokens, 7);
        assert_eq!(reply.finish_reason, Some(FinishReason::ToolCalls));
    }

    #[tokio::test]
    async fn provider_failure_propagates() {
        let provider = ScriptedProvider::new(vec![Script::Fail(ProviderError::RateLimited {
            retry_after_secs: 30,
        })]);
        let request = ProviderRequest::streaming("m", vec![], 0.0);
        let err = match ReplyStream::open(&provider, request).await {
            Ok(_) => panic!("expected a provider error"),
            Err(e) => e,
        };
        assert!(matches!(err, Error::Provider(ProviderError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn mid_stream_failure_propagates() {
        let provider = ScriptedProvider::new(vec![Script::Interrupted(vec![StreamChunk::text(
            "partial",
        )])]);
        let request = ProviderRequest::streaming("m", vec![], 0.0);
        let stream = ReplyStream::open(&provider, request).await.unwrap();
        let err = stream.finish().await.unwrap_err();
        assert!(err.to_string().contains("Stream interrupted"));
    }
}
