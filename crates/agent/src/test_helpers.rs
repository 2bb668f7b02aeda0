//! Shared test helpers for phase tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use planact_core::error::ProviderError;
use planact_core::message::{Message, MessageToolCall};
use planact_core::provider::{
    ChunkReceiver, FinishReason, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage,
};
use tokio::sync::mpsc;

/// Usage reported by every scripted call.
pub const CALL_USAGE: Usage = Usage {
    prompt_tokens: 10,
    completion_tokens: 5,
    total_tokens: 15,
};

/// What one scripted model call does.
#[derive(Debug, Clone)]
pub enum Script {
    /// Replay these chunks, then end the stream.
    Chunks(Vec<StreamChunk>),
    /// Refuse the call.
    Fail(ProviderError),
    /// Replay these chunks, then fail mid-stream.
    Interrupted(Vec<StreamChunk>),
    /// Never answer.
    Hang,
}

impl Script {
    /// Text streamed in small pieces, followed by a final usage chunk.
    pub fn text(text: &str) -> Self {
        let chars: Vec<char> = text.chars().collect();
        let mut chunks: Vec<StreamChunk> = chars
            .chunks(8)
            .map(|piece| StreamChunk::text(piece.iter().collect::<String>()))
            .collect();
        chunks.push(final_chunk(FinishReason::Stop));
        Self::Chunks(chunks)
    }

    /// A JSON document streamed as text.
    pub fn json(value: serde_json::Value) -> Self {
        Self::text(&value.to_string())
    }

    /// A single tool call.
    pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> Self {
        Self::Chunks(vec![
            tool_call_chunk(id, name, &arguments.to_string()),
            final_chunk(FinishReason::ToolCalls),
        ])
    }
}

pub fn tool_call_chunk(id: &str, name: &str, arguments: &str) -> StreamChunk {
    StreamChunk {
        tool_calls: vec![MessageToolCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }],
        ..StreamChunk::default()
    }
}

fn final_chunk(finish_reason: FinishReason) -> StreamChunk {
    StreamChunk {
        done: true,
        usage: Some(CALL_USAGE),
        finish_reason: Some(finish_reason),
        ..StreamChunk::default()
    }
}

/// A provider that plays back one script per call and records every
/// request it receives.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next_script(&self, request: ProviderRequest) -> Option<Script> {
        self.requests.lock().unwrap().push(request);
        self.scripts.lock().unwrap().pop_front()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        let mut rx = self.stream(request).await?;
        let mut message = Message::assistant("");
        let mut usage = None;
        let mut finish_reason = None;
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            message.content.push_str(chunk.content.as_deref().unwrap_or(""));
            message.tool_calls.extend(chunk.tool_calls);
            usage = chunk.usage.or(usage);
            finish_reason = chunk.finish_reason.or(finish_reason);
        }
        Ok(ProviderResponse {
            message,
            usage,
            model,
            finish_reason,
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let script = self.next_script(request).ok_or_else(|| {
            ProviderError::NotConfigured("scripted provider has no more responses".into())
        })?;

        let (chunks, trailing_error) = match script {
            Script::Chunks(chunks) => (chunks, None),
            Script::Interrupted(chunks) => (
                chunks,
                Some(ProviderError::StreamInterrupted("connection reset".into())),
            ),
            Script::Fail(e) => return Err(e),
            Script::Hang => return std::future::pending().await,
        };

        let (tx, rx) = mpsc::channel(chunks.len() + 1);
        for chunk in chunks {
            let _ = tx.try_send(Ok(chunk));
        }
        if let Some(e) = trailing_error {
            let _ = tx.try_send(Err(e));
        }
        Ok(rx)
    }
}
