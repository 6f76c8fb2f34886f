//! Brain module: LLM provider abstraction.
//!
//! Defines the `LlmProvider` trait for model-agnostic completions and a
//! scriptable `MockLlmProvider` used by tests and offline runs.

use crate::error::LlmError;
use crate::types::{
    CompletionRequest, CompletionResponse, Content, Message, Role, StreamEvent, TokenUsage,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Trait for LLM providers, supporting both full and streaming completions.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Perform a streaming completion, sending events to the channel.
    ///
    /// Implementations stop early (returning `Ok`) once the receiver is dropped.
    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;

    /// Return the provider name, used in logs and persisted sessions.
    fn provider_name(&self) -> &str {
        "openai"
    }
}

enum MockTurn {
    Respond(CompletionResponse),
    Fail(String),
}

/// A mock LLM provider that replays queued turns.
///
/// Streaming splits text into small chunks so consumers see fenced blocks
/// arrive across several deltas, and emits tool calls as start/delta/end
/// event triples.
pub struct MockLlmProvider {
    model: String,
    chunk_chars: usize,
    turns: Mutex<VecDeque<MockTurn>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            chunk_chars: 7,
            turns: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a MockLlmProvider that answers once with the given text.
    pub fn with_response(text: &str) -> Self {
        let provider = Self::new();
        provider.queue_response(Self::text_response(text));
        provider
    }

    /// Set how many characters each streamed token carries.
    pub fn with_chunk_chars(mut self, chunk_chars: usize) -> Self {
        self.chunk_chars = chunk_chars.max(1);
        self
    }

    /// Queue a response to be returned by the next call.
    pub fn queue_response(&self, response: CompletionResponse) {
        if let Ok(mut turns) = self.turns.lock() {
            turns.push_back(MockTurn::Respond(response));
        }
    }

    /// Queue a failure: the next streaming call emits an error event and fails.
    pub fn queue_failure(&self, message: impl Into<String>) {
        if let Ok(mut turns) = self.turns.lock() {
            turns.push_back(MockTurn::Fail(message.into()));
        }
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    /// Create a tool call response for testing.
    pub fn tool_call_response(tool_name: &str, arguments: serde_json::Value) -> CompletionResponse {
        let call_id = format!("call_{}", uuid::Uuid::new_v4());
        CompletionResponse {
            message: Message::new(
                Role::Assistant,
                Content::tool_call(&call_id, tool_name, arguments),
            ),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 30,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("tool_calls".to_string()),
        }
    }

    /// Create a multipart response (text followed by tool calls) for testing.
    pub fn multipart_response(
        text: &str,
        calls: Vec<(&str, serde_json::Value)>,
    ) -> CompletionResponse {
        let mut parts = vec![Content::text(text)];
        for (name, arguments) in calls {
            let call_id = format!("call_{}", uuid::Uuid::new_v4());
            parts.push(Content::tool_call(call_id, name, arguments));
        }
        CompletionResponse {
            message: Message::new(Role::Assistant, Content::MultiPart { parts }),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("tool_calls".to_string()),
        }
    }

    fn next_turn(&self, request: CompletionRequest) -> MockTurn {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        self.turns
            .lock()
            .ok()
            .and_then(|mut t| t.pop_front())
            .unwrap_or_else(|| {
                MockTurn::Respond(Self::text_response(
                    "I'm a mock LLM. No queued responses available.",
                ))
            })
    }

    fn stream_events(&self, content: &Content, out: &mut Vec<StreamEvent>) {
        match content {
            Content::Text { text } => {
                let chars: Vec<char> = text.chars().collect();
                for chunk in chars.chunks(self.chunk_chars) {
                    out.push(StreamEvent::Token(chunk.iter().collect()));
                }
            }
            Content::ToolCall {
                id,
                name,
                arguments,
            } => {
                out.push(StreamEvent::ToolCallStart {
                    id: id.clone(),
                    name: name.clone(),
                });
                out.push(StreamEvent::ToolCallDelta {
                    id: id.clone(),
                    arguments_delta: arguments.to_string(),
                });
                out.push(StreamEvent::ToolCallEnd { id: id.clone() });
            }
            Content::MultiPart { parts } => {
                for part in parts {
                    self.stream_events(part, out);
                }
            }
            Content::ToolResult { .. } => {}
        }
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        match self.next_turn(request) {
            MockTurn::Respond(response) => Ok(response),
            MockTurn::Fail(message) => Err(LlmError::ApiRequest { message }),
        }
    }

    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        let response = match self.next_turn(request) {
            MockTurn::Respond(response) => response,
            MockTurn::Fail(message) => {
                let _ = tx.send(StreamEvent::Error(message.clone())).await;
                return Err(LlmError::Streaming { message });
            }
        };

        let mut events = Vec::new();
        self.stream_events(&response.message.content, &mut events);
        events.push(StreamEvent::Done {
            usage: response.usage,
        });
        for event in events {
            if tx.send(event).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}
