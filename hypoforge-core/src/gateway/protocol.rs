//! OpenAI chat-completions wire types and event rendering.

use crate::orchestrator::RunEvent;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A message in an incoming chat request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

/// Generation parameters carried in the request's `metadata`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMetadata {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub num_hypotheses: Option<usize>,
}

/// `POST /v1/chat/completions` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default = "default_model")]
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default)]
    pub metadata: Option<RequestMetadata>,
}

fn default_model() -> String {
    "hypothesis-generator".to_string()
}

fn default_stream() -> bool {
    true
}

impl ChatCompletionRequest {
    /// The first user message, which carries the research idea.
    pub fn research_idea(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .filter(|c| !c.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Value,
    pub finish_reason: Option<String>,
}

/// One `chat.completion.chunk` SSE payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

/// Builds the chunks of one streamed response, sharing id and model.
#[derive(Debug, Clone)]
pub struct ChunkBuilder {
    id: String,
    model: String,
}

impl ChunkBuilder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: completion_id(),
            model: model.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(str::to_string),
            }],
        }
    }

    /// Opening chunk announcing the assistant role.
    pub fn role(&self) -> ChatCompletionChunk {
        self.chunk(json!({"role": "assistant", "content": ""}), None)
    }

    pub fn content(&self, text: impl Into<String>) -> ChatCompletionChunk {
        self.chunk(json!({"content": text.into()}), None)
    }

    /// Terminal chunk: empty delta, `finish_reason: "stop"`.
    pub fn stop(&self) -> ChatCompletionChunk {
        self.chunk(json!({}), Some("stop"))
    }
}

fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

/// Non-streaming `chat.completion` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Value>,
    pub usage: Value,
}

impl ChatCompletion {
    pub fn new(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: completion_id(),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: model.into(),
            choices: vec![json!({
                "index": 0,
                "message": {"role": "assistant", "content": content.into()},
                "finish_reason": "stop",
            })],
            usage: json!({"prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0}),
        }
    }
}

/// OpenAI-style error body.
pub fn error_body(message: impl Into<String>, kind: &str) -> Value {
    json!({
        "error": {
            "message": message.into(),
            "type": kind,
            "code": Value::Null,
        }
    })
}

/// Chat text for an event, or `None` for events not shown inline.
pub fn render_event(event: &RunEvent) -> Option<String> {
    match event {
        RunEvent::Text { data } => Some(data.clone()),
        RunEvent::ToolCall { data, .. } => Some(format!("\n[{data}]\n")),
        RunEvent::HypothesisFound {
            progress, summary, ..
        } => Some(format!("\n[HYPOTHESIS {progress} EXTRACTED] {summary}\n")),
        RunEvent::ExtractionComplete { message, .. } => {
            Some(format!("\n[EXTRACTION COMPLETE] {message}\n"))
        }
        RunEvent::ToolOutput { .. } | RunEvent::Message { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::ToolOutputRecord;

    #[test]
    fn test_request_defaults() {
        let req: ChatCompletionRequest =
            serde_json::from_str(r#"{"messages":[{"role":"user","content":"idea"}]}"#).unwrap();
        assert_eq!(req.model, "hypothesis-generator");
        assert!(req.stream);
        assert!(req.metadata.is_none());
        assert_eq!(req.research_idea(), Some("idea"));
    }

    #[test]
    fn test_research_idea_takes_first_user_message() {
        let req: ChatCompletionRequest = serde_json::from_str(
            r#"{"messages":[
                {"role":"system","content":"be brief"},
                {"role":"user","content":"first"},
                {"role":"user","content":"second"}
            ],"metadata":{"domain":"Robotics"}}"#,
        )
        .unwrap();
        assert_eq!(req.research_idea(), Some("first"));
        let meta = req.metadata.unwrap();
        assert_eq!(meta.domain.as_deref(), Some("Robotics"));
        assert_eq!(meta.num_hypotheses, None);
    }

    #[test]
    fn test_no_user_message() {
        let req: ChatCompletionRequest =
            serde_json::from_str(r#"{"messages":[{"role":"system","content":"x"}]}"#).unwrap();
        assert_eq!(req.research_idea(), None);
    }

    #[test]
    fn test_chunk_shapes() {
        let builder = ChunkBuilder::new("hypothesis-generator");
        let role = serde_json::to_value(builder.role()).unwrap();
        assert_eq!(role["object"], "chat.completion.chunk");
        assert_eq!(role["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(role["choices"][0]["finish_reason"], Value::Null);

        let stop = serde_json::to_value(builder.stop()).unwrap();
        assert_eq!(stop["choices"][0]["delta"], json!({}));
        assert_eq!(stop["choices"][0]["finish_reason"], "stop");
        assert_eq!(stop["id"], role["id"]);
        assert!(builder.id().starts_with("chatcmpl-"));
    }

    #[test]
    fn test_render_events() {
        assert_eq!(
            render_event(&RunEvent::Text { data: "abc".into() }).as_deref(),
            Some("abc")
        );
        assert_eq!(
            render_event(&RunEvent::ExtractionComplete {
                total_hypotheses: 2,
                expected: Some(3),
                tool_interactions: Vec::new(),
                message: "Successfully extracted 2 hypotheses (expected 3) | Tool calls: 0".into(),
            })
            .as_deref(),
            Some("\n[EXTRACTION COMPLETE] Successfully extracted 2 hypotheses (expected 3) | Tool calls: 0\n")
        );
        assert_eq!(
            render_event(&RunEvent::ToolOutput {
                data: "raw".into(),
                tool_interaction: ToolOutputRecord::now("raw"),
            }),
            None
        );
    }

    #[test]
    fn test_chat_completion_shape() {
        let completion = serde_json::to_value(ChatCompletion::new("m", "answer")).unwrap();
        assert_eq!(completion["object"], "chat.completion");
        assert_eq!(completion["choices"][0]["message"]["content"], "answer");
        assert_eq!(completion["usage"]["total_tokens"], 0);
    }

    #[test]
    fn test_error_body() {
        let body = error_body("No user message found", "invalid_request_error");
        assert_eq!(body["error"]["message"], "No user message found");
    }
}
