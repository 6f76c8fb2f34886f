//! Chat-completions client for OpenAI-style endpoints.
//!
//! Supports OpenAI, OpenRouter, and any endpoint that follows the OpenAI
//! chat completions API format. Streaming responses are decoded incrementally
//! from the response body so tokens reach the agent as soon as they arrive.

use crate::brain::LlmProvider;
use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::types::{
    CompletionRequest, CompletionResponse, Content, Message, Role, StreamEvent, TokenUsage,
    ToolDefinition,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Speaks the `/chat/completions` protocol used by OpenAI and OpenRouter.
pub struct OpenAiCompatibleProvider {
    client: Client,
    provider: String,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: Option<usize>,
}

impl OpenAiCompatibleProvider {
    /// Reads the API key from the provider's environment variable. Local
    /// endpoints (localhost) work without a key.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = config.resolved_base_url();
        let is_local = base_url.contains("localhost") || base_url.contains("127.0.0.1");
        let key_env = config.resolved_api_key_env();

        let api_key = std::env::var(key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                if is_local {
                    debug!("No API key set for local provider; using dummy bearer token");
                    Some("local".to_string())
                } else {
                    None
                }
            })
            .ok_or_else(|| LlmError::AuthFailed {
                provider: format!("{}: env var '{}' not set", config.provider, key_env),
            })?;
        Ok(Self::new_with_key(config, api_key))
    }

    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Self {
        Self {
            client: Client::new(),
            provider: config.provider.clone(),
            base_url: config.resolved_base_url(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }

    /// Consecutive tool results stay as separate `tool` messages; a multipart
    /// assistant turn becomes one message carrying text plus `tool_calls`.
    fn messages_to_json(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| match &msg.content {
                Content::Text { text } => json!({
                    "role": msg.role.to_string(),
                    "content": text,
                }),
                Content::ToolCall {
                    id,
                    name,
                    arguments,
                } => json!({
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [tool_call_json(id, name, arguments)],
                }),
                Content::ToolResult {
                    call_id, output, ..
                } => json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "content": output,
                }),
                Content::MultiPart { parts } => {
                    let mut text_parts = Vec::new();
                    let mut tool_calls = Vec::new();
                    for part in parts {
                        match part {
                            Content::Text { text } => text_parts.push(text.as_str()),
                            Content::ToolCall {
                                id,
                                name,
                                arguments,
                            } => tool_calls.push(tool_call_json(id, name, arguments)),
                            _ => {}
                        }
                    }
                    if tool_calls.is_empty() {
                        json!({
                            "role": msg.role.to_string(),
                            "content": text_parts.join(""),
                        })
                    } else {
                        let content = if text_parts.is_empty() {
                            Value::Null
                        } else {
                            Value::String(text_parts.join(""))
                        };
                        json!({
                            "role": "assistant",
                            "content": content,
                            "tool_calls": tool_calls,
                        })
                    }
                }
            })
            .collect()
    }

    fn tools_to_json(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect()
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": Self::messages_to_json(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        if let Some(max_tokens) = request.max_tokens.or(self.max_tokens) {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(tools) = &request.tools
            && !tools.is_empty()
        {
            body["tools"] = json!(Self::tools_to_json(tools));
        }
        body
    }

    fn parse_response(body: &Value, model: &str) -> Result<CompletionResponse, LlmError> {
        let choice =
            body.get("choices")
                .and_then(|c| c.get(0))
                .ok_or_else(|| LlmError::ResponseParse {
                    message: "No choices in response".to_string(),
                })?;

        let message = choice
            .get("message")
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No message in choice".to_string(),
            })?;

        let finish_reason = choice
            .get("finish_reason")
            .and_then(|f| f.as_str())
            .map(|s| s.to_string());

        let text = message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or("");

        let calls: Vec<Content> = message
            .get("tool_calls")
            .and_then(|t| t.as_array())
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|tc| {
                        let id = tc.get("id")?.as_str()?.to_string();
                        let func = tc.get("function")?;
                        let name = func.get("name")?.as_str()?.to_string();
                        let args_str = func.get("arguments")?.as_str()?;
                        let arguments = serde_json::from_str(args_str)
                            .unwrap_or_else(|_| json!({ "raw_arguments": args_str }));
                        Some(Content::tool_call(id, name, arguments))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let content = if calls.is_empty() {
            Content::text(text)
        } else {
            let mut parts = Vec::with_capacity(calls.len() + 1);
            if !text.is_empty() {
                parts.push(Content::text(text));
            }
            parts.extend(calls);
            Content::MultiPart { parts }
        };

        Ok(CompletionResponse {
            message: Message::new(Role::Assistant, content),
            usage: parse_usage(body.get("usage")),
            model: body
                .get("model")
                .and_then(|m| m.as_str())
                .unwrap_or(model)
                .to_string(),
            finish_reason,
        })
    }

    /// 401/403 are auth failures, 429 is rate limiting, everything else is a request error.
    fn map_http_error(&self, status: reqwest::StatusCode, body: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => {
                debug!(body = %body, status = status.as_u16(), "Authentication failed");
                LlmError::AuthFailed {
                    provider: self.provider.clone(),
                }
            }
            429 => {
                // "Rate limit reached ... Please try again in 20s."
                let retry_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?
                            .get("message")?
                            .as_str()
                            .map(|s| s.to_string())
                    })
                    .and_then(|msg| {
                        msg.split("in ").last().and_then(|s| {
                            s.trim_end_matches('.')
                                .trim_end_matches('s')
                                .parse::<u64>()
                                .ok()
                        })
                    })
                    .unwrap_or(5);
                LlmError::RateLimited {
                    retry_after_secs: retry_secs,
                }
            }
            status if status >= 500 => LlmError::ApiRequest {
                message: format!("Server error ({}): {}", status, body),
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {}: {}", status, body),
            },
        }
    }
}

fn tool_call_json(id: &str, name: &str, arguments: &Value) -> Value {
    json!({
        "id": id,
        "type": "function",
        "function": {
            "name": name,
            "arguments": arguments.to_string(),
        }
    })
}

fn parse_usage(usage: Option<&Value>) -> TokenUsage {
    let field = |name: &str| {
        usage
            .and_then(|u| u.get(name))
            .and_then(|t| t.as_u64())
            .unwrap_or(0) as usize
    };
    TokenUsage {
        input_tokens: field("prompt_tokens"),
        output_tokens: field("completion_tokens"),
    }
}

/// Decoder state for one streamed chat completion.
///
/// Tool calls arrive keyed by `index`; only the first fragment carries the
/// id and function name.
#[derive(Debug, Default)]
struct StreamDecoder {
    active_tool_calls: BTreeMap<usize, String>,
    usage: TokenUsage,
}

impl StreamDecoder {
    /// Translate one `data:` payload into stream events.
    fn handle_chunk(&mut self, data: &Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if let Some(u) = data.get("usage").filter(|u| !u.is_null()) {
            self.usage = parse_usage(Some(u));
        }

        let Some(choice) = data.get("choices").and_then(|c| c.get(0)) else {
            return events;
        };

        if let Some(delta) = choice.get("delta") {
            if let Some(content) = delta.get("content").and_then(|c| c.as_str())
                && !content.is_empty()
            {
                events.push(StreamEvent::Token(content.to_string()));
            }

            for tc in delta
                .get("tool_calls")
                .and_then(|t| t.as_array())
                .into_iter()
                .flatten()
            {
                let index = tc.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
                let Some(func) = tc.get("function") else {
                    continue;
                };
                if let Some(name) = func.get("name").and_then(|n| n.as_str())
                    && !self.active_tool_calls.contains_key(&index)
                {
                    let id = tc
                        .get("id")
                        .and_then(|i| i.as_str())
                        .filter(|i| !i.is_empty())
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("call_{index}"));
                    self.active_tool_calls.insert(index, id.clone());
                    events.push(StreamEvent::ToolCallStart {
                        id,
                        name: name.to_string(),
                    });
                }
                if let Some(args) = func.get("arguments").and_then(|a| a.as_str())
                    && !args.is_empty()
                {
                    match self.active_tool_calls.get(&index) {
                        Some(id) => events.push(StreamEvent::ToolCallDelta {
                            id: id.clone(),
                            arguments_delta: args.to_string(),
                        }),
                        None => warn!(index, "Arguments fragment for unknown tool call"),
                    }
                }
            }
        }

        if choice
            .get("finish_reason")
            .and_then(|f| f.as_str())
            .is_some()
        {
            events.extend(self.close_tool_calls());
        }

        events
    }

    /// End every still-open tool call, in index order.
    fn close_tool_calls(&mut self) -> Vec<StreamEvent> {
        std::mem::take(&mut self.active_tool_calls)
            .into_values()
            .map(|id| StreamEvent::ToolCallEnd { id })
            .collect()
    }
}

/// Pop the next complete line from a byte buffer, if any.
fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let pos = buffer.iter().position(|&b| b == b'\n')?;
    let line: Vec<u8> = buffer.drain(..=pos).collect();
    Some(String::from_utf8_lossy(&line).trim().to_string())
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request, false);

        debug!(url = %url, model = %self.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Connection {
                message: format!("Request failed: {}", e),
            })?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| LlmError::ApiRequest {
            message: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(self.map_http_error(status, &response_body));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON: {}", e),
            })?;

        Self::parse_response(&json, &self.model)
    }

    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request, true);

        debug!(url = %url, model = %self.model, "Sending streaming completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Connection {
                message: format!("Request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(self.map_http_error(status, &body_text));
        }

        let mut byte_stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut decoder = StreamDecoder::default();

        'read: while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Streaming {
                message: format!("Failed to read streaming chunk: {}", e),
            })?;
            buffer.extend_from_slice(&chunk);

            while let Some(line) = take_line(&mut buffer) {
                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                    continue;
                };
                if data == "[DONE]" {
                    break 'read;
                }
                let json: Value = match serde_json::from_str(data) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "Skipping unparseable stream chunk");
                        continue;
                    }
                };
                if let Some(err) = json.get("error") {
                    let message = err
                        .get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("unknown provider error")
                        .to_string();
                    let _ = tx.send(StreamEvent::Error(message.clone())).await;
                    return Err(LlmError::Streaming { message });
                }
                for event in decoder.handle_chunk(&json) {
                    if tx.send(event).await.is_err() {
                        debug!("Stream receiver dropped; abandoning response");
                        return Ok(());
                    }
                }
            }
        }

        for event in decoder.close_tool_calls() {
            let _ = tx.send(event).await;
        }
        let _ = tx
            .send(StreamEvent::Done {
                usage: decoder.usage,
            })
            .await;
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new_with_key(&LlmConfig::default(), "sk-test".into())
    }

    #[test]
    fn test_messages_to_json_text() {
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("Hello"),
            Message::assistant("Hi there"),
        ];
        let json = OpenAiCompatibleProvider::messages_to_json(&messages);
        assert_eq!(json.len(), 3);
        assert_eq!(json[0]["role"], "system");
        assert_eq!(json[0]["content"], "You are helpful");
        assert_eq!(json[1]["role"], "user");
        assert_eq!(json[2]["role"], "assistant");
    }

    #[test]
    fn test_messages_to_json_multipart_tool_calls() {
        let msg = Message::new(
            Role::Assistant,
            Content::MultiPart {
                parts: vec![
                    Content::text("Let me search."),
                    Content::tool_call("c1", "literature_search", json!({"query": "kinase"})),
                    Content::tool_call("c2", "web_search", json!({"query": "ADMET"})),
                ],
            },
        );
        let json = OpenAiCompatibleProvider::messages_to_json(&[msg]);
        assert_eq!(json[0]["content"], "Let me search.");
        let calls = json[0]["tool_calls"].as_array().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1]["function"]["name"], "web_search");
        assert_eq!(calls[0]["function"]["arguments"], r#"{"query":"kinase"}"#);
    }

    #[test]
    fn test_messages_to_json_tool_result() {
        let json =
            OpenAiCompatibleProvider::messages_to_json(&[Message::tool_result("c1", "ok", false)]);
        assert_eq!(json[0]["role"], "tool");
        assert_eq!(json[0]["tool_call_id"], "c1");
    }

    #[test]
    fn test_request_body_streaming() {
        let request = CompletionRequest {
            messages: vec![Message::user("hi")],
            tools: Some(vec![ToolDefinition {
                name: "literature_search".into(),
                description: "search".into(),
                parameters: json!({"type": "object"}),
            }]),
            ..Default::default()
        };
        let body = provider().request_body(&request, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["model"], "gpt-5");
        assert_eq!(body["tools"][0]["function"]["name"], "literature_search");
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_parse_response_text() {
        let body = json!({
            "model": "gpt-5",
            "choices": [{"message": {"role": "assistant", "content": "Hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2}
        });
        let resp = OpenAiCompatibleProvider::parse_response(&body, "gpt-5").unwrap();
        assert_eq!(resp.message.content.as_text(), Some("Hello"));
        assert_eq!(resp.usage.total(), 12);
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_parse_response_tool_calls() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": null, "tool_calls": [
                {"id": "c1", "type": "function", "function": {"name": "literature_search", "arguments": "{\"query\":\"x\"}"}},
                {"id": "c2", "type": "function", "function": {"name": "web_search", "arguments": "not json"}}
            ]}, "finish_reason": "tool_calls"}]
        });
        let resp = OpenAiCompatibleProvider::parse_response(&body, "gpt-5").unwrap();
        let Content::MultiPart { parts } = resp.message.content else {
            panic!("expected multipart");
        };
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[1],
            Content::tool_call("c2", "web_search", json!({"raw_arguments": "not json"}))
        );
    }

    #[test]
    fn test_parse_response_missing_choices() {
        let err = OpenAiCompatibleProvider::parse_response(&json!({}), "gpt-5").unwrap_err();
        assert!(matches!(err, LlmError::ResponseParse { .. }));
    }

    #[test]
    fn test_map_http_error() {
        let p = provider();
        assert!(matches!(
            p.map_http_error(reqwest::StatusCode::UNAUTHORIZED, ""),
            LlmError::AuthFailed { .. }
        ));
        let body = r#"{"error":{"message":"Rate limit reached. Please try again in 20s"}}"#;
        assert!(matches!(
            p.map_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, body),
            LlmError::RateLimited {
                retry_after_secs: 20
            }
        ));
        assert!(matches!(
            p.map_http_error(reqwest::StatusCode::BAD_GATEWAY, "oops"),
            LlmError::ApiRequest { .. }
        ));
    }

    #[test]
    fn test_decoder_text_and_usage() {
        let mut decoder = StreamDecoder::default();
        let events = decoder.handle_chunk(&json!({"choices": [{"delta": {"content": "Hel"}}]}));
        assert_eq!(events, vec![StreamEvent::Token("Hel".into())]);
        let events = decoder.handle_chunk(&json!({
            "choices": [],
            "usage": {"prompt_tokens": 7, "completion_tokens": 3}
        }));
        assert!(events.is_empty());
        assert_eq!(decoder.usage.total(), 10);
    }

    #[test]
    fn test_decoder_tool_call_fragments() {
        let mut decoder = StreamDecoder::default();
        let mut events = Vec::new();
        events.extend(decoder.handle_chunk(&json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": "call_a", "function": {"name": "literature_search", "arguments": ""}}
        ]}}]})));
        events.extend(decoder.handle_chunk(&json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"arguments": "{\"query\":"}}
        ]}}]})));
        events.extend(decoder.handle_chunk(&json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"arguments": "\"CRISPR\"}"}}
        ]}}]})));
        events.extend(
            decoder.handle_chunk(&json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]})),
        );
        assert_eq!(
            events,
            vec![
                StreamEvent::ToolCallStart {
                    id: "call_a".into(),
                    name: "literature_search".into()
                },
                StreamEvent::ToolCallDelta {
                    id: "call_a".into(),
                    arguments_delta: "{\"query\":".into()
                },
                StreamEvent::ToolCallDelta {
                    id: "call_a".into(),
                    arguments_delta: "\"CRISPR\"}".into()
                },
                StreamEvent::ToolCallEnd {
                    id: "call_a".into()
                },
            ]
        );
    }

    #[test]
    fn test_decoder_synthesizes_missing_id() {
        let mut decoder = StreamDecoder::default();
        let events = decoder.handle_chunk(&json!({"choices": [{"delta": {"tool_calls": [
            {"index": 2, "function": {"name": "web_search"}}
        ]}}]}));
        assert_eq!(
            events,
            vec![StreamEvent::ToolCallStart {
                id: "call_2".into(),
                name: "web_search".into()
            }]
        );
        assert_eq!(
            decoder.close_tool_calls(),
            vec![StreamEvent::ToolCallEnd {
                id: "call_2".into()
            }]
        );
    }

    #[test]
    fn test_take_line_handles_split_utf8() {
        let text = "data: {\"x\":\"é\"}\n";
        let bytes = text.as_bytes();
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut buffer = bytes[..split].to_vec();
        assert_eq!(take_line(&mut buffer), None);
        buffer.extend_from_slice(&bytes[split..]);
        assert_eq!(take_line(&mut buffer).as_deref(), Some("data: {\"x\":\"é\"}"));
        assert!(buffer.is_empty());
    }
}
