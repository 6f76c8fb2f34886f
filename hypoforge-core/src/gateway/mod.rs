//! # HTTP Gateway
//!
//! Exposes hypothesis generation through an OpenAI-compatible chat
//! completions endpoint so chat UIs can stream runs directly. Streaming
//! responses are Server-Sent Events carrying `chat.completion.chunk`
//! payloads; finished runs are persisted as sessions.

pub mod protocol;
mod server;

pub use protocol::{
    ChatCompletion, ChatCompletionChunk, ChatCompletionRequest, ChatMessage, ChunkBuilder,
    RequestMetadata, render_event,
};
pub use server::{AppState, SharedState, router as gateway_router, run as run_gateway};

use serde::{Deserialize, Serialize};

/// Configuration for the HTTP gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Origins allowed by CORS. Empty allows any origin.
    pub cors_origins: Vec<String>,
    /// Model id advertised in streamed chunks.
    pub model_id: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_origins: vec!["http://localhost:3000".to_string()],
            model_id: "hypothesis-generator".to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
