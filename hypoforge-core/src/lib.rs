//! # Hypoforge Core
//!
//! Core library for Hypoforge, a streaming research-hypothesis generator.
//! Provides the agent runner, LLM providers, incremental hypothesis
//! extraction, tool-interaction correlation, the OpenAI-compatible gateway,
//! and session persistence.

pub mod agent;
pub mod brain;
pub mod config;
pub mod correlator;
pub mod error;
pub mod extraction;
pub mod gateway;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod session;
pub mod types;

// Re-export commonly used types at the crate root.
pub use agent::{
    AgentDefinition, AgentEvent, AgentEventStream, GenerationContext, RegisteredTool,
    ToolExecutor,
};
pub use brain::{LlmProvider, MockLlmProvider};
pub use config::{HypoforgeConfig, load_config};
pub use correlator::{ToolCallRecord, ToolCorrelator, ToolInteraction, ToolOutputRecord};
pub use error::{HypoforgeError, Result};
pub use extraction::{HypothesisRecord, REQUIRED_FIELDS, extract, extract_with_report};
pub use gateway::{AppState, GatewayConfig, SharedState, gateway_router, run_gateway};
pub use orchestrator::{ExtractionTracker, RunEvent, RunEventStream, with_extraction};
pub use providers::{OpenAiCompatibleProvider, create_provider};
pub use session::{SessionMeta, SessionRecord, SessionRecorder, SessionStore};
pub use types::{
    CompletionRequest, CompletionResponse, Content, Message, Role, StreamEvent, TokenUsage,
    ToolDefinition, ToolOutput,
};
