//! Error types for the Hypoforge core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering LLM, tool execution, configuration, and session persistence.

use std::path::PathBuf;

/// Top-level error type for the Hypoforge core library.
#[derive(Debug, thiserror::Error)]
pub enum HypoforgeError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from LLM provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Streaming error: {message}")]
    Streaming { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from tool registration and execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool not found: {name}")]
    NotFound { name: String },

    #[error("Tool already registered: {name}")]
    AlreadyRegistered { name: String },

    #[error("Invalid arguments for tool '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("Tool '{name}' execution failed: {message}")]
    ExecutionFailed { name: String, message: String },

    #[error("Tool '{name}' timed out after {timeout_secs}s")]
    Timeout { name: String, timeout_secs: u64 },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from saving or loading generation sessions.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to write session {path}: {message}")]
    WriteFailed { path: PathBuf, message: String },

    #[error("Session not found: {id}")]
    NotFound { id: String },

    #[error("Session file {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },
}

/// Errors from the agent runner.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Maximum turns ({max}) reached without a final answer")]
    MaxTurnsReached { max: usize },

    #[error("Agent run was abandoned by the consumer")]
    Abandoned,

    #[error("Agent task failed: {message}")]
    TaskFailed { message: String },
}

/// A type alias for results using the top-level `HypoforgeError`.
pub type Result<T> = std::result::Result<T, HypoforgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_llm() {
        let err = HypoforgeError::Llm(LlmError::ApiRequest {
            message: "connection refused".into(),
        });
        assert_eq!(
            err.to_string(),
            "LLM error: API request failed: connection refused"
        );
    }

    #[test]
    fn test_error_display_tool() {
        let err = HypoforgeError::Tool(ToolError::NotFound {
            name: "literature_search".into(),
        });
        assert_eq!(
            err.to_string(),
            "Tool error: Tool not found: literature_search"
        );
    }

    #[test]
    fn test_error_display_session() {
        let err = HypoforgeError::Session(SessionError::NotFound {
            id: "20251015_101500_ai_for_drug_discovery".into(),
        });
        assert_eq!(
            err.to_string(),
            "Session error: Session not found: 20251015_101500_ai_for_drug_discovery"
        );
    }

    #[test]
    fn test_error_display_agent() {
        let err = HypoforgeError::Agent(AgentError::MaxTurnsReached { max: 30 });
        assert_eq!(
            err.to_string(),
            "Agent error: Maximum turns (30) reached without a final answer"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: HypoforgeError = io_err.into();
        assert!(matches!(err, HypoforgeError::Io(_)));
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: HypoforgeError = serde_err.into();
        assert!(matches!(err, HypoforgeError::Serialization(_)));
    }

    #[test]
    fn test_llm_error_variants() {
        let err = LlmError::RateLimited {
            retry_after_secs: 60,
        };
        assert_eq!(err.to_string(), "Rate limited by provider, retry after 60s");

        let err = LlmError::AuthFailed {
            provider: "openrouter".into(),
        };
        assert_eq!(err.to_string(), "Authentication failed for provider openrouter");
    }
}
