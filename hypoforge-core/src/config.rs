//! Configuration system for Hypoforge.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/hypoforge/config.toml` and/or
//! `.hypoforge/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::gateway::GatewayConfig;

/// Top-level configuration for Hypoforge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HypoforgeConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub literature: LiteratureConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
}

/// Configuration for the LLM provider driving the hypothesis agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: "openai", "openrouter", or any OpenAI-compatible endpoint.
    pub provider: String,
    /// Model identifier (e.g., "gpt-5", "anthropic/claude-sonnet-4.5").
    pub model: String,
    /// Environment variable holding the API key. Empty means "use the provider default".
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    pub base_url: Option<String>,
    /// Maximum tokens to generate per turn.
    pub max_tokens: Option<usize>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Retry policy for non-streaming calls.
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-5".to_string(),
            api_key_env: String::new(),
            base_url: None,
            max_tokens: None,
            temperature: 0.7,
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    /// The API key environment variable, falling back to the provider's conventional name.
    pub fn resolved_api_key_env(&self) -> &str {
        if !self.api_key_env.is_empty() {
            return &self.api_key_env;
        }
        match self.provider.as_str() {
            "openrouter" => "OPENROUTER_API_KEY",
            _ => "OPENAI_API_KEY",
        }
    }

    /// The base URL, falling back to the provider's public endpoint.
    pub fn resolved_base_url(&self) -> String {
        if let Some(url) = &self.base_url {
            return url.trim_end_matches('/').to_string();
        }
        match self.provider.as_str() {
            "openrouter" => "https://openrouter.ai/api/v1".to_string(),
            _ => "https://api.openai.com/v1".to_string(),
        }
    }

    /// Validate this LLM config and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.model.trim().is_empty() {
            warnings.push("llm.model is empty; the provider will reject requests".to_string());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            warnings.push(format!(
                "llm.temperature ({}) is outside the usual 0.0-2.0 range",
                self.temperature
            ));
        }
        if self.provider != "openai" && self.provider != "openrouter" && self.base_url.is_none() {
            warnings.push(format!(
                "provider '{}' has no base_url; falling back to the OpenAI endpoint",
                self.provider
            ));
        }
        warnings
    }
}

/// Exponential backoff settings for transient provider errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Configuration for the `literature_search` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiteratureConfig {
    /// Model used by the literature sub-agent. Falls back to `llm.model`.
    pub model: Option<String>,
    /// Maximum web search results fed to the sub-agent.
    pub max_results: usize,
    /// Tool timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LiteratureConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_results: 8,
            timeout_secs: 120,
        }
    }
}

/// Defaults and limits for a single generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Research domain used when a request does not name one.
    pub default_domain: String,
    /// Hypothesis count used when a request does not give one.
    pub default_hypothesis_count: usize,
    /// Maximum think/act rounds before the agent gives up.
    pub max_turns: usize,
    /// Characters of the claim shown in `hypothesis_found` summaries.
    pub summary_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_domain: "AI for Drug Discovery".to_string(),
            default_hypothesis_count: 3,
            max_turns: 30,
            summary_chars: 80,
        }
    }
}

/// Where finished runs are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("sessions"),
        }
    }
}

impl HypoforgeConfig {
    /// Collect warnings from every section.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.llm.validate();
        if self.generation.default_hypothesis_count == 0 {
            warnings.push("generation.default_hypothesis_count is 0".to_string());
        }
        if self.generation.max_turns == 0 {
            warnings.push("generation.max_turns is 0; every run will fail".to_string());
        }
        if self.literature.timeout_secs == 0 {
            warnings.push("literature.timeout_secs is 0; searches will time out".to_string());
        }
        warnings
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `HYPOFORGE_`)
/// 3. Workspace-local config (`.hypoforge/config.toml`)
/// 4. User config (`~/.config/hypoforge/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&HypoforgeConfig>,
) -> Result<HypoforgeConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(HypoforgeConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "hypoforge", "hypoforge") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".hypoforge").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // HYPOFORGE_LLM__MODEL, HYPOFORGE_GATEWAY__PORT, etc.
    figment = figment.merge(Env::prefixed("HYPOFORGE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Directory used for logs and other per-user data.
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "hypoforge", "hypoforge")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HypoforgeConfig::default();
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.generation.default_hypothesis_count, 3);
        assert_eq!(config.generation.summary_chars, 80);
        assert_eq!(config.gateway.port, 8000);
        assert!(config.sessions.enabled);
    }

    #[test]
    fn test_provider_defaults() {
        let mut llm = LlmConfig::default();
        assert_eq!(llm.resolved_api_key_env(), "OPENAI_API_KEY");
        assert_eq!(llm.resolved_base_url(), "https://api.openai.com/v1");

        llm.provider = "openrouter".into();
        assert_eq!(llm.resolved_api_key_env(), "OPENROUTER_API_KEY");
        assert_eq!(llm.resolved_base_url(), "https://openrouter.ai/api/v1");

        llm.base_url = Some("http://localhost:11434/v1/".into());
        llm.api_key_env = "LOCAL_KEY".into();
        assert_eq!(llm.resolved_base_url(), "http://localhost:11434/v1");
        assert_eq!(llm.resolved_api_key_env(), "LOCAL_KEY");
    }

    #[test]
    fn test_validate_warnings() {
        let mut config = HypoforgeConfig::default();
        assert!(config.validate().is_empty());

        config.llm.temperature = 3.5;
        config.generation.max_turns = 0;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("temperature"));
    }

    #[test]
    fn test_unknown_provider_without_base_url_warns() {
        let llm = LlmConfig {
            provider: "vllm".into(),
            ..LlmConfig::default()
        };
        let warnings = llm.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("vllm"));
    }

    #[test]
    fn test_load_config_defaults() {
        let config = load_config(None, None).unwrap();
        assert_eq!(config.generation.max_turns, 30);
    }

    #[test]
    fn test_load_config_with_overrides() {
        let mut overrides = HypoforgeConfig::default();
        overrides.llm.model = "anthropic/claude-sonnet-4.5".to_string();
        overrides.generation.max_turns = 12;

        let config = load_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.llm.model, "anthropic/claude-sonnet-4.5");
        assert_eq!(config.generation.max_turns, 12);
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_dir = dir.path().join(".hypoforge");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(
            cfg_dir.join("config.toml"),
            r#"
[llm]
provider = "openrouter"
model = "anthropic/claude-3.5-sonnet"

[generation]
default_domain = "AI for Materials Science"
default_hypothesis_count = 5

[gateway]
port = 9100
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.llm.provider, "openrouter");
        assert_eq!(config.generation.default_domain, "AI for Materials Science");
        assert_eq!(config.generation.default_hypothesis_count, 5);
        // Untouched fields keep their defaults.
        assert_eq!(config.generation.summary_chars, 80);
        assert_eq!(config.gateway.port, 9100);
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = HypoforgeConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: HypoforgeConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.llm.model, config.llm.model);
        assert_eq!(parsed.sessions.dir, config.sessions.dir);
    }
}
