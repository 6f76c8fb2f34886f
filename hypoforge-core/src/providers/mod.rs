//! LLM provider implementations.
//!
//! All supported backends speak the OpenAI chat completions protocol, so a
//! single [`OpenAiCompatibleProvider`] covers OpenAI, OpenRouter and local
//! endpoints. Use `create_provider()` to build one from config with retry
//! handling applied.

pub mod openai_compat;

use crate::brain::LlmProvider;
use crate::config::{LlmConfig, RetryConfig};
use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, StreamEvent};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub use openai_compat::OpenAiCompatibleProvider;

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Retries on `LlmError::RateLimited` (respects `retry_after_secs`), `LlmError::Streaming`,
/// `LlmError::Connection`, and `LlmError::Timeout`. Permanent errors (auth, parse) return immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    retry_when(config, is_retryable, operation).await
}

async fn retry_when<F, Fut, T>(
    config: &RetryConfig,
    retryable: fn(&LlmError) -> bool,
    operation: F,
) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !retryable(&e) || attempt >= config.max_retries {
                    return Err(e);
                }
                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

/// Check if an error is retryable (transient).
fn is_retryable(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::RateLimited { .. }
            | LlmError::Streaming { .. }
            | LlmError::Connection { .. }
            | LlmError::Timeout { .. }
    )
}

/// Streaming calls only retry failures raised before any event was forwarded.
fn is_retryable_before_stream(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::RateLimited { .. } | LlmError::Connection { .. } | LlmError::Timeout { .. }
    )
}

/// Compute backoff delay, respecting rate limit retry-after hints.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &LlmError) -> u64 {
    if let LlmError::RateLimited { retry_after_secs } = err {
        let server_ms = retry_after_secs * 1000;
        let computed = compute_exponential_backoff(config, attempt);
        return server_ms.max(computed);
    }
    compute_exponential_backoff(config, attempt)
}

/// Pure exponential backoff with optional jitter.
fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // Up to 25% jitter
        let jitter = (capped as f64 * 0.25 * rand_simple()) as u64;
        capped + jitter
    } else {
        capped
    }
}

/// Cheap pseudo-random in [0, 1) from the clock's sub-second nanos.
fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Wraps a provider so both call styles go through the retry policy.
pub struct RetryingProvider {
    inner: Arc<dyn LlmProvider>,
    config: RetryConfig,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmProvider for RetryingProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        with_retry(&self.config, || self.inner.complete(request.clone())).await
    }

    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        retry_when(&self.config, is_retryable_before_stream, || {
            self.inner.complete_streaming(request.clone(), tx.clone())
        })
        .await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }
}

/// Create an LLM provider based on the configuration.
///
/// `openai` and `openrouter` get their public endpoints and key variables by
/// default; any other provider name is treated as an OpenAI-compatible server
/// at `base_url`.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = OpenAiCompatibleProvider::new(config)?;
    tracing::info!(
        provider = %config.provider,
        model = %config.model,
        base_url = %config.resolved_base_url(),
        "Created LLM provider"
    );
    Ok(Arc::new(RetryingProvider::new(
        Arc::new(provider),
        config.retry.clone(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient_error() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_retry(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(LlmError::Connection {
                    message: "reset".into(),
                })
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_retry(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::AuthFailed {
                provider: "openai".into(),
            })
        })
        .await;
        assert!(matches!(result, Err(LlmError::AuthFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_retry(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::Timeout { timeout_secs: 1 })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_streaming_errors_not_retried_mid_stream() {
        assert!(!is_retryable_before_stream(&LlmError::Streaming {
            message: "eof".into()
        }));
        assert!(is_retryable_before_stream(&LlmError::RateLimited {
            retry_after_secs: 1
        }));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = fast_retry();
        assert_eq!(compute_exponential_backoff(&config, 0), 1);
        assert_eq!(compute_exponential_backoff(&config, 10), 5);
    }

    #[test]
    fn test_rate_limit_backoff_respects_server_hint() {
        let config = fast_retry();
        let err = LlmError::RateLimited {
            retry_after_secs: 2,
        };
        assert_eq!(compute_backoff(&config, 0, &err), 2000);
    }

    #[test]
    fn test_create_provider_missing_key() {
        let config = LlmConfig {
            api_key_env: "HYPOFORGE_TEST_DEFINITELY_UNSET_KEY".into(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            create_provider(&config),
            Err(LlmError::AuthFailed { .. })
        ));
    }

    #[test]
    fn test_create_provider_local_without_key() {
        let config = LlmConfig {
            provider: "vllm".into(),
            base_url: Some("http://localhost:8001/v1".into()),
            api_key_env: "HYPOFORGE_TEST_DEFINITELY_UNSET_KEY".into(),
            ..LlmConfig::default()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.provider_name(), "vllm");
        assert_eq!(provider.model_name(), "gpt-5");
    }
}
