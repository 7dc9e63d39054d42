//! The external transformation service: one prompt in, one string out.
//!
//! The pipeline only ever talks to [`TransformationService`], so tests can
//! script failures with an in-process fake and the production path can wrap
//! any `edgequake_llm` provider in [`LlmService`].
//!
//! Providers report failures as free-form error text (an HTTP status, a
//! vendor message such as `429 Resource has been exhausted`). The
//! [`classify_error_message`] heuristics turn that text into the three
//! classes the retry loop understands.

use crate::config::RewriteConfig;
use crate::error::{RewriteError, ServiceError};
use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Model used when a provider is named but no model is.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// A successful answer from the service.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Generation {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl Generation {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Opaque text-generation collaborator.
#[async_trait]
pub trait TransformationService: Send + Sync {
    /// Generate text for `prompt`. Failures must already be classified.
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<Generation, ServiceError>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "service"
    }
}

const TRANSIENT_MARKERS: &[&str] = &[
    "429",
    "rate limit",
    "ratelimit",
    "rate_limit",
    "too many requests",
    "resource has been exhausted",
    "resource exhausted",
    "resource_exhausted",
    "quota",
    "overloaded",
    "unavailable",
    "500",
    "502",
    "503",
    "504",
    "internal server error",
    "bad gateway",
    "timed out",
    "timeout",
    "temporarily",
    "try again",
    "connection reset",
];

const FATAL_MARKERS: &[&str] = &[
    "400",
    "401",
    "403",
    "404",
    "not found",
    "invalid argument",
    "invalid_argument",
    "invalid request",
    "invalid_request",
    "bad request",
    "unauthorized",
    "permission denied",
    "forbidden",
    "api key",
    "unsupported",
    "does not exist",
];

/// Classify a provider's error text.
///
/// Transient markers win over fatal ones: a message such as
/// `503 model not found on this replica` is worth another attempt.
pub fn classify_error_message(message: &str) -> ServiceError {
    let lower = message.to_lowercase();
    if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        ServiceError::Transient(message.to_string())
    } else if FATAL_MARKERS.iter().any(|m| lower.contains(m)) {
        ServiceError::Fatal(message.to_string())
    } else {
        ServiceError::Unknown(message.to_string())
    }
}

/// [`TransformationService`] backed by an `edgequake_llm` provider.
pub struct LlmService {
    provider: Arc<dyn LLMProvider>,
    name: String,
    system_prompt: String,
    max_tokens: usize,
    timeout: Duration,
}

impl LlmService {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &RewriteConfig) -> Self {
        Self {
            provider,
            name: config
                .provider_name
                .clone()
                .unwrap_or_else(|| "llm".to_string()),
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_tokens: config.max_tokens,
            timeout: config.api_timeout(),
        }
    }

    /// Resolve the provider named by `config` and wrap it.
    pub fn from_config(config: &RewriteConfig) -> Result<Self, RewriteError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }
}

#[async_trait]
impl TransformationService for LlmService {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<Generation, ServiceError> {
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user(prompt),
        ];
        let options = CompletionOptions {
            temperature: Some(temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let call = self.provider.chat(&messages, Some(&options));
        let response = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| {
                ServiceError::Transient(format!(
                    "request timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| classify_error_message(&e.to_string()))?;

        debug!(
            "{} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );

        if response.content.trim().is_empty() {
            return Err(ServiceError::Unknown("empty response".to_string()));
        }

        Ok(Generation {
            text: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Instantiate a named provider with the given model.
fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, RewriteError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        RewriteError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **OpenAI key present** → OpenAI with the configured or default model.
/// 5. **Full auto-detection** via `ProviderFactory::from_env`.
pub fn resolve_provider(config: &RewriteConfig) -> Result<Arc<dyn LLMProvider>, RewriteError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| RewriteError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, GEMINI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_are_transient() {
        for msg in [
            "HTTP 429 Too Many Requests",
            "429 Resource has been exhausted (e.g. check quota).",
            "The model is overloaded. Please try again later.",
            "503 Service Unavailable",
            "request timed out after 120s",
        ] {
            assert!(
                matches!(classify_error_message(msg), ServiceError::Transient(_)),
                "{msg}"
            );
        }
    }

    #[test]
    fn bad_requests_are_fatal() {
        for msg in [
            "404 models/gemini-flash-latest is not found for API version v1beta",
            "400 Invalid argument: temperature",
            "401 Unauthorized: incorrect API key provided",
        ] {
            assert!(
                matches!(classify_error_message(msg), ServiceError::Fatal(_)),
                "{msg}"
            );
        }
    }

    #[test]
    fn novel_errors_are_unknown() {
        assert!(matches!(
            classify_error_message("the flux capacitor stalled"),
            ServiceError::Unknown(_)
        ));
    }

    #[test]
    fn transient_wins_over_fatal() {
        assert!(matches!(
            classify_error_message("503: upstream model not found on replica"),
            ServiceError::Transient(_)
        ));
    }

    #[test]
    fn classification_keeps_original_text() {
        let e = classify_error_message("429 Slow Down");
        assert_eq!(e.message(), "429 Slow Down");
    }
}
