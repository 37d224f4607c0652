//! Text-generation backend abstraction for multi-provider support
//!
//! All providers implement the `LlmBackend` trait so the generation engine can
//! work with any provider without knowing implementation details.

mod anthropic_backend;
mod budgeted_backend;
mod http_client;
mod openrouter_backend;
mod types;

pub use budgeted_backend::{BUDGET_ENV_VAR, BudgetedBackend, DEFAULT_BUDGET_LIMIT};
pub use reportgen_utils::error::LlmError;
pub use types::{LlmBackend, LlmFallbackInfo, LlmInvocation, LlmResult, Message, Role};

use anthropic_backend::AnthropicBackend;
use openrouter_backend::OpenRouterBackend;
use reportgen_config::Config;
use reportgen_utils::logging::redact_error_message;
use tracing::{info, warn};

/// Construct a backend for a specific provider, without fallback handling.
///
/// # Errors
///
/// Returns `LlmError::Unsupported` if the provider is unknown, or
/// `LlmError::Misconfiguration` if provider-specific configuration is invalid.
fn construct_backend_for_provider(
    provider: &str,
    config: &Config,
) -> Result<Box<dyn LlmBackend>, LlmError> {
    match provider {
        "anthropic" => Ok(Box::new(AnthropicBackend::new_from_config(config)?)),
        "openrouter" => {
            let backend = OpenRouterBackend::new_from_config(config)?;
            let config_budget = config.llm.openrouter.as_ref().and_then(|or| or.budget);
            Ok(Box::new(BudgetedBackend::with_limit_from_config(
                Box::new(backend),
                config_budget,
            )))
        }
        unknown => Err(LlmError::Unsupported(format!(
            "Unknown LLM provider '{unknown}'. Supported providers: anthropic, openrouter."
        ))),
    }
}

/// Create a backend from configuration, returning fallback metadata when used.
///
/// If the primary provider cannot be constructed and `[llm] fallback_provider` is
/// set, the fallback is constructed instead and described in the returned
/// `LlmFallbackInfo`.
///
/// # Errors
///
/// Returns the primary provider's error when neither provider can be constructed.
pub fn from_config_with_fallback(
    config: &Config,
) -> Result<(Box<dyn LlmBackend>, Option<LlmFallbackInfo>), LlmError> {
    let provider = config.provider();

    let primary_error = match construct_backend_for_provider(provider, config) {
        Ok(backend) => return Ok((backend, None)),
        Err(e) => e,
    };

    let Some(fallback_provider) = config.llm.fallback_provider.as_deref() else {
        return Err(primary_error);
    };

    let reason = redact_error_message(&primary_error.to_string());
    warn!(
        primary = provider,
        fallback = fallback_provider,
        reason = %reason,
        "Primary provider failed during construction, trying fallback"
    );

    match construct_backend_for_provider(fallback_provider, config) {
        Ok(backend) => {
            info!(provider = fallback_provider, "Using fallback provider");
            Ok((
                backend,
                Some(LlmFallbackInfo {
                    primary_provider: provider.to_string(),
                    fallback_provider: fallback_provider.to_string(),
                    reason,
                }),
            ))
        }
        Err(fallback_error) => {
            warn!(
                provider = fallback_provider,
                error = %redact_error_message(&fallback_error.to_string()),
                "Fallback provider also failed"
            );
            Err(primary_error)
        }
    }
}

/// Create a backend from configuration, discarding fallback metadata.
pub fn from_config(config: &Config) -> Result<Box<dyn LlmBackend>, LlmError> {
    from_config_with_fallback(config).map(|(backend, _)| backend)
}

#[cfg(test)]
mod factory_tests {
    use super::*;
    use reportgen_config::{AnthropicConfig, OpenRouterConfig};

    const UNSET_KEY_ENV: &str = "RG_TEST_UNSET_KEY";

    fn base_config() -> Config {
        Config::builder().build().unwrap()
    }

    fn anthropic(api_key_env: &str, model: Option<&str>) -> AnthropicConfig {
        AnthropicConfig {
            api_key_env: Some(api_key_env.to_string()),
            model: model.map(str::to_string),
            ..AnthropicConfig::default()
        }
    }

    #[test]
    fn test_unknown_provider_is_unsupported() {
        let mut config = base_config();
        config.llm.provider = Some("invalid-provider".to_string());

        match from_config(&config) {
            Err(LlmError::Unsupported(msg)) => assert!(msg.contains("invalid-provider")),
            other => panic!("expected Unsupported, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_missing_api_key_is_misconfiguration() {
        let mut config = base_config();
        config.llm.anthropic = Some(anthropic(UNSET_KEY_ENV, Some("m")));

        match from_config(&config) {
            Err(LlmError::Misconfiguration(msg)) => assert!(msg.contains(UNSET_KEY_ENV)),
            other => panic!("expected Misconfiguration, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_missing_model_is_misconfiguration() {
        let mut config = base_config();
        // PATH is always present, so only the model is missing
        config.llm.anthropic = Some(anthropic("PATH", None));

        match from_config(&config) {
            Err(LlmError::Misconfiguration(msg)) => assert!(msg.contains("model")),
            other => panic!("expected Misconfiguration, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_fallback_provider_used_when_primary_fails() {
        let mut config = base_config();
        config.llm.anthropic = Some(anthropic(UNSET_KEY_ENV, Some("m")));
        config.llm.fallback_provider = Some("openrouter".to_string());
        config.llm.openrouter = Some(OpenRouterConfig {
            api_key_env: Some("PATH".to_string()),
            model: Some("router-model".to_string()),
            budget: Some(3),
            ..OpenRouterConfig::default()
        });

        let (_backend, info) = from_config_with_fallback(&config).unwrap();
        let info = info.expect("fallback info");
        assert_eq!(info.primary_provider, "anthropic");
        assert_eq!(info.fallback_provider, "openrouter");
        assert!(info.reason.contains(UNSET_KEY_ENV));
    }

    #[test]
    fn test_primary_error_returned_when_fallback_fails_too() {
        let mut config = base_config();
        config.llm.anthropic = Some(anthropic(UNSET_KEY_ENV, Some("m")));
        config.llm.fallback_provider = Some("openrouter".to_string());

        match from_config_with_fallback(&config) {
            Err(LlmError::Misconfiguration(msg)) => assert!(msg.contains("Anthropic")),
            other => panic!("expected primary error, got {:?}", other.err()),
        }
    }
}
