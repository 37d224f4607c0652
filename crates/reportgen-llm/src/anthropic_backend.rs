//! Anthropic HTTP backend implementation
//!
//! HTTP backend for Anthropic's Messages API.

use async_trait::async_trait;
use reportgen_config::Config;
use reportgen_utils::error::LlmError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::http_client::{HttpClient, HttpParams};
use crate::types::{LlmBackend, LlmInvocation, LlmResult, Message, Role};

/// Default Anthropic API endpoint
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub(crate) struct AnthropicBackend {
    client: Arc<HttpClient>,
    base_url: String,
    api_key: String,
    default_model: String,
    default_params: HttpParams,
}

impl AnthropicBackend {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        default_model: String,
        default_params: HttpParams,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: Arc::new(HttpClient::new()?),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            default_model,
            default_params,
        })
    }

    /// Create a backend from `[llm.anthropic]`
    ///
    /// # Errors
    ///
    /// Returns `LlmError::Misconfiguration` if the API key environment variable is
    /// not set or no model is configured.
    pub fn new_from_config(config: &Config) -> Result<Self, LlmError> {
        let section = config.llm.anthropic.clone().unwrap_or_default();
        let api_key_env = section
            .api_key_env
            .as_deref()
            .unwrap_or("ANTHROPIC_API_KEY");

        let api_key = std::env::var(api_key_env).map_err(|_| {
            LlmError::Misconfiguration(format!(
                "Anthropic API key not found in environment variable '{api_key_env}'. \
                 Set this variable or configure a different api_key_env in [llm.anthropic]."
            ))
        })?;

        let default_model = section.model.clone().ok_or_else(|| {
            LlmError::Misconfiguration(
                "Anthropic model not specified in configuration. \
                 Set [llm.anthropic] model = \"model-name\"."
                    .to_string(),
            )
        })?;

        let default_params = HttpParams {
            max_tokens: section.max_tokens.unwrap_or_else(|| config.max_tokens()),
            temperature: section
                .temperature
                .unwrap_or(HttpParams::default().temperature),
        };

        Self::new(api_key, section.base_url, default_model, default_params)
    }

    /// Resolve model and sampling parameters for this invocation
    ///
    /// `inv.model` and `inv.metadata["max_tokens" | "temperature"]` override the
    /// backend defaults.
    fn resolve_params(&self, inv: &LlmInvocation) -> (String, HttpParams) {
        let model = if inv.model.is_empty() {
            self.default_model.clone()
        } else {
            inv.model.clone()
        };

        let max_tokens = inv
            .metadata
            .get("max_tokens")
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(self.default_params.max_tokens);

        let temperature = inv
            .metadata
            .get("temperature")
            .and_then(serde_json::Value::as_f64)
            .map(|v| v as f32)
            .unwrap_or(self.default_params.temperature);

        (
            model,
            HttpParams {
                max_tokens,
                temperature,
            },
        )
    }

    /// Split system messages into the `system` field; keep the rest in order.
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system_prompt: Option<String> = None;
        let mut anthropic_messages = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => match system_prompt.as_mut() {
                    Some(existing) => {
                        existing.push_str("\n\n");
                        existing.push_str(&msg.content);
                    }
                    None => system_prompt = Some(msg.content.clone()),
                },
                Role::User => anthropic_messages.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: msg.content.clone(),
                }),
                Role::Assistant => anthropic_messages.push(AnthropicMessage {
                    role: "assistant".to_string(),
                    content: msg.content.clone(),
                }),
            }
        }

        (system_prompt, anthropic_messages)
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError> {
        let (model, params) = self.resolve_params(&inv);

        debug!(
            provider = "anthropic",
            model = %model,
            report_type = %inv.report_type,
            module_id = %inv.module_id,
            max_tokens = params.max_tokens,
            timeout_secs = inv.timeout.as_secs(),
            "Invoking Anthropic backend"
        );

        let (system, messages) = Self::convert_messages(&inv.messages);
        let request_body = AnthropicRequest {
            model: model.clone(),
            messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            system,
        };

        let request = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request_body);

        let response = self
            .client
            .execute_with_retry(request, inv.timeout, "anthropic")
            .await?;

        let body: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(format!("Failed to parse Anthropic response: {e}")))?;

        let content: String = body
            .content
            .iter()
            .filter(|block| block.content_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();

        if content.is_empty() {
            return Err(LlmError::Transport(
                "Anthropic response missing text content".to_string(),
            ));
        }

        let mut result = LlmResult::new(content, "anthropic", model);
        if let Some(usage) = body.usage {
            result = result.with_tokens(usage.input_tokens, usage.output_tokens);
        }

        debug!(
            provider = "anthropic",
            module_id = %inv.module_id,
            tokens_output = ?result.tokens_output,
            "Anthropic invocation completed"
        );

        Ok(result)
    }
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::test_server::serve;
    use std::time::Duration;

    fn backend(base_url: Option<String>) -> AnthropicBackend {
        AnthropicBackend::new(
            "test-key".to_string(),
            base_url,
            "default-model".to_string(),
            HttpParams {
                max_tokens: 1024,
                temperature: 0.5,
            },
        )
        .unwrap()
    }

    fn invocation(model: &str, messages: Vec<Message>) -> LlmInvocation {
        LlmInvocation::new(
            "personal-profile",
            "intro",
            model,
            Duration::from_secs(10),
            messages,
        )
    }

    #[test]
    fn test_resolve_params_defaults_and_overrides() {
        let backend = backend(None);

        let (model, params) = backend.resolve_params(&invocation("", vec![]));
        assert_eq!(model, "default-model");
        assert_eq!(params.max_tokens, 1024);

        let inv = invocation("custom-model", vec![])
            .with_metadata("max_tokens", serde_json::json!(4096))
            .with_metadata("temperature", serde_json::json!(0.1));
        let (model, params) = backend.resolve_params(&inv);
        assert_eq!(model, "custom-model");
        assert_eq!(params.max_tokens, 4096);
        assert!((params.temperature - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn test_convert_messages_separates_and_joins_system() {
        let messages = vec![
            Message::system("Write the introduction."),
            Message::system("Respond in German."),
            Message::user("{\"sun\":1}"),
        ];

        let (system, converted) = AnthropicBackend::convert_messages(&messages);
        assert_eq!(
            system.as_deref(),
            Some("Write the introduction.\n\nRespond in German.")
        );
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].role, "user");
    }

    #[tokio::test]
    async fn test_invoke_parses_text_blocks_and_usage() {
        let server = serve(vec![(
            200,
            r#"{"content":[{"type":"text","text":"Hello "},{"type":"tool_use"},{"type":"text","text":"world"}],"usage":{"input_tokens":12,"output_tokens":3}}"#
                .to_string(),
        )])
        .await;
        let backend = backend(Some(server.url.clone()));

        let result = backend
            .invoke(invocation(
                "",
                vec![Message::system("sys"), Message::user("hi")],
            ))
            .await
            .unwrap();

        assert_eq!(result.raw_response, "Hello world");
        assert_eq!(result.provider, "anthropic");
        assert_eq!(result.tokens_input, Some(12));

        let requests = server.requests.lock().await;
        assert!(requests[0].head.to_ascii_lowercase().contains("x-api-key: test-key"));
        let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
        assert_eq!(body["system"], "sys");
        assert_eq!(body["max_tokens"], 1024);
    }

    #[tokio::test]
    async fn test_invoke_rejects_empty_content() {
        let server = serve(vec![(200, r#"{"content":[]}"#.to_string())]).await;
        let err = backend(Some(server.url.clone()))
            .invoke(invocation("", vec![Message::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Transport(msg) if msg.contains("missing text")));
    }

    #[tokio::test]
    async fn test_invoke_maps_auth_failure() {
        let server = serve(vec![(401, "{}".to_string())]).await;
        let err = backend(Some(server.url.clone()))
            .invoke(invocation("", vec![Message::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ProviderAuth(_)));
    }
}
