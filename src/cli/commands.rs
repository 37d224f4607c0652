//! Command implementations and helpers

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use std::io::Read;
use std::sync::Arc;
use tracing::{info, warn};

use super::args::{Commands, RequestArgs};

use crate::llm::{LlmBackend, LlmError, LlmInvocation, LlmResult};
use crate::{
    Config, PassthroughSummarizer, ReportError, ReportOrchestrator, ReportRegistry, ReportRequest,
    emit_jcs,
};

pub(super) async fn dispatch(command: Commands, config: &Config) -> Result<(), ReportError> {
    match command {
        Commands::Create { request, wait } => {
            let orchestrator = build_orchestrator(config, true)?;
            let req = read_request(&request)?;
            let created = orchestrator.create(&req).await?;
            print_json(&created)?;
            // Generation runs in this process, so it must settle before exit
            orchestrator.wait_idle().await;
            if wait {
                print_json(&orchestrator.status(&req).await?)?;
            }
            Ok(())
        }
        Commands::Status { request } => {
            let orchestrator = build_orchestrator(config, false)?;
            let req = read_request(&request)?;
            print_json(&orchestrator.status(&req).await?)
        }
        Commands::Content { request } => {
            let orchestrator = build_orchestrator(config, false)?;
            let req = read_request(&request)?;
            print_json(&orchestrator.content(&req).await?)
        }
        Commands::Retry { request, wait } => {
            let orchestrator = build_orchestrator(config, true)?;
            let req = read_request(&request)?;
            print_json(&orchestrator.retry(&req).await?)?;
            orchestrator.wait_idle().await;
            if wait {
                print_json(&orchestrator.status(&req).await?)?;
            }
            Ok(())
        }
        Commands::Delete { request } => {
            let orchestrator = build_orchestrator(config, false)?;
            let req = read_request(&request)?;
            let deleted = orchestrator.delete(&req).await?;
            print_json(&json!({ "deleted": deleted }))
        }
        Commands::Stream { request, .. } => {
            let orchestrator = build_orchestrator(config, true)?;
            let req = read_request(&request)?;
            let mut stream = orchestrator.stream(req, None);
            while let Some(event) = stream.next().await {
                print_json(&event)?;
            }
            orchestrator.wait_idle().await;
            Ok(())
        }
        Commands::Types => {
            let registry = ReportRegistry::builtin().with_overrides(&config.reports);
            let types: Vec<_> = registry.list().collect();
            print_json(&types)
        }
        Commands::Config => {
            let effective: serde_json::Map<String, Value> = config
                .effective_config()
                .into_iter()
                .map(|(key, (value, source))| (key, json!({ "value": value, "source": source })))
                .collect();
            print_json(&effective)
        }
    }
}

/// Build the orchestrator for a command.
///
/// Commands that never generate still work without provider credentials: the
/// backend is replaced by one that rejects every call with the construction error.
pub(super) fn build_orchestrator(
    config: &Config,
    needs_provider: bool,
) -> Result<ReportOrchestrator, ReportError> {
    let backend: Arc<dyn LlmBackend> = match crate::llm::from_config_with_fallback(config) {
        Ok((backend, fallback)) => {
            if let Some(info) = fallback {
                warn!(
                    primary = %info.primary_provider,
                    fallback = %info.fallback_provider,
                    reason = %info.reason,
                    "Using fallback LLM provider"
                );
            }
            Arc::from(backend)
        }
        Err(e) if !needs_provider => {
            info!(error = %e, "LLM provider unavailable; continuing without generation");
            Arc::new(UnconfiguredBackend {
                reason: e.to_string(),
            })
        }
        Err(e) => return Err(e.into()),
    };

    ReportOrchestrator::from_config(config, backend, Arc::new(PassthroughSummarizer))
}

/// Backend used when no provider could be constructed
struct UnconfiguredBackend {
    reason: String,
}

#[async_trait]
impl LlmBackend for UnconfiguredBackend {
    async fn invoke(&self, _inv: LlmInvocation) -> Result<LlmResult, LlmError> {
        Err(LlmError::Misconfiguration(self.reason.clone()))
    }
}

pub(super) fn read_request(args: &RequestArgs) -> Result<ReportRequest, ReportError> {
    let raw = if args.input == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(&args.input)?
    };
    let input: Value = serde_json::from_str(&raw)
        .map_err(|e| ReportError::InvalidInput(format!("input is not valid JSON: {e}")))?;

    let mut request = ReportRequest::new(&args.user, &args.report_type, input);
    if let Some(lang) = &args.lang {
        request = request.with_language(lang);
    }
    Ok(request)
}

/// Print a value as canonical JSON on its own line
pub(super) fn print_json<T: Serialize>(value: &T) -> Result<(), ReportError> {
    let line = emit_jcs(value).map_err(|e| ReportError::Serialization(e.to_string()))?;
    println!("{line}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn request_args(input: &str) -> RequestArgs {
        RequestArgs {
            user: "u1".to_string(),
            report_type: "compatibility".to_string(),
            input: input.to_string(),
            lang: Some("fr".to_string()),
        }
    }

    #[test]
    fn test_read_request_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"sun":"leo"}}"#).unwrap();

        let req = read_request(&request_args(file.path().to_str().unwrap())).unwrap();
        assert_eq!(req.user_id, "u1");
        assert_eq!(req.language.as_deref(), Some("fr"));
        assert_eq!(req.input["sun"], "leo");
    }

    #[test]
    fn test_read_request_rejects_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = read_request(&request_args(file.path().to_str().unwrap())).unwrap_err();
        assert!(matches!(err, ReportError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_status_works_without_provider_credentials() {
        let mut config = Config::builder().cache_backend("memory").build().unwrap();
        config.llm.anthropic = Some(crate::config::AnthropicConfig {
            api_key_env: Some("RG_TEST_UNSET_KEY".to_string()),
            model: Some("m".to_string()),
            ..Default::default()
        });

        assert!(build_orchestrator(&config, true).is_err());

        let orchestrator = build_orchestrator(&config, false).unwrap();
        let req = ReportRequest::new("u1", "compatibility", json!({"sun": "leo"}));
        let status = orchestrator.status(&req).await.unwrap();
        assert!(!status.exists);
        assert!(status.status.is_none());
    }
}
