//! Module generator adapter
//!
//! Wraps the text-generation backend for a single module: builds the prompt,
//! enforces the per-call timeout, measures duration on both paths and writes
//! successful output to the content cache.

use chrono::{DateTime, Utc};
use reportgen_config::{Config, StreamMode};
use reportgen_llm::{LlmBackend, LlmError, LlmInvocation, Message};
use reportgen_utils::ContentCache;
use reportgen_utils::logging::{
    log_module_complete, log_module_error, log_module_start, redact_error_message,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::registry::ModuleMeta;
use crate::supervisor::Supervisor;
use crate::types::ModuleResult;

/// Everything a module prompt needs about the task it belongs to
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub task_id: String,
    pub user_id: String,
    pub report_type: String,
    pub report_title: String,
    pub fingerprint: String,
    pub language: String,
    /// Canonical JSON of the summary
    pub summary_json: String,
}

/// How a successful module's cache write is performed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheWriteMode {
    /// Spawned as a supervised background job
    Deferred,
    /// Awaited before the result is reported
    Synchronous,
}

impl From<StreamMode> for CacheWriteMode {
    fn from(mode: StreamMode) -> Self {
        match mode {
            StreamMode::Standard => Self::Deferred,
            StreamMode::Lite => Self::Synchronous,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub module_timeout: Duration,
    pub max_tokens: u32,
    pub module_ttl: Duration,
    /// Empty selects the backend's configured model
    pub model: String,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            module_timeout: Duration::from_secs(reportgen_config::DEFAULT_MODULE_TIMEOUT_SECS),
            max_tokens: reportgen_config::DEFAULT_MAX_TOKENS,
            module_ttl: Duration::from_secs(reportgen_config::DEFAULT_MODULE_TTL_DAYS * 24 * 3600),
            model: String::new(),
        }
    }
}

impl GenerationSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            module_timeout: config.module_timeout(),
            max_tokens: config.max_tokens(),
            module_ttl: config.module_ttl(),
            model: String::new(),
        }
    }
}

/// Content cache entry for one module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedModule {
    pub content: String,
    pub provider: String,
    pub model: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub content: String,
    pub duration_ms: u64,
}

/// A failed generation call, already redacted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationError {
    pub module_id: String,
    pub message: String,
    pub duration_ms: u64,
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module '{}' failed: {}", self.module_id, self.message)
    }
}

impl std::error::Error for GenerationError {}

/// Cache key for a module's content
#[must_use]
pub fn module_cache_key(user_id: &str, language: &str, module_id: &str, fingerprint: &str) -> String {
    format!("module:{user_id}:{language}:{module_id}:{fingerprint}")
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

pub struct ModuleGenerator {
    backend: Arc<dyn LlmBackend>,
    cache: ContentCache,
    supervisor: Supervisor,
    settings: GenerationSettings,
}

impl ModuleGenerator {
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        cache: ContentCache,
        supervisor: Supervisor,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            backend,
            cache,
            supervisor,
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    #[must_use]
    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    fn cache_key(ctx: &GenerationContext, module_id: &str) -> String {
        module_cache_key(&ctx.user_id, &ctx.language, module_id, &ctx.fingerprint)
    }

    /// Previously generated content for this module, if cached.
    ///
    /// Store failures are treated as a miss.
    pub async fn lookup(&self, ctx: &GenerationContext, module_id: &str) -> Option<String> {
        let key = Self::cache_key(ctx, module_id);
        match self.cache.get_json::<CachedModule>(&key).await {
            Ok(entry) => entry.map(|e| e.content),
            Err(e) => {
                warn!(key = %key, error = %e, "Module cache lookup failed, treating as miss");
                None
            }
        }
    }

    pub(crate) fn build_messages(ctx: &GenerationContext, module: &ModuleMeta) -> Vec<Message> {
        let system = format!(
            "You are writing the \"{label}\" section of a {title} report.\n\
             Write the section in the language with code '{language}'.\n\
             Base every statement on the context data provided and do not invent facts.\n\
             Return only the section text.",
            label = module.label,
            title = ctx.report_title,
            language = ctx.language,
        );
        let user = format!("Context data (canonical JSON):\n{}", ctx.summary_json);
        vec![Message::system(system), Message::user(user)]
    }

    /// Call the backend for one module.
    ///
    /// # Errors
    ///
    /// Returns a `GenerationError` with a redacted, human-readable reason when the
    /// provider fails or the call exceeds the module timeout.
    pub async fn generate(
        &self,
        ctx: &GenerationContext,
        module: &ModuleMeta,
        write_mode: CacheWriteMode,
    ) -> Result<Generated, GenerationError> {
        let start = Instant::now();
        let timeout = self.settings.module_timeout;
        let invocation = LlmInvocation::new(
            &ctx.report_type,
            &module.id,
            &self.settings.model,
            timeout,
            Self::build_messages(ctx, module),
        )
        .with_metadata("max_tokens", serde_json::json!(self.settings.max_tokens));

        let outcome = match tokio::time::timeout(timeout, self.backend.invoke(invocation)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout { duration: timeout }),
        };

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                return Err(GenerationError {
                    module_id: module.id.clone(),
                    message: redact_error_message(&e.to_string()),
                    duration_ms: elapsed_ms(start),
                });
            }
        };

        let entry = CachedModule {
            content: result.raw_response,
            provider: result.provider,
            model: result.model_used,
            generated_at: Utc::now(),
        };
        let content = entry.content.clone();
        self.write_cache(Self::cache_key(ctx, &module.id), entry, write_mode)
            .await;

        Ok(Generated {
            content,
            duration_ms: elapsed_ms(start),
        })
    }

    async fn write_cache(&self, key: String, entry: CachedModule, mode: CacheWriteMode) {
        let ttl = Some(self.settings.module_ttl);
        match mode {
            CacheWriteMode::Synchronous => {
                if let Err(e) = self.cache.set_json(&key, &entry, ttl).await {
                    warn!(key = %key, error = %e, "Module cache write failed");
                }
            }
            CacheWriteMode::Deferred => {
                let cache = self.cache.clone();
                self.supervisor.spawn("module-cache-write", async move {
                    if let Err(e) = cache.set_json(&key, &entry, ttl).await {
                        warn!(key = %key, error = %e, "Deferred module cache write failed");
                    }
                    Ok(())
                });
            }
        }
    }

    /// Resolve one module: cache first, then the backend. Never fails.
    pub async fn run_module(
        &self,
        ctx: &GenerationContext,
        module: &ModuleMeta,
        write_mode: CacheWriteMode,
    ) -> ModuleResult {
        let start = Instant::now();
        if let Some(content) = self.lookup(ctx, &module.id).await {
            let duration_ms = elapsed_ms(start);
            debug!(task_id = %ctx.task_id, module_id = %module.id, "Module served from cache");
            log_module_complete(&ctx.task_id, &module.id, true, u128::from(duration_ms));
            return ModuleResult::success(&module.id, content, true, duration_ms);
        }

        log_module_start(&ctx.task_id, &module.id);
        match self.generate(ctx, module, write_mode).await {
            Ok(generated) => {
                log_module_complete(
                    &ctx.task_id,
                    &module.id,
                    false,
                    u128::from(generated.duration_ms),
                );
                ModuleResult::success(&module.id, generated.content, false, generated.duration_ms)
            }
            Err(e) => {
                log_module_error(&ctx.task_id, &module.id, &e.message, u128::from(e.duration_ms));
                ModuleResult::failure(&module.id, e.message, e.duration_ms)
            }
        }
    }
}
