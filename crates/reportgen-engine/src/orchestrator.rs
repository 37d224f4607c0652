//! Task orchestrator
//!
//! Owns the task lifecycle: `pending -> processing -> {completed, failed}` and
//! `failed -> processing` on retry. Creation is idempotent per task key and
//! launches generation as a supervised background job; callers observe
//! progress by polling [`status`](ReportOrchestrator::status) and
//! [`content`](ReportOrchestrator::content) or by opening a stream.

use async_trait::async_trait;
use reportgen_config::{Config, StreamMode};
use reportgen_llm::LlmBackend;
use reportgen_utils::canonicalization::emit_jcs;
use reportgen_utils::error::{ConfigError, ReportError};
use reportgen_utils::logging::{log_cache_stats, redact_error_message, task_span};
use reportgen_utils::{ContentCache, FileStore, Fingerprinter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{Instrument, info, warn};

use crate::adapter::{CacheWriteMode, GenerationContext, GenerationSettings, ModuleGenerator};
use crate::parallel::{ModuleCompletionHook, ParallelEngine};
use crate::registry::{ModuleMeta, ReportRegistry, ReportTypeConfig};
use crate::summary::ContextSummarizer;
use crate::supervisor::Supervisor;
use crate::task_store::TaskStore;
use crate::types::{
    ContentResponse, CreateResponse, ModuleResult, ReportContent, ReportMeta, ReportRequest,
    ReportTask, RetryOutcome, StatusSnapshot, TaskKey,
};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub generation: GenerationSettings,
    pub task_ttl: Duration,
    pub default_language: String,
    pub heartbeat_interval: Duration,
    pub stream_timeout: Duration,
    pub stream_mode: StreamMode,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            generation: GenerationSettings::default(),
            task_ttl: Duration::from_secs(reportgen_config::DEFAULT_TASK_TTL_HOURS * 3600),
            default_language: reportgen_config::DEFAULT_LANGUAGE.to_string(),
            heartbeat_interval: Duration::from_secs(reportgen_config::DEFAULT_HEARTBEAT_SECS),
            stream_timeout: Duration::from_secs(reportgen_config::DEFAULT_STREAM_TIMEOUT_SECS),
            stream_mode: StreamMode::default(),
        }
    }
}

impl OrchestratorSettings {
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for an unknown stream mode.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            generation: GenerationSettings::from_config(config),
            task_ttl: config.task_ttl(),
            default_language: config.language().to_string(),
            heartbeat_interval: config.heartbeat_interval(),
            stream_timeout: config.stream_timeout(),
            stream_mode: config.stream_mode()?,
        })
    }
}

/// A request resolved against the registry and summarizer
pub(crate) struct Resolved {
    pub config: ReportTypeConfig,
    pub key: TaskKey,
    pub ctx: Arc<GenerationContext>,
}

pub(crate) struct Inner {
    pub registry: ReportRegistry,
    pub summarizer: Arc<dyn ContextSummarizer>,
    pub store: TaskStore,
    pub engine: ParallelEngine,
    pub supervisor: Supervisor,
    pub cache: ContentCache,
    pub settings: OrchestratorSettings,
}

/// Entry point for creating, inspecting and retrying reports. Cheap to clone.
#[derive(Clone)]
pub struct ReportOrchestrator {
    pub(crate) inner: Arc<Inner>,
}

impl ReportOrchestrator {
    pub fn new(
        registry: ReportRegistry,
        summarizer: Arc<dyn ContextSummarizer>,
        backend: Arc<dyn LlmBackend>,
        cache: ContentCache,
        settings: OrchestratorSettings,
    ) -> Self {
        let supervisor = Supervisor::new();
        let generator = Arc::new(ModuleGenerator::new(
            backend,
            cache.clone(),
            supervisor.clone(),
            settings.generation.clone(),
        ));
        Self {
            inner: Arc::new(Inner {
                registry,
                summarizer,
                store: TaskStore::new(cache.clone(), settings.task_ttl),
                engine: ParallelEngine::new(generator),
                supervisor,
                cache,
                settings,
            }),
        }
    }

    /// Build an orchestrator from resolved configuration.
    ///
    /// The registry is the built-in set plus `[reports.*]` entries, and the
    /// content cache uses the configured backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache backend or stream mode is invalid, or the
    /// cache directory cannot be created.
    pub fn from_config(
        config: &Config,
        backend: Arc<dyn LlmBackend>,
        summarizer: Arc<dyn ContextSummarizer>,
    ) -> Result<Self, ReportError> {
        let cache = match config.cache_backend()? {
            reportgen_config::CacheBackendKind::File => {
                ContentCache::new(Arc::new(FileStore::open(config.cache_dir())?))
            }
            reportgen_config::CacheBackendKind::Memory => ContentCache::in_memory(),
        };
        let registry = ReportRegistry::builtin().with_overrides(&config.reports);
        let settings = OrchestratorSettings::from_config(config)?;
        Ok(Self::new(registry, summarizer, backend, cache, settings))
    }

    #[must_use]
    pub fn registry(&self) -> &ReportRegistry {
        &self.inner.registry
    }

    #[must_use]
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.inner.settings
    }

    #[must_use]
    pub fn cache(&self) -> &ContentCache {
        &self.inner.cache
    }

    #[must_use]
    pub fn supervisor(&self) -> &Supervisor {
        &self.inner.supervisor
    }

    /// Wait for every background generation job and deferred cache write
    pub async fn wait_idle(&self) {
        self.inner.supervisor.wait_idle().await;
        log_cache_stats(self.inner.cache.backend_name(), &self.inner.cache.stats());
    }

    /// Validate the request, summarize its input and derive the task key.
    pub(crate) async fn resolve(&self, req: &ReportRequest) -> Result<Resolved, ReportError> {
        if req.user_id.trim().is_empty() {
            return Err(ReportError::InvalidInput("user id must not be empty".to_string()));
        }
        let config = self.inner.registry.get(&req.report_type)?.clone();
        let language = req
            .language
            .clone()
            .unwrap_or_else(|| self.inner.settings.default_language.clone());
        if language.trim().is_empty() {
            return Err(ReportError::InvalidInput("language must not be empty".to_string()));
        }

        let summary = self
            .inner
            .summarizer
            .summarize(&req.report_type, &req.input)
            .await?;
        let fingerprint = Fingerprinter::new().hash(&summary)?;
        let summary_json =
            emit_jcs(&summary).map_err(|e| ReportError::Serialization(e.to_string()))?;

        let key = TaskKey {
            user_id: req.user_id.clone(),
            report_type: req.report_type.clone(),
            fingerprint,
            language,
        };
        let ctx = Arc::new(GenerationContext {
            task_id: key.task_id()?,
            user_id: key.user_id.clone(),
            report_type: key.report_type.clone(),
            report_title: config.title.clone(),
            fingerprint: key.fingerprint.clone(),
            language: key.language.clone(),
            summary_json,
        });
        Ok(Resolved { config, key, ctx })
    }

    /// Create the task for this request, or return the existing one.
    ///
    /// Only the call that creates the record and moves it to `processing`
    /// launches generation.
    ///
    /// # Errors
    ///
    /// Fails before any task exists for an unknown report type, input the
    /// summarizer rejects, or a summary that cannot be fingerprinted.
    pub async fn create(&self, req: &ReportRequest) -> Result<CreateResponse, ReportError> {
        let resolved = self.resolve(req).await?;
        let store = &self.inner.store;
        let (task, is_new) = store
            .create_if_absent(&resolved.key, resolved.config.module_ids())
            .await?;

        let task = if is_new {
            let (task, transitioned) = store.mark_processing(&task.task_id).await?;
            // A stream that attached in between may already have started the run
            if transitioned {
                let hook = StoreHook::new(self.clone(), &task.task_id);
                // Completion is observed through the store
                drop(self.spawn_generation(
                    Arc::clone(&resolved.ctx),
                    resolved.config.modules.clone(),
                    CacheWriteMode::Synchronous,
                    hook,
                ));
            }
            task
        } else {
            info!(task_id = %task.task_id, status = %task.status, "Reusing existing report task");
            task
        };

        Ok(CreateResponse {
            task_id: task.task_id,
            status: task.status,
            progress: task.progress,
            is_new,
            estimated_minutes: resolved.config.estimated_minutes,
        })
    }

    pub async fn status(&self, req: &ReportRequest) -> Result<StatusSnapshot, ReportError> {
        let resolved = self.resolve(req).await?;
        Ok(self
            .inner
            .store
            .get(&resolved.key)
            .await?
            .map_or_else(StatusSnapshot::missing, |task| task.snapshot()))
    }

    /// Completed module content plus report metadata.
    ///
    /// Partial content is a normal response; only a missing task or one with no
    /// completed module is reported as not ready.
    pub async fn content(&self, req: &ReportRequest) -> Result<ContentResponse, ReportError> {
        let resolved = self.resolve(req).await?;
        let Some(task) = self.inner.store.get(&resolved.key).await? else {
            return Ok(ContentResponse::NotReady { status: None });
        };
        if task.completed_module_ids.is_empty() {
            return Ok(ContentResponse::NotReady {
                status: Some(task.status),
            });
        }

        let meta = ReportMeta {
            report_type: task.report_type.clone(),
            title: resolved.config.title.clone(),
            language: task.language.clone(),
            fingerprint: task.content_fingerprint.clone(),
            status: task.status,
            progress: task.progress,
            modules: resolved.config.modules.clone(),
            failed_module_ids: task.failed_module_ids.clone(),
            completed_at: task.completed_at,
        };
        let total_modules = task.total_modules();
        Ok(ContentResponse::Ready(ReportContent {
            task_id: task.task_id,
            modules: task.module_content,
            meta,
            completed_module_ids: task.completed_module_ids,
            total_modules,
        }))
    }

    /// Relaunch generation for the modules of a failed task that have no result.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::TaskNotFound` if no task exists for the request.
    pub async fn retry(&self, req: &ReportRequest) -> Result<RetryOutcome, ReportError> {
        let resolved = self.resolve(req).await?;
        let task_id = resolved.ctx.task_id.clone();
        let store = &self.inner.store;

        let (task, transitioned) = store.begin_retry(&task_id).await?;
        if !transitioned {
            return Ok(RetryOutcome::Rejected {
                reason: format!("task is {}; only failed tasks can be retried", task.status),
                snapshot: task.snapshot(),
            });
        }

        let modules = modules_for(&resolved.config, &task.outstanding_module_ids());
        info!(
            task_id = %task_id,
            modules = ?task.outstanding_module_ids(),
            "Retrying failed modules"
        );
        let hook = StoreHook::new(self.clone(), &task_id);
        drop(self.spawn_generation(
            resolved.ctx,
            modules,
            CacheWriteMode::Synchronous,
            hook,
        ));
        Ok(RetryOutcome::Retrying(task.snapshot()))
    }

    /// Remove the task record. Cached module content is kept.
    pub async fn delete(&self, req: &ReportRequest) -> Result<bool, ReportError> {
        let resolved = self.resolve(req).await?;
        let deleted = self.inner.store.delete(&resolved.ctx.task_id).await?;
        if deleted {
            info!(task_id = %resolved.ctx.task_id, "Deleted report task");
        }
        Ok(deleted)
    }

    /// Launch a supervised generation run.
    ///
    /// The run appends every module result through `hook` and then settles the
    /// task. Run failures, including panics, are recorded on the task. The
    /// returned receiver yields the settled record or the recorded failure.
    pub(crate) fn spawn_generation<H>(
        &self,
        ctx: Arc<GenerationContext>,
        modules: Vec<ModuleMeta>,
        write_mode: CacheWriteMode,
        mut hook: H,
    ) -> oneshot::Receiver<Result<ReportTask, String>>
    where
        H: ModuleCompletionHook + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let task_id = ctx.task_id.clone();
        let span = task_span(&ctx.task_id, &ctx.report_type, &ctx.user_id);

        let runner = self.clone();
        let job = tokio::spawn(
            async move {
                runner
                    .inner
                    .engine
                    .run_all(Arc::clone(&ctx), modules, write_mode, Some(&mut hook))
                    .await;
                runner.inner.store.mark_terminal(&ctx.task_id).await
            }
            .instrument(span),
        );

        let this = self.clone();
        self.inner.supervisor.spawn("report-generation", async move {
            let failure = match job.await {
                Ok(Ok(task)) => {
                    // The receiver is gone when nobody is waiting on this run
                    let _ = done_tx.send(Ok(task));
                    return Ok(());
                }
                Ok(Err(e)) => redact_error_message(&e.to_string()),
                Err(e) => format!("generation job aborted: {e}"),
            };

            warn!(task_id = %task_id, error = %failure, "Generation run failed");
            if let Err(e) = this.inner.store.record_failure(&task_id, &failure).await {
                warn!(task_id = %task_id, error = %e, "Could not record generation failure");
            }
            let _ = done_tx.send(Err(failure));
            Ok(())
        });

        done_rx
    }
}

/// Registry metadata for `ids`, in registry order
pub(crate) fn modules_for(config: &ReportTypeConfig, ids: &[String]) -> Vec<ModuleMeta> {
    config
        .modules
        .iter()
        .filter(|m| ids.contains(&m.id))
        .cloned()
        .collect()
}

/// Appends each module result to the task record
pub(crate) struct StoreHook {
    orchestrator: ReportOrchestrator,
    task_id: String,
    /// Record after the most recent successful append
    pub latest: Option<ReportTask>,
}

impl StoreHook {
    pub(crate) fn new(orchestrator: ReportOrchestrator, task_id: &str) -> Self {
        Self {
            orchestrator,
            task_id: task_id.to_string(),
            latest: None,
        }
    }
}

#[async_trait]
impl ModuleCompletionHook for StoreHook {
    async fn on_module_settled(&mut self, result: &ModuleResult) {
        match self
            .orchestrator
            .inner
            .store
            .append_module_result(&self.task_id, result)
            .await
        {
            Ok(task) => self.latest = Some(task),
            Err(e) => {
                warn!(
                    task_id = %self.task_id,
                    module_id = %result.module_id,
                    error = %e,
                    "Could not record module result"
                );
                self.latest = None;
            }
        }
    }
}
