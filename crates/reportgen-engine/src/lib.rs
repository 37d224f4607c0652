//! Report generation engine
//!
//! Coordinates multi-module reports: each module is filled by an independent,
//! slow and unreliable text-generation call keyed off a fingerprint of the
//! request's summarized input. Identical requests share one task, modules run
//! concurrently and fail independently, failed modules can be retried alone,
//! and finished modules are cached for reuse.

pub mod adapter;
pub mod orchestrator;
pub mod parallel;
pub mod registry;
pub mod streaming;
pub mod summary;
pub mod supervisor;
pub mod task_store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;
pub mod types;

pub use adapter::{
    CacheWriteMode, CachedModule, GenerationContext, GenerationError, GenerationSettings,
    ModuleGenerator, module_cache_key,
};
pub use orchestrator::{OrchestratorSettings, ReportOrchestrator};
pub use parallel::{ModuleCompletionHook, ParallelEngine};
pub use registry::{ModuleMeta, ReportRegistry, ReportTypeConfig};
pub use streaming::{ReportStream, StreamEvent};
pub use summary::{ContextSummarizer, PassthroughSummarizer};
pub use supervisor::Supervisor;
pub use task_store::TaskStore;
pub use types::{
    ContentResponse, CreateResponse, ModuleResult, ReportContent, ReportMeta, ReportRequest,
    ReportTask, RetryOutcome, StatusSnapshot, TaskKey, TaskStatus,
};
