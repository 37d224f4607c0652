//! reportgen - asynchronous multi-module report generation
//!
//! A report is composed of independently generated modules. Each module is
//! filled by a slow, unreliable text-generation call keyed off a deterministic
//! fingerprint of the request's summarized input.
//!
//! reportgen can be used in two ways:
//! - **CLI**: `reportgen create|status|content|retry|delete|stream|types|config`
//! - **Library**: build a [`ReportOrchestrator`] and drive it from your own service
//!
//! # Quick Start (CLI)
//!
//! ```bash
//! # Create a report and wait for background generation to finish
//! reportgen create --user u1 --type personal-profile --input chart.json --wait
//!
//! # Poll
//! reportgen status --user u1 --type personal-profile --input chart.json
//! reportgen content --user u1 --type personal-profile --input chart.json
//!
//! # Stream events as JSON lines
//! reportgen stream --user u1 --type personal-profile --input chart.json --mode lite
//! ```
//!
//! # Quick Start (Library)
//!
//! ```rust,no_run
//! use reportgen::{
//!     Config, PassthroughSummarizer, ReportOrchestrator, ReportRequest,
//! };
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::builder().cache_backend("memory").build()?;
//! let backend = reportgen::llm::from_config(&config)?;
//! let orchestrator = ReportOrchestrator::from_config(
//!     &config,
//!     Arc::from(backend),
//!     Arc::new(PassthroughSummarizer),
//! )?;
//!
//! let request = ReportRequest::new("u1", "personal-profile", serde_json::json!({"sun": "leo"}));
//! let created = orchestrator.create(&request).await?;
//! orchestrator.wait_idle().await;
//! let content = orchestrator.content(&request).await?;
//! # let _ = (created, content);
//! # Ok(())
//! # }
//! ```
//!
//! # JSON Contracts
//!
//! CLI output is emitted in JCS (RFC 8785) canonical form. Use [`emit_jcs`] for
//! the same encoding in your own integrations.

// ============================================================================
// Stable Public API
// ============================================================================

/// Coordinates task creation, polling, retry and streaming.
pub use reportgen_engine::{OrchestratorSettings, ReportOrchestrator};

/// Request and response types.
pub use reportgen_engine::{
    ContentResponse, CreateResponse, ReportContent, ReportMeta, ReportRequest, RetryOutcome,
    StatusSnapshot, TaskStatus,
};

/// Streaming surface.
pub use reportgen_engine::{ReportStream, StreamEvent};

/// Registry of report types and their modules.
pub use reportgen_engine::{ModuleMeta, ReportRegistry, ReportTypeConfig};

/// Input summarization contract.
pub use reportgen_engine::{ContextSummarizer, PassthroughSummarizer};

/// Configuration with discovery and precedence: CLI > env > config file > defaults.
///
/// Use [`Config::discover()`] for CLI-like behavior or [`Config::builder()`] for
/// programmatic configuration.
pub use reportgen_config::{CliArgs, Config, ConfigBuilder, StreamMode};

/// Library error type.
///
/// Library code returns `ReportError` and never exits the process.
pub use reportgen_utils::error::{ErrorCategory, ReportError, UserFriendlyError};

/// Process exit codes. The numeric values are stable.
pub use reportgen_utils::exit_codes::ExitCode;

/// JCS (RFC 8785) canonical JSON emission.
pub use reportgen_utils::canonicalization::emit_jcs;

/// Content cache and key/value stores.
pub use reportgen_utils::{CacheStats, ContentCache, FileStore, KvStore, MemoryStore};

// ============================================================================
// Internal modules - accessible but not stable
// ============================================================================

#[doc(hidden)]
pub mod cli;

/// Returns the reportgen version
#[must_use]
pub fn reportgen_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(feature = "test-utils")]
#[doc(hidden)]
pub use reportgen_engine::test_support;

#[doc(hidden)]
pub use reportgen_config as config;

#[doc(hidden)]
pub use reportgen_engine as engine;

#[doc(hidden)]
pub use reportgen_llm as llm;

#[doc(hidden)]
pub use reportgen_utils::{atomic_write, cache, canonicalization, error, exit_codes, logging};
