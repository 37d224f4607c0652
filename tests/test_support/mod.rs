//! Shared helpers for integration tests
//!
//! Each test builds its own orchestrator over an in-memory cache so tests stay
//! isolated without touching the filesystem.

#![allow(dead_code)]

use reportgen::engine::test_support::{FixedSummarizer, ScriptedBackend};
use reportgen::{
    ContentCache, OrchestratorSettings, PassthroughSummarizer, ReportOrchestrator, ReportRegistry,
    ReportRequest,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub const PROFILE_MODULES: [&str; 5] = ["overview", "personality", "career", "relationships", "growth"];

/// Settings with timers far beyond any test duration
pub fn quiet_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        heartbeat_interval: Duration::from_secs(3600),
        stream_timeout: Duration::from_secs(3600),
        ..OrchestratorSettings::default()
    }
}

pub fn orchestrator(backend: Arc<ScriptedBackend>) -> ReportOrchestrator {
    orchestrator_with(backend, ContentCache::in_memory(), quiet_settings())
}

pub fn orchestrator_with(
    backend: Arc<ScriptedBackend>,
    cache: ContentCache,
    settings: OrchestratorSettings,
) -> ReportOrchestrator {
    ReportOrchestrator::new(
        ReportRegistry::builtin(),
        Arc::new(PassthroughSummarizer),
        backend,
        cache,
        settings,
    )
}

pub fn rejecting_orchestrator(backend: Arc<ScriptedBackend>) -> ReportOrchestrator {
    ReportOrchestrator::new(
        ReportRegistry::builtin(),
        Arc::new(FixedSummarizer::rejecting()),
        backend,
        ContentCache::in_memory(),
        quiet_settings(),
    )
}

/// A personal-profile request for `user`
pub fn profile_request(user: &str) -> ReportRequest {
    ReportRequest::new(
        user,
        "personal-profile",
        json!({ "sun": "leo", "moon": "pisces", "rising": "virgo" }),
    )
}
