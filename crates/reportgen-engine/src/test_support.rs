//! Test doubles for the generation engine
//!
//! Available to this crate's unit tests and, through the `test-utils` feature,
//! to integration tests in dependent crates.

use async_trait::async_trait;
use reportgen_llm::{LlmBackend, LlmError, LlmInvocation, LlmResult};
use reportgen_utils::error::{ReportError, StoreError};
use reportgen_utils::{KvStore, MemoryStore};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::adapter::GenerationContext;
use crate::summary::ContextSummarizer;

/// Backend whose behavior is scripted per module id.
///
/// Successful output is `"<module_id> content"`.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    failing: Mutex<HashSet<String>>,
    panicking: HashSet<String>,
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl ScriptedBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call for this module until [`set_failing`](Self::set_failing) clears it
    #[must_use]
    pub fn failing(self, module_id: &str) -> Self {
        self.set_failing(module_id, true);
        self
    }

    #[must_use]
    pub fn panicking(mut self, module_id: &str) -> Self {
        self.panicking.insert(module_id.to_string());
        self
    }

    #[must_use]
    pub fn with_delay(mut self, module_id: &str, delay: Duration) -> Self {
        self.delays.insert(module_id.to_string(), delay);
        self
    }

    #[must_use]
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn set_failing(&self, module_id: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        if failing {
            set.insert(module_id.to_string());
        } else {
            set.remove(module_id);
        }
    }

    #[must_use]
    pub fn calls_for(&self, module_id: &str) -> usize {
        let calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.get(module_id).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn content_for(module_id: &str) -> String {
        format!("{module_id} content")
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError> {
        {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            *calls.entry(inv.module_id.clone()).or_default() += 1;
        }
        self.total.fetch_add(1, Ordering::SeqCst);

        let delay = self
            .delays
            .get(&inv.module_id)
            .copied()
            .unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        assert!(
            !self.panicking.contains(&inv.module_id),
            "scripted panic for {}",
            inv.module_id
        );

        let failing = self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&inv.module_id);
        if failing {
            return Err(LlmError::ProviderUnavailable(format!(
                "scripted outage for {}",
                inv.module_id
            )));
        }

        Ok(LlmResult::new(
            Self::content_for(&inv.module_id),
            "scripted",
            "scripted-model",
        ))
    }
}

/// Key/value store that is always unreachable
#[derive(Debug, Default)]
pub struct FailingStore;

#[async_trait]
impl KvStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// In-memory store that can be taken down and brought back mid-test
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    down: AtomicBool,
}

impl FlakyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection reset".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.delete(key).await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

/// In-memory store whose writes to keys under `prefix` take `delay` to land
#[derive(Debug)]
pub struct SlowStore {
    inner: MemoryStore,
    prefix: String,
    delay: Duration,
}

impl SlowStore {
    #[must_use]
    pub fn new(prefix: &str, delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            prefix: prefix.to_string(),
            delay,
        }
    }
}

#[async_trait]
impl KvStore for SlowStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        if key.starts_with(&self.prefix) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key).await
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

/// Summarizer returning a fixed value, or rejecting every input
#[derive(Debug, Clone)]
pub struct FixedSummarizer {
    summary: Option<Value>,
}

impl FixedSummarizer {
    #[must_use]
    pub fn new(summary: Value) -> Self {
        Self {
            summary: Some(summary),
        }
    }

    #[must_use]
    pub fn rejecting() -> Self {
        Self { summary: None }
    }
}

#[async_trait]
impl ContextSummarizer for FixedSummarizer {
    async fn summarize(&self, report_type: &str, _input: &Value) -> Result<Value, ReportError> {
        self.summary.clone().ok_or_else(|| {
            ReportError::InvalidInput(format!("cannot summarize input for '{report_type}'"))
        })
    }
}

/// Generation context for a personal-profile task with a small summary
#[must_use]
pub fn test_context(task_id: &str, language: &str) -> GenerationContext {
    GenerationContext {
        task_id: task_id.to_string(),
        user_id: "user-1".to_string(),
        report_type: "personal-profile".to_string(),
        report_title: "Personal Profile".to_string(),
        fingerprint: "ab".repeat(32),
        language: language.to_string(),
        summary_json: r#"{"moon":"pisces","sun":"leo"}"#.to_string(),
    }
}
