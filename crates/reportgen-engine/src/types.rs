//! Task record and request/response types

use chrono::{DateTime, Utc};
use reportgen_utils::Fingerprinter;
use reportgen_utils::error::ReportError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::registry::ModuleMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A caller request. The summary, fingerprint and task key are derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub user_id: String,
    pub report_type: String,
    pub input: Value,
    /// Falls back to the configured default language
    #[serde(default)]
    pub language: Option<String>,
}

impl ReportRequest {
    pub fn new(user_id: impl Into<String>, report_type: impl Into<String>, input: Value) -> Self {
        Self {
            user_id: user_id.into(),
            report_type: report_type.into(),
            input,
            language: None,
        }
    }

    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Identity of a task record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskKey {
    pub user_id: String,
    pub report_type: String,
    pub fingerprint: String,
    pub language: String,
}

impl TaskKey {
    /// Content-addressed task identifier for this key.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::Serialization` if the key cannot be canonicalized.
    pub fn task_id(&self) -> Result<String, ReportError> {
        Fingerprinter::new().task_id(
            &self.user_id,
            &self.report_type,
            &self.fingerprint,
            &self.language,
        )
    }
}

/// Outcome of one module's generation attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleResult {
    pub module_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Served from the content cache without a provider call
    pub cached: bool,
    pub duration_ms: u64,
}

impl ModuleResult {
    pub fn success(module_id: impl Into<String>, content: String, cached: bool, duration_ms: u64) -> Self {
        Self {
            module_id: module_id.into(),
            content: Some(content),
            error: None,
            cached,
            duration_ms,
        }
    }

    pub fn failure(module_id: impl Into<String>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            module_id: module_id.into(),
            content: None,
            error: Some(error.into()),
            cached: false,
            duration_ms,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.content.is_some()
    }
}

/// Persistent task record
///
/// Invariants maintained by [`ReportTask::apply_result`]:
/// - `completed_module_ids` and `failed_module_ids` are disjoint subsets of `module_ids`
/// - `module_content` has an entry exactly for each completed module,
///   `module_errors` exactly for each failed module
/// - `progress` never decreases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTask {
    pub task_id: String,
    pub user_id: String,
    pub report_type: String,
    pub content_fingerprint: String,
    pub language: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub module_ids: Vec<String>,
    pub completed_module_ids: Vec<String>,
    pub failed_module_ids: Vec<String>,
    pub module_content: BTreeMap<String, String>,
    pub module_errors: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl ReportTask {
    pub fn new(task_id: String, key: &TaskKey, module_ids: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            user_id: key.user_id.clone(),
            report_type: key.report_type.clone(),
            content_fingerprint: key.fingerprint.clone(),
            language: key.language.clone(),
            status: TaskStatus::Pending,
            progress: 0,
            module_ids,
            completed_module_ids: Vec::new(),
            failed_module_ids: Vec::new(),
            module_content: BTreeMap::new(),
            module_errors: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            last_error: None,
        }
    }

    #[must_use]
    pub fn total_modules(&self) -> usize {
        self.module_ids.len()
    }

    #[must_use]
    pub fn is_completed(&self, module_id: &str) -> bool {
        self.completed_module_ids.iter().any(|id| id == module_id)
    }

    #[must_use]
    pub fn is_failed(&self, module_id: &str) -> bool {
        self.failed_module_ids.iter().any(|id| id == module_id)
    }

    /// Module ids that have no successful result yet, in registry order
    #[must_use]
    pub fn outstanding_module_ids(&self) -> Vec<String> {
        self.module_ids
            .iter()
            .filter(|id| !self.is_completed(id))
            .cloned()
            .collect()
    }

    /// Record a module outcome.
    ///
    /// A success moves a module out of the failed set; a completed module is never
    /// revoked. Results for module ids outside the task are ignored. Returns whether
    /// the record changed.
    pub fn apply_result(&mut self, result: &ModuleResult) -> bool {
        let id = result.module_id.as_str();
        if !self.module_ids.iter().any(|m| m == id) || self.is_completed(id) {
            return false;
        }

        match (&result.content, &result.error) {
            (Some(content), _) => {
                self.failed_module_ids.retain(|m| m != id);
                self.module_errors.remove(id);
                self.completed_module_ids.push(id.to_string());
                self.module_content.insert(id.to_string(), content.clone());
            }
            (None, error) => {
                if !self.is_failed(id) {
                    self.failed_module_ids.push(id.to_string());
                }
                let message = error.clone().unwrap_or_else(|| "unknown error".to_string());
                self.module_errors.insert(id.to_string(), message);
            }
        }

        self.recompute_progress();
        self.updated_at = Utc::now();
        true
    }

    fn recompute_progress(&mut self) {
        let total = self.total_modules();
        let settled = self.completed_module_ids.len() + self.failed_module_ids.len();
        let percent = if total == 0 { 100 } else { settled * 100 / total };
        // Settled modules only ever accumulate
        self.progress = self.progress.max(u8::try_from(percent.min(100)).unwrap_or(100));
    }

    /// Resolve the terminal status from the module sets
    pub fn finalize(&mut self) {
        let all_completed = self.completed_module_ids.len() == self.total_modules();
        self.status = if all_completed && self.failed_module_ids.is_empty() {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        let now = Utc::now();
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            exists: true,
            task_id: Some(self.task_id.clone()),
            status: Some(self.status),
            progress: self.progress,
            completed_module_ids: self.completed_module_ids.clone(),
            failed_module_ids: self.failed_module_ids.clone(),
            total_modules: self.total_modules(),
            created_at: Some(self.created_at),
            completed_at: self.completed_at,
            error: self.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub is_new: bool,
    pub estimated_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub exists: bool,
    pub task_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub progress: u8,
    pub completed_module_ids: Vec<String>,
    pub failed_module_ids: Vec<String>,
    pub total_modules: usize,
    pub created_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl StatusSnapshot {
    #[must_use]
    pub fn missing() -> Self {
        Self {
            exists: false,
            task_id: None,
            status: None,
            progress: 0,
            completed_module_ids: Vec::new(),
            failed_module_ids: Vec::new(),
            total_modules: 0,
            created_at: None,
            completed_at: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMeta {
    pub report_type: String,
    pub title: String,
    pub language: String,
    pub fingerprint: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub modules: Vec<ModuleMeta>,
    pub failed_module_ids: Vec<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportContent {
    pub task_id: String,
    /// Completed modules only
    pub modules: BTreeMap<String, String>,
    pub meta: ReportMeta,
    pub completed_module_ids: Vec<String>,
    pub total_modules: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ContentResponse {
    Ready(ReportContent),
    /// No task exists, or no module has completed yet
    NotReady { status: Option<TaskStatus> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum RetryOutcome {
    /// Failed modules were relaunched
    Retrying(StatusSnapshot),
    /// The task is not in the failed state; nothing was launched
    Rejected {
        reason: String,
        snapshot: StatusSnapshot,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn task(modules: &[&str]) -> ReportTask {
        let key = TaskKey {
            user_id: "u1".to_string(),
            report_type: "personal-profile".to_string(),
            fingerprint: "f".repeat(64),
            language: "en".to_string(),
        };
        ReportTask::new(
            "task_1".to_string(),
            &key,
            modules.iter().map(|m| (*m).to_string()).collect(),
        )
    }

    #[test]
    fn test_partial_completion_progress_and_status() {
        let mut t = task(&["a", "b", "c", "d", "e"]);
        t.apply_result(&ModuleResult::success("a", "A".into(), false, 1));
        t.apply_result(&ModuleResult::success("b", "B".into(), false, 1));
        t.apply_result(&ModuleResult::failure("c", "timeout", 1));
        assert_eq!(t.progress, 60);

        t.apply_result(&ModuleResult::success("d", "D".into(), false, 1));
        t.apply_result(&ModuleResult::failure("e", "503", 1));
        assert_eq!(t.progress, 100);

        t.finalize();
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.module_content.len(), 3);
        assert_eq!(t.module_errors.len(), 2);
        assert!(t.completed_at.is_some());
    }

    #[test]
    fn test_success_clears_failure_and_completes() {
        let mut t = task(&["a", "b"]);
        t.apply_result(&ModuleResult::success("a", "A".into(), false, 1));
        t.apply_result(&ModuleResult::failure("b", "boom", 1));
        t.finalize();
        assert_eq!(t.status, TaskStatus::Failed);

        assert!(t.apply_result(&ModuleResult::success("b", "B".into(), false, 1)));
        assert!(t.failed_module_ids.is_empty());
        assert!(!t.module_errors.contains_key("b"));
        t.finalize();
        assert_eq!(t.status, TaskStatus::Completed);
    }

    #[test]
    fn test_completed_module_is_never_revoked() {
        let mut t = task(&["a"]);
        t.apply_result(&ModuleResult::success("a", "first".into(), false, 1));
        assert!(!t.apply_result(&ModuleResult::failure("a", "late failure", 1)));
        assert!(!t.apply_result(&ModuleResult::success("a", "second".into(), true, 1)));
        assert_eq!(t.module_content["a"], "first");
        assert!(t.failed_module_ids.is_empty());
    }

    #[test]
    fn test_unknown_module_is_ignored() {
        let mut t = task(&["a"]);
        assert!(!t.apply_result(&ModuleResult::success("zzz", "x".into(), false, 1)));
        assert_eq!(t.progress, 0);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Processing).unwrap(),
            "\"processing\""
        );
    }

    fn outcome() -> impl Strategy<Value = (usize, bool)> {
        (0usize..6, any::<bool>())
    }

    proptest! {
        #[test]
        fn prop_invariants_hold_under_any_result_sequence(
            outcomes in proptest::collection::vec(outcome(), 0..40)
        ) {
            let ids = ["m0", "m1", "m2", "m3", "m4", "m5"];
            let mut t = task(&ids);
            let mut last_progress = 0;

            for (idx, ok) in outcomes {
                let id = ids[idx];
                let result = if ok {
                    ModuleResult::success(id, format!("content {id}"), false, 1)
                } else {
                    ModuleResult::failure(id, "err", 1)
                };
                t.apply_result(&result);

                prop_assert!(t.progress >= last_progress);
                last_progress = t.progress;

                for c in &t.completed_module_ids {
                    prop_assert!(!t.failed_module_ids.contains(c));
                    prop_assert!(t.module_content.contains_key(c));
                }
                for f in &t.failed_module_ids {
                    prop_assert!(t.module_errors.contains_key(f));
                }
                prop_assert_eq!(t.module_content.len(), t.completed_module_ids.len());
                prop_assert_eq!(t.module_errors.len(), t.failed_module_ids.len());
            }

            t.finalize();
            let expect_completed = t.completed_module_ids.len() == ids.len();
            prop_assert_eq!(t.status == TaskStatus::Completed, expect_completed);
        }
    }
}
