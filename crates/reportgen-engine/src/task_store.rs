//! Report task store
//!
//! Persists each task record as one serialized value in the content cache.
//! Every read-modify-write on a record holds that task's lock, so modules
//! completing at the same moment never lose each other's updates.

use reportgen_utils::ContentCache;
use reportgen_utils::error::ReportError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use crate::types::{ModuleResult, ReportTask, TaskKey, TaskStatus};

const TASK_KEY_PREFIX: &str = "report_task:";

type TaskLock = Arc<tokio::sync::Mutex<()>>;

pub struct TaskStore {
    cache: ContentCache,
    ttl: Duration,
    locks: Mutex<HashMap<String, TaskLock>>,
}

impl TaskStore {
    pub fn new(cache: ContentCache, ttl: Duration) -> Self {
        Self {
            cache,
            ttl,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn record_key(task_id: &str) -> String {
        format!("{TASK_KEY_PREFIX}{task_id}")
    }

    fn lock_for(&self, task_id: &str) -> TaskLock {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(task_id.to_string()).or_default())
    }

    /// Drop the lock entry once no other caller holds or awaits it
    fn release(&self, task_id: &str, lock: TaskLock) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one held here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(task_id);
        }
    }

    async fn load(&self, task_id: &str) -> Result<Option<ReportTask>, ReportError> {
        Ok(self.cache.get_json(&Self::record_key(task_id)).await?)
    }

    async fn save(&self, task: &ReportTask) -> Result<(), ReportError> {
        self.cache
            .set_json(&Self::record_key(&task.task_id), task, Some(self.ttl))
            .await?;
        Ok(())
    }

    /// Run `f` against the record while holding the task's lock, then persist it.
    ///
    /// `f` returns whether it changed the record; unchanged records are not
    /// rewritten.
    async fn mutate<F>(&self, task_id: &str, f: F) -> Result<ReportTask, ReportError>
    where
        F: FnOnce(&mut ReportTask) -> bool + Send,
    {
        let lock = self.lock_for(task_id);
        let result = {
            let _guard = lock.lock().await;
            self.mutate_locked(task_id, f).await
        };
        self.release(task_id, lock);
        result
    }

    /// Body of `mutate`; the caller holds the task's lock
    async fn mutate_locked<F>(&self, task_id: &str, f: F) -> Result<ReportTask, ReportError>
    where
        F: FnOnce(&mut ReportTask) -> bool + Send,
    {
        let mut task = self
            .load(task_id)
            .await?
            .ok_or_else(|| ReportError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        if f(&mut task) {
            self.save(&task).await?;
        }
        Ok(task)
    }

    /// Body of `create_if_absent`; the caller holds the task's lock
    async fn insert_locked(
        &self,
        task_id: &str,
        key: &TaskKey,
        module_ids: Vec<String>,
    ) -> Result<(ReportTask, bool), ReportError> {
        if let Some(existing) = self.load(task_id).await? {
            return Ok((existing, false));
        }
        let task = ReportTask::new(task_id.to_string(), key, module_ids);
        self.save(&task).await?;
        info!(task_id = %task_id, report_type = %key.report_type, "Created report task");
        Ok((task, true))
    }

    pub async fn get(&self, key: &TaskKey) -> Result<Option<ReportTask>, ReportError> {
        self.get_by_id(&key.task_id()?).await
    }

    pub async fn get_by_id(&self, task_id: &str) -> Result<Option<ReportTask>, ReportError> {
        self.load(task_id).await
    }

    /// Return the existing task for `key`, or create a pending one.
    ///
    /// Exactly one of any number of concurrent callers observes `is_new = true`.
    pub async fn create_if_absent(
        &self,
        key: &TaskKey,
        module_ids: Vec<String>,
    ) -> Result<(ReportTask, bool), ReportError> {
        let task_id = key.task_id()?;
        let lock = self.lock_for(&task_id);
        let result = {
            let _guard = lock.lock().await;
            self.insert_locked(&task_id, key, module_ids).await
        };
        self.release(&task_id, lock);
        result
    }

    /// Enter `processing` unless the task is already processing.
    ///
    /// Returns the record and whether this call made the transition; only the
    /// caller that made it should start a generation run.
    pub async fn mark_processing(&self, task_id: &str) -> Result<(ReportTask, bool), ReportError> {
        let mut transitioned = false;
        let task = self
            .mutate(task_id, |task| {
                if task.status == TaskStatus::Processing {
                    return false;
                }
                task.status = TaskStatus::Processing;
                task.completed_at = None;
                task.updated_at = chrono::Utc::now();
                transitioned = true;
                true
            })
            .await?;
        Ok((task, transitioned))
    }

    /// Move a `failed` task back to `processing`.
    ///
    /// Returns the record and whether the transition happened.
    pub async fn begin_retry(&self, task_id: &str) -> Result<(ReportTask, bool), ReportError> {
        let mut transitioned = false;
        let task = self
            .mutate(task_id, |task| {
                if task.status != TaskStatus::Failed {
                    return false;
                }
                task.status = TaskStatus::Processing;
                task.completed_at = None;
                task.last_error = None;
                task.updated_at = chrono::Utc::now();
                transitioned = true;
                true
            })
            .await?;
        Ok((task, transitioned))
    }

    pub async fn append_module_result(
        &self,
        task_id: &str,
        result: &ModuleResult,
    ) -> Result<ReportTask, ReportError> {
        let task = self.mutate(task_id, |task| task.apply_result(result)).await?;
        debug!(
            task_id = %task_id,
            module_id = %result.module_id,
            success = result.is_success(),
            progress = task.progress,
            "Recorded module result"
        );
        Ok(task)
    }

    /// Resolve `completed`/`failed` from the recorded module sets
    pub async fn mark_terminal(&self, task_id: &str) -> Result<ReportTask, ReportError> {
        let task = self
            .mutate(task_id, |task| {
                task.finalize();
                true
            })
            .await?;
        info!(
            task_id = %task_id,
            status = %task.status,
            completed = task.completed_module_ids.len(),
            failed = task.failed_module_ids.len(),
            "Report task settled"
        );
        Ok(task)
    }

    /// Record a task-level failure and mark the task failed
    pub async fn record_failure(&self, task_id: &str, message: &str) -> Result<ReportTask, ReportError> {
        self.mutate(task_id, |task| {
            task.last_error = Some(message.to_string());
            task.status = TaskStatus::Failed;
            let now = chrono::Utc::now();
            task.completed_at = Some(now);
            task.updated_at = now;
            true
        })
        .await
    }

    pub async fn delete(&self, task_id: &str) -> Result<bool, ReportError> {
        let lock = self.lock_for(task_id);
        let result = {
            let _guard = lock.lock().await;
            self.cache.delete(&Self::record_key(task_id)).await
        };
        self.release(task_id, lock);
        Ok(result?)
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
