//! Streaming delivery channel
//!
//! A push alternative to polling. Each stream is driven by a supervised job
//! that emits events in this order:
//!
//! `connected` -> `status(calculating)` -> `init` -> interleaved
//! `module-complete` / `module-error` with `progress` -> periodic `ping` ->
//! terminal `complete` or `error`.
//!
//! The client disconnects by dropping its [`ReportStream`]. Emission stops at
//! that point, but generation keeps running so results still land in the task
//! store. The stream timeout closes the channel only; it never cancels
//! generation.

use async_trait::async_trait;
use reportgen_config::StreamMode;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::adapter::CacheWriteMode;
use crate::orchestrator::{ReportOrchestrator, StoreHook, modules_for};
use crate::parallel::ModuleCompletionHook;
use crate::registry::ModuleMeta;
use crate::types::{ModuleResult, ReportRequest, ReportTask, TaskStatus};

/// Poll interval when following a run owned by another caller
const FOLLOW_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum StreamEvent {
    Connected {
        mode: String,
    },
    Status {
        status: String,
    },
    Init {
        task_id: String,
        module_ids: Vec<String>,
        meta: Vec<ModuleMeta>,
        fingerprint: String,
        title: String,
        estimated_minutes: u32,
    },
    ModuleComplete {
        module_id: String,
        content: String,
        cached: bool,
        duration_ms: u64,
    },
    ModuleError {
        module_id: String,
        error: String,
        duration_ms: u64,
    },
    Progress {
        completed: usize,
        failed: usize,
        total: usize,
        percent: u8,
    },
    Ping {
        elapsed_ms: u64,
    },
    Complete {
        completed_module_ids: Vec<String>,
        failed_module_ids: Vec<String>,
        total_ms: u64,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    /// Wire name of the event
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Status { .. } => "status",
            Self::Init { .. } => "init",
            Self::ModuleComplete { .. } => "module-complete",
            Self::ModuleError { .. } => "module-error",
            Self::Progress { .. } => "progress",
            Self::Ping { .. } => "ping",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    fn from_result(result: &ModuleResult) -> Self {
        match &result.content {
            Some(content) => Self::ModuleComplete {
                module_id: result.module_id.clone(),
                content: content.clone(),
                cached: result.cached,
                duration_ms: result.duration_ms,
            },
            None => Self::ModuleError {
                module_id: result.module_id.clone(),
                error: result.error.clone().unwrap_or_default(),
                duration_ms: result.duration_ms,
            },
        }
    }

    fn progress(task: &ReportTask) -> Self {
        Self::Progress {
            completed: task.completed_module_ids.len(),
            failed: task.failed_module_ids.len(),
            total: task.total_modules(),
            percent: task.progress,
        }
    }

    fn complete(task: &ReportTask, started: Instant) -> Self {
        Self::Complete {
            completed_module_ids: task.completed_module_ids.clone(),
            failed_module_ids: task.failed_module_ids.clone(),
            total_ms: elapsed_ms(started),
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Client side of a stream. Dropping it disconnects.
#[derive(Debug)]
pub struct ReportStream {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
}

impl ReportStream {
    /// Next event, or `None` once the channel is closed
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Read events until the channel closes
    pub async fn collect(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }

    /// Stop receiving. Generation already launched continues.
    pub fn disconnect(self) {
        drop(self);
    }
}

#[derive(Debug)]
struct SinkInner {
    tx: Mutex<Option<mpsc::UnboundedSender<StreamEvent>>>,
    client_gone: AtomicBool,
}

/// Server side of a stream, shared by the driver and the generation hook.
///
/// Once closed, by the driver or by a failed send, every later emit is a no-op.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    inner: Arc<SinkInner>,
}

impl EventSink {
    fn new(tx: mpsc::UnboundedSender<StreamEvent>) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                tx: Mutex::new(Some(tx)),
                client_gone: AtomicBool::new(false),
            }),
        }
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<StreamEvent>> {
        self.inner
            .tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Returns whether the event was handed to the client
    pub(crate) fn emit(&self, event: StreamEvent) -> bool {
        let mut guard = self.inner.tx.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = guard.as_ref() else {
            return false;
        };
        if tx.send(event).is_ok() {
            return true;
        }
        *guard = None;
        drop(guard);
        self.mark_client_gone();
        false
    }

    fn mark_client_gone(&self) {
        if !self.inner.client_gone.swap(true, Ordering::SeqCst) {
            info!("Stream client disconnected, event emission stopped");
        }
    }

    /// Resolves when the client has dropped its end
    async fn client_closed(&self) {
        match self.sender() {
            Some(tx) => tx.closed().await,
            None => std::future::pending::<()>().await,
        }
    }

    /// Release the channel so the client sees end of stream
    fn close(&self) {
        self.inner
            .tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}

/// Records results in the store and pushes them to the client
struct StreamHook {
    store: StoreHook,
    sink: EventSink,
}

#[async_trait]
impl ModuleCompletionHook for StreamHook {
    async fn on_module_settled(&mut self, result: &ModuleResult) {
        // Persist first so a disconnect right after the event loses nothing
        self.store.on_module_settled(result).await;
        self.sink.emit(StreamEvent::from_result(result));
        if let Some(task) = &self.store.latest {
            self.sink.emit(StreamEvent::progress(task));
        }
    }
}

type WorkFuture<'a> = Pin<Box<dyn Future<Output = Result<ReportTask, String>> + Send + 'a>>;

impl ReportOrchestrator {
    /// Open a stream for this request.
    ///
    /// `mode` defaults to the configured stream mode. In lite mode every module
    /// cache write is awaited before its event is emitted.
    pub fn stream(&self, req: ReportRequest, mode: Option<StreamMode>) -> ReportStream {
        let mode = mode.unwrap_or(self.inner.settings.stream_mode);
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        let this = self.clone();
        self.inner.supervisor.spawn("report-stream", async move {
            this.drive_stream(req, mode, sink.clone()).await;
            sink.close();
            Ok(())
        });
        ReportStream { rx }
    }

    async fn drive_stream(&self, req: ReportRequest, mode: StreamMode, sink: EventSink) {
        let started = Instant::now();
        sink.emit(StreamEvent::Connected {
            mode: mode.as_str().to_string(),
        });
        sink.emit(StreamEvent::Status {
            status: "calculating".to_string(),
        });

        let resolved = match self.resolve(&req).await {
            Ok(resolved) => resolved,
            Err(e) => {
                sink.emit(StreamEvent::Error {
                    message: e.to_string(),
                });
                return;
            }
        };
        let task_id = resolved.ctx.task_id.clone();
        let store = &self.inner.store;

        let (task, is_new) = match store
            .create_if_absent(&resolved.key, resolved.config.module_ids())
            .await
        {
            Ok(created) => created,
            Err(e) => {
                sink.emit(StreamEvent::Error {
                    message: e.to_string(),
                });
                return;
            }
        };
        debug!(task_id = %task_id, is_new, mode = %mode, "Stream attached to task");

        sink.emit(StreamEvent::Init {
            task_id: task_id.clone(),
            module_ids: resolved.config.module_ids(),
            meta: resolved.config.modules.clone(),
            fingerprint: resolved.key.fingerprint.clone(),
            title: resolved.config.title.clone(),
            estimated_minutes: resolved.config.estimated_minutes,
        });

        for module_id in &task.completed_module_ids {
            if let Some(content) = task.module_content.get(module_id) {
                sink.emit(StreamEvent::ModuleComplete {
                    module_id: module_id.clone(),
                    content: content.clone(),
                    cached: true,
                    duration_ms: 0,
                });
            }
        }
        if !task.completed_module_ids.is_empty() {
            sink.emit(StreamEvent::progress(&task));
        }

        let outstanding = task.outstanding_module_ids();
        let work: WorkFuture<'_> = if task.status == TaskStatus::Processing {
            info!(task_id = %task_id, "Following generation run already in progress");
            Box::pin(self.follow_task(&task, &sink))
        } else if outstanding.is_empty() {
            let settled = if task.status.is_terminal() {
                Ok(task.clone())
            } else {
                store.mark_terminal(&task_id).await.map_err(|e| e.to_string())
            };
            Box::pin(std::future::ready(settled))
        } else {
            let (current, transitioned) = match store.mark_processing(&task_id).await {
                Ok(marked) => marked,
                Err(e) => {
                    sink.emit(StreamEvent::Error {
                        message: e.to_string(),
                    });
                    return;
                }
            };
            if transitioned {
                let hook = StreamHook {
                    store: StoreHook::new(self.clone(), &task_id),
                    sink: sink.clone(),
                };
                let done = self.spawn_generation(
                    resolved.ctx,
                    modules_for(&resolved.config, &current.outstanding_module_ids()),
                    CacheWriteMode::from(mode),
                    hook,
                );
                Box::pin(async move {
                    done.await
                        .unwrap_or_else(|_| Err("generation run ended without a result".to_string()))
                })
            } else {
                // Another caller won the transition; follow from what was replayed
                info!(task_id = %task_id, "Another caller started generation, following it");
                Box::pin(self.follow_task(&task, &sink))
            }
        };

        self.pump(&task_id, work, &sink, started).await;
    }

    /// Drive heartbeat, timeout and disconnect detection until `work` settles
    async fn pump(&self, task_id: &str, work: WorkFuture<'_>, sink: &EventSink, started: Instant) {
        let settings = &self.inner.settings;
        let heartbeat_every = settings.heartbeat_interval;
        let mut heartbeat =
            tokio::time::interval_at(tokio::time::Instant::now() + heartbeat_every, heartbeat_every);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let deadline = tokio::time::sleep(settings.stream_timeout);
        tokio::pin!(deadline);
        let mut work = work;

        loop {
            tokio::select! {
                outcome = &mut work => {
                    let event = match outcome {
                        Ok(task) => StreamEvent::complete(&task, started),
                        Err(message) => StreamEvent::Error { message },
                    };
                    sink.emit(event);
                    break;
                }
                _ = heartbeat.tick() => {
                    sink.emit(StreamEvent::Ping { elapsed_ms: elapsed_ms(started) });
                }
                () = &mut deadline => {
                    warn!(
                        task_id = %task_id,
                        timeout_secs = settings.stream_timeout.as_secs(),
                        "Stream timed out, generation continues in background"
                    );
                    sink.emit(StreamEvent::Error {
                        message: format!(
                            "stream timed out after {}s; generation continues, poll status for results",
                            settings.stream_timeout.as_secs()
                        ),
                    });
                    break;
                }
                () = sink.client_closed() => {
                    sink.mark_client_gone();
                    debug!(task_id = %task_id, "Stream driver stopping after disconnect");
                    break;
                }
            }
        }
    }

    /// Emit results as another run records them, until the task settles
    async fn follow_task(&self, task: &ReportTask, sink: &EventSink) -> Result<ReportTask, String> {
        let mut seen_completed: HashSet<String> =
            task.completed_module_ids.iter().cloned().collect();
        let mut seen_failed: HashSet<String> = HashSet::new();
        let mut poll = tokio::time::interval(FOLLOW_POLL_INTERVAL);

        loop {
            poll.tick().await;
            let current = match self.inner.store.get_by_id(&task.task_id).await {
                Ok(Some(current)) => current,
                Ok(None) => return Err("task was deleted while streaming".to_string()),
                Err(e) => return Err(e.to_string()),
            };

            let mut changed = false;
            for module_id in &current.completed_module_ids {
                if seen_completed.insert(module_id.clone()) {
                    changed = true;
                    sink.emit(StreamEvent::ModuleComplete {
                        module_id: module_id.clone(),
                        content: current
                            .module_content
                            .get(module_id)
                            .cloned()
                            .unwrap_or_default(),
                        cached: false,
                        duration_ms: 0,
                    });
                }
            }
            for module_id in &current.failed_module_ids {
                if seen_failed.insert(module_id.clone()) {
                    changed = true;
                    sink.emit(StreamEvent::ModuleError {
                        module_id: module_id.clone(),
                        error: current
                            .module_errors
                            .get(module_id)
                            .cloned()
                            .unwrap_or_default(),
                        duration_ms: 0,
                    });
                }
            }
            if changed {
                sink.emit(StreamEvent::progress(&current));
            }
            if current.status.is_terminal() {
                return Ok(current);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = StreamEvent::ModuleComplete {
            module_id: "career".to_string(),
            content: "text".to_string(),
            cached: true,
            duration_ms: 12,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "module-complete");
        assert_eq!(json["data"]["moduleId"], "career");
        assert_eq!(json["data"]["durationMs"], 12);
        assert_eq!(event.name(), "module-complete");
        assert!(!event.is_terminal());
    }

    #[tokio::test]
    async fn test_sink_stops_after_client_drops() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        assert!(sink.emit(StreamEvent::Ping { elapsed_ms: 0 }));

        drop(rx);
        assert!(!sink.emit(StreamEvent::Ping { elapsed_ms: 1 }));
        assert!(sink.inner.client_gone.load(Ordering::SeqCst));
        assert!(!sink.emit(StreamEvent::Error {
            message: "late".to_string()
        }));
    }

    #[tokio::test]
    async fn test_close_ends_the_stream_for_the_client() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        let hook_side = sink.clone();
        sink.emit(StreamEvent::Ping { elapsed_ms: 0 });
        sink.close();

        assert!(!hook_side.emit(StreamEvent::Ping { elapsed_ms: 1 }));
        let events = ReportStream { rx }.collect().await;
        assert_eq!(events, [StreamEvent::Ping { elapsed_ms: 0 }]);
    }
}
