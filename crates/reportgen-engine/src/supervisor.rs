//! Background job supervision
//!
//! Generation runs and deferred cache writes are fire-and-forget from the
//! caller's point of view, but they are still owned: each one is registered
//! here so failures are logged and a process can wait for outstanding work
//! before exiting.

use reportgen_utils::error::ReportError;
use reportgen_utils::logging::redact_error_message;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;
use tracing::{debug, error};

#[derive(Debug, Default)]
struct Inner {
    active: AtomicUsize,
    idle: Notify,
}

/// Tracks spawned background jobs
#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

/// Decrements the active count even if the job panics
struct ActiveGuard(Arc<Inner>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.0.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl Supervisor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a supervised job. Errors are logged, not propagated.
    pub fn spawn<F>(&self, label: &'static str, job: F)
    where
        F: Future<Output = Result<(), ReportError>> + Send + 'static,
    {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(Arc::clone(&self.inner));
        debug!(job = label, "Spawning background job");

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = job.await {
                error!(
                    job = label,
                    error = %redact_error_message(&e.to_string()),
                    "Background job failed"
                );
            }
        });
    }

    /// Number of jobs still running
    #[must_use]
    pub fn active_jobs(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Wait until no supervised job is running, including jobs spawned while
    /// waiting.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active_jobs() == 0 {
                return;
            }
            notified.await;
        }
    }
}
