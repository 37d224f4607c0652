//! Budgeted backend wrapper for call limiting
//!
//! Wraps any `LlmBackend` and caps the number of invocations per process. Used for
//! cost control with pay-per-call providers like OpenRouter.

use async_trait::async_trait;
use reportgen_utils::error::LlmError;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

use crate::types::{LlmBackend, LlmInvocation, LlmResult};

/// Default budget limit for calls per process
pub const DEFAULT_BUDGET_LIMIT: u32 = 50;

/// Environment variable for overriding the budget limit
pub const BUDGET_ENV_VAR: &str = "REPORTGEN_OPENROUTER_BUDGET";

/// A wrapper around an `LlmBackend` that enforces a budget limit on invocations.
///
/// The budget tracks attempted calls, not successful requests: a failed call
/// still consumes its slot, so caller-initiated retries cannot bypass the limit.
pub struct BudgetedBackend {
    inner: Box<dyn LlmBackend>,
    used: AtomicU32,
    limit: u32,
}

impl BudgetedBackend {
    pub fn new(inner: Box<dyn LlmBackend>, limit: u32) -> Self {
        debug!(limit = limit, "Creating BudgetedBackend");
        Self {
            inner,
            used: AtomicU32::new(0),
            limit,
        }
    }

    /// Resolve the limit with precedence: env var > config file > default
    pub fn with_limit_from_config(inner: Box<dyn LlmBackend>, config_budget: Option<u32>) -> Self {
        let env_limit = std::env::var(BUDGET_ENV_VAR)
            .ok()
            .and_then(|s| s.parse::<u32>().ok());
        Self::new(inner, resolve_limit(env_limit, config_budget))
    }

    /// Calls attempted so far
    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }
}

fn resolve_limit(env_limit: Option<u32>, config_budget: Option<u32>) -> u32 {
    match (env_limit, config_budget) {
        (Some(limit), _) => {
            debug!(limit = limit, "Using budget limit from {}", BUDGET_ENV_VAR);
            limit
        }
        (None, Some(limit)) => {
            debug!(limit = limit, "Using budget limit from config file");
            limit
        }
        (None, None) => DEFAULT_BUDGET_LIMIT,
    }
}

#[async_trait]
impl LlmBackend for BudgetedBackend {
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError> {
        // Count before calling so concurrent modules cannot overshoot the limit
        let current = self.used.fetch_add(1, Ordering::SeqCst);

        if current >= self.limit {
            let attempted = current + 1;
            warn!(
                limit = self.limit,
                attempted = attempted,
                module_id = %inv.module_id,
                "Budget limit exceeded"
            );
            return Err(LlmError::BudgetExceeded {
                limit: self.limit,
                attempted,
            });
        }

        let result = self.inner.invoke(inv).await;
        if let Err(e) = &result {
            debug!(
                call_count = current + 1,
                limit = self.limit,
                error = %e,
                "Inner backend invocation failed (budget slot still consumed)"
            );
        }
        result
    }
}
