//! Parallel generation engine
//!
//! Runs every requested module concurrently and reports each outcome as it
//! settles. A failing or panicking module never affects its siblings.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::adapter::{CacheWriteMode, GenerationContext, ModuleGenerator};
use crate::registry::ModuleMeta;
use crate::types::ModuleResult;

/// Receives each module outcome in completion order.
///
/// Calls are sequential; the engine waits for each call before handling the
/// next completion.
#[async_trait]
pub trait ModuleCompletionHook: Send {
    async fn on_module_settled(&mut self, result: &ModuleResult);
}

#[derive(Clone)]
pub struct ParallelEngine {
    generator: Arc<ModuleGenerator>,
}

impl ParallelEngine {
    pub fn new(generator: Arc<ModuleGenerator>) -> Self {
        Self { generator }
    }

    #[must_use]
    pub fn generator(&self) -> &Arc<ModuleGenerator> {
        &self.generator
    }

    /// Generate all `modules` concurrently.
    ///
    /// Returns one result per module in completion order, after every module
    /// has settled.
    pub async fn run_all(
        &self,
        ctx: Arc<GenerationContext>,
        modules: Vec<ModuleMeta>,
        write_mode: CacheWriteMode,
        mut hook: Option<&mut (dyn ModuleCompletionHook + '_)>,
    ) -> Vec<ModuleResult> {
        let mut pending: HashSet<String> = modules.iter().map(|m| m.id.clone()).collect();
        let mut set = JoinSet::new();

        for module in modules {
            let generator = Arc::clone(&self.generator);
            let ctx = Arc::clone(&ctx);
            set.spawn(async move { generator.run_module(&ctx, &module, write_mode).await });
        }
        debug!(task_id = %ctx.task_id, modules = pending.len(), "Launched module generation");

        let mut results = Vec::with_capacity(pending.len());
        while let Some(joined) = set.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    // The module id is recovered below from the pending set
                    error!(task_id = %ctx.task_id, error = %e, "Module generation task aborted");
                    continue;
                }
            };
            pending.remove(&result.module_id);
            if let Some(hook) = hook.as_deref_mut() {
                hook.on_module_settled(&result).await;
            }
            results.push(result);
        }

        let mut aborted: Vec<String> = pending.into_iter().collect();
        aborted.sort();
        for module_id in aborted {
            let result = ModuleResult::failure(module_id, "generation task aborted unexpectedly", 0);
            if let Some(hook) = hook.as_deref_mut() {
                hook.on_module_settled(&result).await;
            }
            results.push(result);
        }

        results
    }
}
