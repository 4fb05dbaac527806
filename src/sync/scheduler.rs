//! Sync Scheduler: per-source fairness layer.
//!
//! Holds one source's entity executors and a local concurrency budget.
//! Each executor only starts once both the scheduler's local budget and
//! the coordinator's global budget have a free slot; both are released
//! together when the executor completes.

use crate::sync::executor::SyncExecutor;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::info;

pub struct SyncScheduler {
    pub source: String,
    pub subgraph_id: String,
    executors: Vec<Arc<SyncExecutor>>,
    local_budget: Arc<Semaphore>,
}

impl SyncScheduler {
    pub fn new(source: impl Into<String>, subgraph_id: impl Into<String>, executors: Vec<Arc<SyncExecutor>>, local_cap: usize) -> Self {
        Self {
            source: source.into(),
            subgraph_id: subgraph_id.into(),
            executors,
            local_budget: Arc::new(Semaphore::new(local_cap.max(1))),
        }
    }

    /// Runs every entity executor for this source to completion,
    /// respecting both the local and the (shared) global budget.
    pub async fn run(&self, global_budget: Arc<Semaphore>) -> Result<()> {
        let mut handles = Vec::with_capacity(self.executors.len());

        for executor in &self.executors {
            let executor = executor.clone();
            let local_budget = self.local_budget.clone();
            let global_budget = global_budget.clone();
            let subgraph_id = self.subgraph_id.clone();

            handles.push(tokio::spawn(async move {
                let _local_permit = local_budget.acquire_owned().await;
                let _global_permit = global_budget.acquire_owned().await;
                executor.start(&subgraph_id).await
            }));
        }

        for handle in handles {
            handle.await??;
        }

        info!(source = %self.source, "source scheduler completed all entities");
        Ok(())
    }
}
