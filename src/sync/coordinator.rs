//! Sync Coordinator: global budget + round timer.
//!
//! A sync round creates a fresh scheduler per enabled source, starts
//! them all, and waits for every one to finish. Rounds never overlap;
//! when one ends, the round-interval timer arms the next.

use crate::config::Config;
use crate::http_pool::HttpsPool;
use crate::registry::by_name;
use crate::stats::StatsLedger;
use crate::store::Store;
use crate::sync::executor::SyncExecutor;
use crate::sync::scheduler::SyncScheduler;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::interval;
use tracing::{error, info};

const GLOBAL_CONCURRENCY_BUDGET: usize = 8;
const PER_SOURCE_CONCURRENCY_BUDGET: usize = 4;
const POOL_SIZE: usize = 8;
const GRAPH_HOST: &str = "https://gateway.thegraph.com";

pub struct SyncCoordinator {
    config: Config,
    store: Arc<Store>,
    stats: Arc<StatsLedger>,
    global_budget: Arc<Semaphore>,
}

impl SyncCoordinator {
    pub fn new(config: Config, store: Arc<Store>, stats: Arc<StatsLedger>) -> Self {
        Self {
            config,
            store,
            stats,
            global_budget: Arc::new(Semaphore::new(GLOBAL_CONCURRENCY_BUDGET)),
        }
    }

    fn build_schedulers(&self) -> Result<Vec<SyncScheduler>> {
        let pool = Arc::new(HttpsPool::new(GRAPH_HOST, self.config.api_key.clone(), POOL_SIZE)?);

        let mut schedulers = Vec::new();
        for (source_name, source_cfg) in self.config.enabled_sources() {
            let mut executors = Vec::with_capacity(source_cfg.entities.len());
            for (entity_name, table_name) in &source_cfg.entities {
                let Some(def) = by_name(entity_name) else {
                    error!(entity = %entity_name, "unknown entity in config, skipping");
                    continue;
                };
                executors.push(Arc::new(SyncExecutor::new(
                    source_name.clone(),
                    def,
                    table_name.clone(),
                    self.store.clone(),
                    pool.clone(),
                    self.stats.clone(),
                )));
            }
            schedulers.push(SyncScheduler::new(
                source_name.clone(),
                source_cfg.subgraph_id.clone(),
                executors,
                PER_SOURCE_CONCURRENCY_BUDGET,
            ));
        }
        Ok(schedulers)
    }

    /// Runs one sync round to completion: every enabled source's
    /// entities are driven to their terminal page.
    pub async fn run_round(&self) -> Result<()> {
        let schedulers = self.build_schedulers()?;
        info!(sources = schedulers.len(), "starting sync round");

        let mut handles = Vec::with_capacity(schedulers.len());
        for scheduler in schedulers {
            let global_budget = self.global_budget.clone();
            handles.push(tokio::spawn(async move { scheduler.run(global_budget).await }));
        }
        for handle in handles {
            handle.await??;
        }

        info!("sync round complete");
        Ok(())
    }

    /// Runs sync rounds forever, separated by `sync_interval_seconds`.
    /// Rounds do not overlap; a failing entity retries within its own
    /// executor rather than failing the round.
    pub async fn run_forever(self: Arc<Self>) -> Result<()> {
        let mut ticker = interval(Duration::from_secs(self.config.sync_interval_seconds.max(1)));
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_round().await {
                error!(error = %e, "sync round failed");
            }
        }
    }
}
