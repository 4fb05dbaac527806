//! Stats Ledger.
//!
//! Per-(source, entity) counters and per-indexer failure attribution,
//! throttled-persisted to the Store so a busy sync round doesn't hit
//! disk on every single counter increment, guarded by a single coarse
//! `parking_lot::Mutex`.

use crate::store::Store;
use crate::sync::error::SyncErrorKind;
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

const RECENT_LATENCY_WINDOW: usize = 20;
const DEFAULT_PERSIST_INTERVAL: Duration = Duration::from_secs(5);
const SNAPSHOT_CACHE_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiState {
    Idle,
    Calling,
    Processing,
}

#[derive(Debug, Clone, Default)]
pub struct EntityCounters {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub network_failures: u64,
    pub json_failures: u64,
    pub graphql_failures: u64,
    pub format_failures: u64,
    pub total_rows: u64,
    pub total_latency_ms: u64,
}

impl EntityCounters {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}

struct EntrySlot {
    counters: EntityCounters,
    recent_latencies_ms: VecDeque<u64>,
    api_state: ApiState,
    last_persisted: Option<Instant>,
}

impl Default for EntrySlot {
    fn default() -> Self {
        Self {
            counters: EntityCounters::default(),
            recent_latencies_ms: VecDeque::with_capacity(RECENT_LATENCY_WINDOW),
            api_state: ApiState::Idle,
            last_persisted: None,
        }
    }
}

/// Key type: `(source, entity)`.
type Key = (String, String);

pub struct StatsLedger {
    store: Arc<Store>,
    entries: Mutex<HashMap<Key, EntrySlot>>,
    persist_interval: Duration,
    snapshot_cache: Mutex<Option<(Instant, serde_json::Value)>>,
}

impl StatsLedger {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            entries: Mutex::new(HashMap::new()),
            persist_interval: DEFAULT_PERSIST_INTERVAL,
            snapshot_cache: Mutex::new(None),
        }
    }

    pub fn set_state(&self, source: &str, entity: &str, state: ApiState) {
        let mut entries = self.entries.lock();
        entries
            .entry((source.to_string(), entity.to_string()))
            .or_default()
            .api_state = state;
    }

    pub fn record_success(&self, source: &str, entity: &str, rows: u64, latency: Duration) {
        let force = {
            let mut entries = self.entries.lock();
            let slot = entries.entry((source.to_string(), entity.to_string())).or_default();
            slot.counters.total_requests += 1;
            slot.counters.successful_requests += 1;
            slot.counters.total_rows += rows;
            slot.counters.total_latency_ms += latency.as_millis() as u64;
            if slot.recent_latencies_ms.len() == RECENT_LATENCY_WINDOW {
                slot.recent_latencies_ms.pop_front();
            }
            slot.recent_latencies_ms.push_back(latency.as_millis() as u64);
            slot.api_state = ApiState::Idle;
            false
        };
        self.maybe_persist(source, entity, force);
    }

    pub fn record_failure(&self, source: &str, entity: &str, kind: SyncErrorKind) {
        {
            let mut entries = self.entries.lock();
            let slot = entries.entry((source.to_string(), entity.to_string())).or_default();
            slot.counters.total_requests += 1;
            match kind {
                SyncErrorKind::Network => slot.counters.network_failures += 1,
                SyncErrorKind::Json => slot.counters.json_failures += 1,
                SyncErrorKind::GraphQl => slot.counters.graphql_failures += 1,
                SyncErrorKind::Format => slot.counters.format_failures += 1,
            }
            slot.api_state = ApiState::Idle;
        }
        self.maybe_persist(source, entity, false);
    }

    /// A sync's terminal transition (success-with-short-page, or giving
    /// up) force-persists regardless of the throttle interval.
    pub fn force_persist(&self, source: &str, entity: &str) -> Result<()> {
        self.persist(source, entity)
    }

    fn maybe_persist(&self, source: &str, entity: &str, force: bool) {
        let should = force || {
            let entries = self.entries.lock();
            match entries.get(&(source.to_string(), entity.to_string())) {
                Some(slot) => slot
                    .last_persisted
                    .map(|t| t.elapsed() >= self.persist_interval)
                    .unwrap_or(true),
                None => true,
            }
        };
        if should {
            let _ = self.persist(source, entity);
        }
    }

    fn persist(&self, source: &str, entity: &str) -> Result<()> {
        let counters = {
            let mut entries = self.entries.lock();
            let slot = entries.entry((source.to_string(), entity.to_string())).or_default();
            slot.last_persisted = Some(Instant::now());
            slot.counters.clone()
        };
        self.store.persist_entity_stats(source, entity, &counters)
    }

    pub fn indexer_fail(&self, source: &str, entity: &str, indexer_id: &str) -> Result<()> {
        self.store.increment_indexer_fail(source, entity, indexer_id)
    }

    /// Rebuilds the read-side JSON snapshot at most once per ~200ms to
    /// absorb dashboard polling.
    pub fn snapshot_json(&self) -> Result<serde_json::Value> {
        {
            let cache = self.snapshot_cache.lock();
            if let Some((at, value)) = cache.as_ref() {
                if at.elapsed() < SNAPSHOT_CACHE_INTERVAL {
                    return Ok(value.clone());
                }
            }
        }
        let value = self.store.all_entity_stats()?;
        *self.snapshot_cache.lock() = Some((Instant::now(), value.clone()));
        Ok(value)
    }
}

impl Store {
    fn persist_entity_stats(&self, source: &str, entity: &str, c: &EntityCounters) -> Result<()> {
        self.writer_execute(
            "INSERT INTO entity_stats_meta
                (source, entity, total_requests, successful_requests, network_failures,
                 json_failures, graphql_failures, format_failures, total_rows,
                 total_latency_ms, success_rate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(source, entity) DO UPDATE SET
                total_requests = excluded.total_requests,
                successful_requests = excluded.successful_requests,
                network_failures = excluded.network_failures,
                json_failures = excluded.json_failures,
                graphql_failures = excluded.graphql_failures,
                format_failures = excluded.format_failures,
                total_rows = excluded.total_rows,
                total_latency_ms = excluded.total_latency_ms,
                success_rate = excluded.success_rate",
            rusqlite::params![
                source,
                entity,
                c.total_requests as i64,
                c.successful_requests as i64,
                c.network_failures as i64,
                c.json_failures as i64,
                c.graphql_failures as i64,
                c.format_failures as i64,
                c.total_rows as i64,
                c.total_latency_ms as i64,
                c.success_rate(),
            ],
        )
    }

    fn increment_indexer_fail(&self, source: &str, entity: &str, indexer_id: &str) -> Result<()> {
        self.writer_execute(
            "INSERT INTO indexer_fail_meta (source, entity, indexer_id, fail_requests)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(source, entity, indexer_id) DO UPDATE SET
                fail_requests = fail_requests + 1",
            rusqlite::params![source, entity, indexer_id],
        )
    }

    fn all_entity_stats(&self) -> Result<serde_json::Value> {
        self.query_json("SELECT * FROM entity_stats_meta")
    }
}
