//! Rebuild Engine: orchestrates Phases 1-3, tracks status for the query
//! façade, and owns the frozen post-rebuild state plus its persistence.
//!
//! A rebuild runs on a blocking thread (spawned via
//! `tokio::task::spawn_blocking` by callers) since Phases 1-2 do blocking
//! SQLite reads and Phase 3 spins up its own worker threads — none of
//! that belongs on the async I/O loop that drives sync.

use crate::rebuild::persistence::{self, RebuildData};
use crate::rebuild::types::{Metadata, UserState};
use crate::rebuild::{phase1_metadata, phase2_collect, phase3_replay, query};
use crate::store::Store;
use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildPhase {
    Idle,
    Metadata,
    Collecting,
    Replaying,
    Persisting,
    Done,
    Failed,
}

#[derive(Debug, Serialize)]
pub struct RebuildStatus {
    pub phase: RebuildPhase,
    pub condition_count: u64,
    pub eof_rows: u64,
    pub eof_events: u64,
    pub user_count: u64,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

struct RebuildState {
    metadata: Metadata,
    user_ids: Vec<String>,
    users: Vec<UserState>,
}

pub struct RebuildEngine {
    store: Arc<Store>,
    persistence_path: PathBuf,
    phase: RwLock<RebuildPhase>,
    error: RwLock<Option<String>>,
    eof_rows: AtomicU64,
    eof_events: AtomicU64,
    started_at: RwLock<Option<Instant>>,
    state: RwLock<Option<RebuildState>>,
}

impl RebuildEngine {
    pub fn new(store: Arc<Store>, persistence_path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            persistence_path: persistence_path.into(),
            phase: RwLock::new(RebuildPhase::Idle),
            error: RwLock::new(None),
            eof_rows: AtomicU64::new(0),
            eof_events: AtomicU64::new(0),
            started_at: RwLock::new(None),
            state: RwLock::new(None),
        }
    }

    pub fn status(&self) -> RebuildStatus {
        let state = self.state.read();
        RebuildStatus {
            phase: *self.phase.read(),
            condition_count: state.as_ref().map(|s| s.metadata.condition_count() as u64).unwrap_or(0),
            eof_rows: self.eof_rows.load(Ordering::Relaxed),
            eof_events: self.eof_events.load(Ordering::Relaxed),
            user_count: state.as_ref().map(|s| s.users.len() as u64).unwrap_or(0),
            elapsed_ms: self
                .started_at
                .read()
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or(0),
            error: self.error.read().clone(),
        }
    }

    /// Runs a full rebuild to completion: Phase 1, Phase 2, Phase 3, then
    /// persists. A rebuild either completes and persists, or leaves the
    /// previously persisted file untouched.
    pub fn run(&self) -> Result<()> {
        *self.started_at.write() = Some(Instant::now());
        *self.error.write() = None;
        self.eof_rows.store(0, Ordering::Relaxed);
        self.eof_events.store(0, Ordering::Relaxed);

        let result = self.run_inner();
        if let Err(e) = &result {
            *self.phase.write() = RebuildPhase::Failed;
            *self.error.write() = Some(e.to_string());
        }
        result
    }

    fn run_inner(&self) -> Result<()> {
        *self.phase.write() = RebuildPhase::Metadata;
        let metadata = phase1_metadata::run(&self.store).context("rebuild phase 1 (metadata)")?;
        info!(conditions = metadata.condition_count(), "phase 1 complete");

        *self.phase.write() = RebuildPhase::Collecting;
        let collected = phase2_collect::run(&self.store, &metadata).context("rebuild phase 2 (collect)")?;
        self.eof_rows.store(collected.counters.eof_rows.load(Ordering::Relaxed), Ordering::Relaxed);
        self.eof_events.store(collected.counters.eof_events.load(Ordering::Relaxed), Ordering::Relaxed);
        info!(users = collected.user_ids.len(), "phase 2 complete");

        *self.phase.write() = RebuildPhase::Replaying;
        let users = phase3_replay::run(collected.buckets, &metadata.cond_info);
        info!(users = users.len(), "phase 3 complete");

        *self.phase.write() = RebuildPhase::Persisting;
        let data = RebuildData {
            cond_ids: metadata.cond_ids.clone(),
            cond_info: metadata.cond_info.clone(),
            token_map: metadata
                .token_map
                .iter()
                .map(|(token, (cond_index, outcome_index))| (token.clone(), *cond_index, *outcome_index))
                .collect(),
            user_ids: collected.user_ids.clone(),
            users: users.clone(),
        };
        persistence::save(&self.persistence_path, &data).context("persisting rebuild result")?;

        *self.state.write() = Some(RebuildState {
            metadata,
            user_ids: collected.user_ids,
            users,
        });
        *self.phase.write() = RebuildPhase::Done;
        Ok(())
    }

    /// Loads a previously persisted rebuild into memory, skipping Phases
    /// 1-3 entirely.
    pub fn load_from_file(&self) -> Result<()> {
        let data = persistence::load(&self.persistence_path).context("loading persisted rebuild")?;

        let mut metadata = Metadata::default();
        metadata.cond_ids = data.cond_ids;
        for (i, id) in metadata.cond_ids.iter().enumerate() {
            metadata.cond_index_of.insert(id.clone(), i as u32);
        }
        metadata.cond_info = data.cond_info;
        metadata.token_map = data
            .token_map
            .into_iter()
            .map(|(token, cond_index, outcome_index)| (token, (cond_index, outcome_index)))
            .collect();

        *self.state.write() = Some(RebuildState {
            metadata,
            user_ids: data.user_ids,
            users: data.users,
        });
        *self.phase.write() = RebuildPhase::Done;
        Ok(())
    }

    fn find_user<'a>(state: &'a RebuildState, user_id: &str) -> Option<&'a UserState> {
        state
            .user_ids
            .iter()
            .position(|id| id == user_id)
            .map(|idx| &state.users[idx])
    }

    pub fn user_timeline(&self, user_id: &str) -> Option<Vec<query::TimelineStep>> {
        let guard = self.state.read();
        let state = guard.as_ref()?;
        Self::find_user(state, user_id).map(query::user_timeline)
    }

    pub fn trades_at(&self, user_id: &str, ts: i64, radius: usize) -> Option<Vec<query::TradeWindowEntry>> {
        let guard = self.state.read();
        let state = guard.as_ref()?;
        Self::find_user(state, user_id).map(|u| query::trades_at(u, ts, radius))
    }

    pub fn positions_at(&self, user_id: &str, ts: i64) -> Option<Vec<query::PositionEntry>> {
        let guard = self.state.read();
        let state = guard.as_ref()?;
        Self::find_user(state, user_id).map(|u| query::positions_at(u, ts))
    }

    pub fn user_list(&self, limit: usize) -> Vec<query::UserListEntry> {
        let guard = self.state.read();
        match guard.as_ref() {
            Some(state) => query::user_list(&state.user_ids, &state.users, limit),
            None => Vec::new(),
        }
    }
}
