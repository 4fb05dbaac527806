//! Replay Query Surface: pure functions over frozen post-rebuild state.
//! Nothing here mutates; all serving reads borrow.

use crate::rebuild::types::UserState;
use crate::rebuild::types::PRICE_SCALE;
use serde::Serialize;
use std::collections::HashMap;

/// Below this absolute position sum, a condition is not worth displaying.
pub const DEFAULT_DUST_THRESHOLD: i64 = 50 * PRICE_SCALE;

#[derive(Debug, Serialize)]
pub struct TimelineStep {
    pub ts: i64,
    pub event_type: u8,
    pub global_rpnl: i64,
    pub active_condition_count: u32,
}

#[derive(Debug, Serialize)]
pub struct TradeWindowEntry {
    pub cond_index: u32,
    pub ts: i64,
    pub event_type: u8,
    pub delta: i64,
    pub price: i64,
}

#[derive(Debug, Serialize)]
pub struct PositionEntry {
    pub cond_index: u32,
    pub ts: i64,
    pub positions: [i64; crate::rebuild::types::MAX_OUTCOMES],
    pub realized_pnl: i64,
}

#[derive(Debug, Serialize)]
pub struct UserListEntry {
    pub user_id: String,
    pub event_count: u64,
}

/// Merges a user's per-condition snapshots into one global timeline, in
/// timestamp order, recomputing the running realized-PnL delta and the
/// count of conditions still open (above the dust threshold).
pub fn user_timeline(state: &UserState) -> Vec<TimelineStep> {
    struct Flat<'a> {
        cond_index: u32,
        snap: &'a crate::rebuild::types::Snapshot,
    }

    let mut flat: Vec<Flat> = Vec::new();
    for history in &state.histories {
        for snap in &history.snapshots {
            flat.push(Flat {
                cond_index: history.cond_index,
                snap,
            });
        }
    }
    flat.sort_by_key(|f| f.snap.timestamp);

    let mut last_seen_cond_rpnl: HashMap<u32, i64> = HashMap::new();
    let mut last_seen_positions: HashMap<u32, [i64; crate::rebuild::types::MAX_OUTCOMES]> = HashMap::new();
    let mut global_rpnl = 0i64;
    let mut steps = Vec::with_capacity(flat.len());

    for f in &flat {
        let prior = last_seen_cond_rpnl.get(&f.cond_index).copied().unwrap_or(0);
        global_rpnl += f.snap.realized_pnl - prior;
        last_seen_cond_rpnl.insert(f.cond_index, f.snap.realized_pnl);
        last_seen_positions.insert(f.cond_index, f.snap.positions);

        let active_condition_count = last_seen_positions
            .values()
            .filter(|positions| positions.iter().map(|p| p.unsigned_abs() as i64).sum::<i64>() > DEFAULT_DUST_THRESHOLD)
            .count() as u32;

        steps.push(TimelineStep {
            ts: f.snap.timestamp,
            event_type: f.snap.event_type,
            global_rpnl,
            active_condition_count,
        });
    }

    steps
}

/// Binary-searches each condition history for the snapshot closest to
/// `ts`, returning the `radius` snapshots on either side across all of
/// the user's conditions, merged by timestamp.
pub fn trades_at(state: &UserState, ts: i64, radius: usize) -> Vec<TradeWindowEntry> {
    let mut entries: Vec<TradeWindowEntry> = Vec::new();
    for history in &state.histories {
        let snaps = &history.snapshots;
        if snaps.is_empty() {
            continue;
        }
        let pos = snaps.partition_point(|s| s.timestamp <= ts);
        let lo = pos.saturating_sub(radius);
        let hi = (pos + radius).min(snaps.len());
        for snap in &snaps[lo..hi] {
            entries.push(TradeWindowEntry {
                cond_index: history.cond_index,
                ts: snap.timestamp,
                event_type: snap.event_type,
                delta: snap.delta,
                price: snap.price,
            });
        }
    }
    entries.sort_by_key(|e| e.ts);
    entries
}

/// For each condition, the last snapshot at or before `ts`; dust-filtered
/// and sorted by `|realized_pnl|` descending.
pub fn positions_at(state: &UserState, ts: i64) -> Vec<PositionEntry> {
    let mut entries: Vec<PositionEntry> = Vec::new();
    for history in &state.histories {
        let snaps = &history.snapshots;
        let pos = snaps.partition_point(|s| s.timestamp <= ts);
        if pos == 0 {
            continue;
        }
        let snap = &snaps[pos - 1];
        let magnitude: i64 = snap.positions.iter().map(|p| p.unsigned_abs() as i64).sum();
        if magnitude <= DEFAULT_DUST_THRESHOLD {
            continue;
        }
        entries.push(PositionEntry {
            cond_index: history.cond_index,
            ts: snap.timestamp,
            positions: snap.positions,
            realized_pnl: snap.realized_pnl,
        });
    }
    entries.sort_by_key(|e| std::cmp::Reverse(e.realized_pnl.unsigned_abs()));
    entries
}

/// All users sorted by total event count, descending, truncated to `limit`.
pub fn user_list(user_ids: &[String], users: &[UserState], limit: usize) -> Vec<UserListEntry> {
    let mut entries: Vec<UserListEntry> = user_ids
        .iter()
        .zip(users)
        .map(|(user_id, state)| UserListEntry {
            user_id: user_id.clone(),
            event_count: state.histories.iter().map(|h| h.snapshots.len() as u64).sum(),
        })
        .collect();
    entries.sort_by_key(|e| std::cmp::Reverse(e.event_count));
    entries.truncate(limit);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rebuild::types::{Snapshot, UserConditionHistory};

    fn state_with_two_conditions() -> UserState {
        let snap_a1 = Snapshot {
            timestamp: 1,
            delta: 10,
            price: 500_000,
            positions: [10, 0, 0, 0, 0, 0, 0, 0],
            cost_basis: 5,
            realized_pnl: 0,
            event_type: 0,
            token_index: 0,
            outcome_count: 2,
            _pad: [0; 5],
        };
        let snap_a2 = Snapshot {
            timestamp: 3,
            realized_pnl: 4,
            ..snap_a1
        };
        let snap_b1 = Snapshot {
            timestamp: 2,
            realized_pnl: 1,
            positions: [1, 0, 0, 0, 0, 0, 0, 0],
            ..snap_a1
        };

        UserState {
            histories: vec![
                UserConditionHistory {
                    cond_index: 0,
                    snapshots: vec![snap_a1, snap_a2],
                },
                UserConditionHistory {
                    cond_index: 1,
                    snapshots: vec![snap_b1],
                },
            ],
        }
    }

    #[test]
    fn timeline_merges_and_sorts_across_conditions() {
        let state = state_with_two_conditions();
        let steps = user_timeline(&state);
        let timestamps: Vec<i64> = steps.iter().map(|s| s.ts).collect();
        assert_eq!(timestamps, vec![1, 2, 3]);
        // realized_pnl deltas: 0, 1, 4 -> cumulative global 0, 1, 4
        assert_eq!(steps[2].global_rpnl, 4);
    }

    #[test]
    fn positions_at_filters_dust_and_sorts_by_pnl_magnitude() {
        let state = state_with_two_conditions();
        let positions = positions_at(&state, 10);
        // snap_b1 has position magnitude 1, below the dust threshold — filtered.
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].cond_index, 0);
    }

    #[test]
    fn trades_at_returns_window_around_timestamp() {
        let state = state_with_two_conditions();
        let window = trades_at(&state, 2, 1);
        assert!(!window.is_empty());
    }

    #[test]
    fn user_list_sorts_by_event_count_descending_and_truncates() {
        let a = UserState {
            histories: vec![UserConditionHistory {
                cond_index: 0,
                snapshots: vec![Snapshot {
                    timestamp: 0,
                    delta: 0,
                    price: 0,
                    positions: [0; 8],
                    cost_basis: 0,
                    realized_pnl: 0,
                    event_type: 0,
                    token_index: 0,
                    outcome_count: 1,
                    _pad: [0; 5],
                }],
            }],
        };
        let b = state_with_two_conditions();
        let ids = vec!["a".to_string(), "b".to_string()];
        let users = vec![a, b];
        let top = user_list(&ids, &users, 1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].user_id, "b");
    }
}
