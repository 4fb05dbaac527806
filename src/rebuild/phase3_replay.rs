//! Rebuild Phase 3 — Replay.
//!
//! Partitions users into `W = min(available_parallelism, CAP)` contiguous
//! ranges; each worker thread owns its range exclusively and touches no
//! shared mutable state.

use crate::rebuild::types::{
    ConditionInfo, EventType, RawEvent, ReplayState, Snapshot, UserConditionHistory, UserState,
    MAX_OUTCOMES, PRICE_SCALE,
};
use std::collections::HashMap;

const WORKER_CAP: usize = 16;

fn worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(WORKER_CAP)
}

/// Applies one event to `state`, appending the resulting snapshot.
/// Arithmetic is integer-only; truncation order matters and is followed
/// exactly, not reassociated.
fn apply_event(state: &mut ReplayState, cond: &ConditionInfo, event: &RawEvent, snapshots: &mut Vec<Snapshot>) {
    let outcome_count = cond.outcome_count as usize;

    match event.kind() {
        EventType::Buy => {
            let i = event.token_index as usize;
            state.cost[i] += event.amount * event.price;
            state.positions[i] += event.amount;
        }
        EventType::Sell => {
            let i = event.token_index as usize;
            if state.positions[i] > 0 {
                let removed = (state.cost[i] * event.amount) / state.positions[i];
                state.realized_pnl += (event.amount * event.price - removed) / PRICE_SCALE;
                state.cost[i] -= removed;
                state.positions[i] -= event.amount;
            }
        }
        EventType::Split => {
            let implied_price = PRICE_SCALE / outcome_count as i64;
            for i in 0..outcome_count {
                state.cost[i] += event.amount * implied_price;
                state.positions[i] += event.amount;
            }
        }
        EventType::Merge => {
            let implied_price = PRICE_SCALE / outcome_count as i64;
            for i in 0..outcome_count {
                if state.positions[i] > 0 {
                    let removed = (state.cost[i] * event.amount) / state.positions[i];
                    state.realized_pnl += (event.amount * implied_price - removed) / PRICE_SCALE;
                    state.cost[i] -= removed;
                    state.positions[i] -= event.amount;
                }
            }
        }
        EventType::Redemption => {
            if cond.payout_denominator != 0 {
                for i in 0..outcome_count {
                    if state.positions[i] > 0 {
                        let payout_price = (cond.payout_numerators[i] * PRICE_SCALE) / cond.payout_denominator;
                        state.realized_pnl +=
                            (state.positions[i] * payout_price - state.cost[i]) / PRICE_SCALE;
                        state.cost[i] = 0;
                        state.positions[i] = 0;
                    }
                }
            }
        }
    }

    let mut positions = [0i64; MAX_OUTCOMES];
    positions[..outcome_count].copy_from_slice(&state.positions[..outcome_count]);
    let cost_basis: i64 = state.cost[..outcome_count].iter().sum::<i64>() / PRICE_SCALE;

    snapshots.push(Snapshot {
        timestamp: event.timestamp,
        delta: event.amount,
        price: event.price,
        positions,
        cost_basis,
        realized_pnl: state.realized_pnl,
        event_type: event.event_type,
        token_index: event.token_index,
        outcome_count: cond.outcome_count,
        _pad: [0; 5],
    });
}

/// Replays one user's full event vector, stable-sorted by timestamp —
/// equal timestamps keep their collection order, giving a deterministic
/// secondary key without widening `RawEvent`.
fn replay_user(mut events: Vec<RawEvent>, cond_info: &[ConditionInfo]) -> UserState {
    events.sort_by_key(|e| e.timestamp);

    let mut states: HashMap<u32, ReplayState> = HashMap::new();
    let mut snapshots_by_cond: HashMap<u32, Vec<Snapshot>> = HashMap::new();
    let mut order: Vec<u32> = Vec::new();

    for event in &events {
        let state = states.entry(event.cond_index).or_insert_with(|| {
            order.push(event.cond_index);
            ReplayState::default()
        });
        let cond = &cond_info[event.cond_index as usize];
        let snaps = snapshots_by_cond.entry(event.cond_index).or_default();
        apply_event(state, cond, event, snaps);
    }

    let histories = order
        .into_iter()
        .map(|cond_index| UserConditionHistory {
            cond_index,
            snapshots: snapshots_by_cond.remove(&cond_index).unwrap_or_default(),
        })
        .collect();

    UserState { histories }
}

/// Replays every user's bucket in parallel, partitioning `buckets` into
/// `W` contiguous index ranges. `buckets[i]` is taken (freed) as soon as
/// it is replayed, bounding peak memory to the unreplayed remainder.
pub fn run(mut buckets: Vec<Vec<RawEvent>>, cond_info: &[ConditionInfo]) -> Vec<UserState> {
    let n = buckets.len();
    let workers = worker_count().max(1).min(n.max(1));
    let mut results: Vec<Option<UserState>> = (0..n).map(|_| None).collect();

    if n == 0 {
        return Vec::new();
    }

    let chunk = n.div_ceil(workers);
    let mut slices: Vec<&mut [Vec<RawEvent>]> = Vec::new();
    let mut rest = buckets.as_mut_slice();
    while !rest.is_empty() {
        let take = chunk.min(rest.len());
        let (head, tail) = rest.split_at_mut(take);
        slices.push(head);
        rest = tail;
    }

    let mut output_slices: Vec<&mut [Option<UserState>]> = Vec::new();
    let mut rest_out = results.as_mut_slice();
    while !rest_out.is_empty() {
        let take = chunk.min(rest_out.len());
        let (head, tail) = rest_out.split_at_mut(take);
        output_slices.push(head);
        rest_out = tail;
    }

    std::thread::scope(|scope| {
        for (input, output) in slices.into_iter().zip(output_slices.into_iter()) {
            scope.spawn(move || {
                for (slot_in, slot_out) in input.iter_mut().zip(output.iter_mut()) {
                    let events = std::mem::take(slot_in);
                    *slot_out = Some(replay_user(events, cond_info));
                }
            });
        }
    });

    results.into_iter().map(|r| r.unwrap_or_default()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rebuild::types::{ALL_OUTCOMES, RawEvent};

    fn single_condition(outcome_count: u8) -> Vec<ConditionInfo> {
        vec![ConditionInfo {
            outcome_count,
            payout_numerators: Vec::new(),
            payout_denominator: 0,
        }]
    }

    #[test]
    fn buy_then_partial_sell() {
        let cond_info = single_condition(2);
        let events = vec![
            RawEvent::new(1, 0, EventType::Buy, 0, 100, 500_000),
            RawEvent::new(2, 0, EventType::Sell, 0, 40, 700_000),
        ];
        let state = replay_user(events, &cond_info);
        let snap = state.histories[0].snapshots.last().unwrap();
        assert_eq!(snap.positions[0], 60);
        assert_eq!(snap.realized_pnl, 8);
    }

    #[test]
    fn split_then_merge_nets_to_zero() {
        let cond_info = single_condition(2);
        let events = vec![
            RawEvent::new(1, 0, EventType::Split, ALL_OUTCOMES, 10, 0),
            RawEvent::new(2, 0, EventType::Merge, ALL_OUTCOMES, 10, 0),
        ];
        let state = replay_user(events, &cond_info);
        let snap = state.histories[0].snapshots.last().unwrap();
        assert_eq!(snap.positions[0], 0);
        assert_eq!(snap.positions[1], 0);
        assert_eq!(snap.realized_pnl, 0);
        assert_eq!(snap.cost_basis, 0);
    }

    #[test]
    fn redemption_yes_wins() {
        let cond_info = vec![ConditionInfo {
            outcome_count: 2,
            payout_numerators: vec![1, 0],
            payout_denominator: 1,
        }];
        let events = vec![
            RawEvent::new(1, 0, EventType::Buy, 0, 10, 400_000),
            RawEvent::new(2, 0, EventType::Redemption, ALL_OUTCOMES, 0, 0),
        ];
        let state = replay_user(events, &cond_info);
        let snap = state.histories[0].snapshots.last().unwrap();
        assert_eq!(snap.realized_pnl, 6);
        assert_eq!(snap.positions[0], 0);
    }

    #[test]
    fn sell_against_non_positive_position_is_noop() {
        let cond_info = single_condition(2);
        let events = vec![RawEvent::new(1, 0, EventType::Sell, 0, 40, 700_000)];
        let state = replay_user(events, &cond_info);
        let snap = state.histories[0].snapshots.last().unwrap();
        assert_eq!(snap.positions[0], 0);
        assert_eq!(snap.realized_pnl, 0);
    }

    #[test]
    fn redemption_on_unresolved_condition_is_noop() {
        let cond_info = single_condition(2);
        let events = vec![
            RawEvent::new(1, 0, EventType::Buy, 0, 10, 400_000),
            RawEvent::new(2, 0, EventType::Redemption, ALL_OUTCOMES, 0, 0),
        ];
        let state = replay_user(events, &cond_info);
        let snap = state.histories[0].snapshots.last().unwrap();
        assert_eq!(snap.positions[0], 10);
        assert_eq!(snap.realized_pnl, 0);
    }

    #[test]
    fn snapshot_count_equals_event_count_per_condition() {
        let cond_info = single_condition(2);
        let events = vec![
            RawEvent::new(1, 0, EventType::Buy, 0, 10, 500_000),
            RawEvent::new(2, 0, EventType::Buy, 1, 5, 200_000),
            RawEvent::new(3, 0, EventType::Sell, 0, 3, 600_000),
        ];
        let state = replay_user(events, &cond_info);
        assert_eq!(state.histories[0].snapshots.len(), 3);
    }

    #[test]
    fn events_are_sorted_by_timestamp_before_replay() {
        let cond_info = single_condition(2);
        let events = vec![
            RawEvent::new(5, 0, EventType::Buy, 0, 1, 100),
            RawEvent::new(1, 0, EventType::Buy, 0, 1, 100),
            RawEvent::new(3, 0, EventType::Buy, 0, 1, 100),
        ];
        let state = replay_user(events, &cond_info);
        let timestamps: Vec<i64> = state.histories[0].snapshots.iter().map(|s| s.timestamp).collect();
        assert_eq!(timestamps, vec![1, 3, 5]);
    }

    #[test]
    fn run_partitions_all_users_and_frees_buckets() {
        let cond_info = single_condition(2);
        let buckets = vec![
            vec![RawEvent::new(1, 0, EventType::Buy, 0, 10, 100)],
            vec![RawEvent::new(2, 0, EventType::Buy, 0, 20, 100)],
            vec![],
        ];
        let results = run(buckets, &cond_info);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].histories[0].snapshots.len(), 1);
        assert_eq!(results[1].histories[0].snapshots.len(), 1);
        assert!(results[2].histories.is_empty());
    }
}
