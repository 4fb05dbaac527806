//! Rebuild Phase 2 — Event Collection.
//!
//! Four independent scans run on their own reader connections, each
//! building a thread-local `user_id -> events` bucket with no shared
//! mutable state; the buckets are merged afterwards, assigning dense
//! `user_index`es in first-sight order.

use crate::rebuild::types::{EventType, Metadata, RawEvent, ALL_OUTCOMES};
use crate::store::Store;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Progress counters, read by the status API while a scan is in flight.
#[derive(Debug, Default)]
pub struct CollectCounters {
    /// Total rows scanned across all four tables.
    pub eof_rows: AtomicU64,
    /// Total `RawEvent`s emitted (orders emit two per row; the rest, one).
    pub eof_events: AtomicU64,
    pub eof_orders: AtomicU64,
    pub eof_splits_merges: AtomicU64,
    pub eof_redemptions: AtomicU64,
}

pub struct CollectResult {
    pub user_ids: Vec<String>,
    pub user_index_of: HashMap<String, u32>,
    pub buckets: Vec<Vec<RawEvent>>,
    pub counters: CollectCounters,
}

/// Parses a plain signed integer amount column (already raw stablecoin units).
fn parse_amount(s: &str) -> Result<i64> {
    s.trim().parse::<i64>().with_context(|| format!("parsing amount {s:?}"))
}

/// Parses a decimal fraction in `[0, 1]` (e.g. `"0.5"`) into units scaled by
/// `10^6`, rounding half-up on the 7th fractional digit. Done with plain
/// string/integer arithmetic so the result is reproducible bit-for-bit
/// across platforms (no floating-point parsing in the replay path).
fn parse_scaled_price(s: &str) -> Result<i64> {
    let s = s.trim();
    let (neg, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (int_part, frac_part) = s.split_once('.').unwrap_or((s, ""));
    let int_val: i64 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().with_context(|| format!("parsing integer part of {s:?}"))?
    };

    let mut digits: Vec<i64> = Vec::with_capacity(7);
    for b in frac_part.bytes().take(7) {
        if !b.is_ascii_digit() {
            anyhow::bail!("non-digit in fractional part of {s:?}");
        }
        digits.push((b - b'0') as i64);
    }
    while digits.len() < 7 {
        digits.push(0);
    }

    let mut frac_val = 0i64;
    for d in &digits[..6] {
        frac_val = frac_val * 10 + d;
    }
    if digits[6] >= 5 {
        frac_val += 1;
    }

    let total = int_val * 1_000_000 + frac_val;
    Ok(if neg { -total } else { total })
}

type Bucket = HashMap<String, Vec<RawEvent>>;

fn scan_orders(store: &Store, metadata: &Metadata, counters: &CollectCounters) -> Result<Bucket> {
    let mut bucket: Bucket = HashMap::new();
    let mut rows = 0u64;
    let mut events = 0u64;

    store.scan(
        "SELECT timestamp, maker, taker, market, side, size, price FROM enriched_order_filled",
        |row| {
            rows += 1;
            let timestamp: i64 = row.get(0)?;
            let maker: String = row.get(1)?;
            let taker: String = row.get(2)?;
            let market: String = row.get(3)?;
            let side: String = row.get(4)?;
            let size: String = row.get(5)?;
            let price: String = row.get(6)?;

            let Some(&(cond_index, outcome_index)) = metadata.token_map.get(&market) else {
                return Ok(());
            };

            let amount = parse_amount(&size)?;
            let scaled_price = parse_scaled_price(&price)?;
            let taker_type = if side == "Buy" { EventType::Buy } else { EventType::Sell };
            let maker_type = if side == "Buy" { EventType::Sell } else { EventType::Buy };

            bucket.entry(taker).or_default().push(RawEvent::new(
                timestamp,
                cond_index,
                taker_type,
                outcome_index,
                amount,
                scaled_price,
            ));
            bucket.entry(maker).or_default().push(RawEvent::new(
                timestamp,
                cond_index,
                maker_type,
                outcome_index,
                amount,
                scaled_price,
            ));
            events += 2;
            Ok(())
        },
    )?;

    counters.eof_orders.fetch_add(rows, Ordering::Relaxed);
    counters.eof_rows.fetch_add(rows, Ordering::Relaxed);
    counters.eof_events.fetch_add(events, Ordering::Relaxed);
    Ok(bucket)
}

fn scan_split_merge(
    store: &Store,
    table: &str,
    event_type: EventType,
    metadata: &Metadata,
    counters: &CollectCounters,
) -> Result<Bucket> {
    let mut bucket: Bucket = HashMap::new();
    let mut rows = 0u64;
    let mut events = 0u64;

    store.scan(
        &format!("SELECT timestamp, stakeholder, condition, amount FROM {table}"),
        |row| {
            rows += 1;
            let timestamp: i64 = row.get(0)?;
            let stakeholder: String = row.get(1)?;
            let condition: String = row.get(2)?;
            let amount_raw: String = row.get(3)?;

            let Some(&cond_index) = metadata.cond_index_of.get(&condition) else {
                return Ok(());
            };
            let amount = parse_amount(&amount_raw)?;

            bucket
                .entry(stakeholder)
                .or_default()
                .push(RawEvent::new(timestamp, cond_index, event_type, ALL_OUTCOMES, amount, 0));
            events += 1;
            Ok(())
        },
    )?;

    counters.eof_splits_merges.fetch_add(rows, Ordering::Relaxed);
    counters.eof_rows.fetch_add(rows, Ordering::Relaxed);
    counters.eof_events.fetch_add(events, Ordering::Relaxed);
    Ok(bucket)
}

fn scan_redemptions(store: &Store, metadata: &Metadata, counters: &CollectCounters) -> Result<Bucket> {
    let mut bucket: Bucket = HashMap::new();
    let mut rows = 0u64;
    let mut events = 0u64;

    store.scan(
        "SELECT timestamp, redeemer, condition, payout FROM redemption",
        |row| {
            rows += 1;
            let timestamp: i64 = row.get(0)?;
            let redeemer: String = row.get(1)?;
            let condition: String = row.get(2)?;
            let payout_raw: String = row.get(3)?;

            let Some(&cond_index) = metadata.cond_index_of.get(&condition) else {
                return Ok(());
            };
            let payout = parse_amount(&payout_raw)?;

            bucket.entry(redeemer).or_default().push(RawEvent::new(
                timestamp,
                cond_index,
                EventType::Redemption,
                ALL_OUTCOMES,
                payout,
                0,
            ));
            events += 1;
            Ok(())
        },
    )?;

    counters.eof_redemptions.fetch_add(rows, Ordering::Relaxed);
    counters.eof_rows.fetch_add(rows, Ordering::Relaxed);
    counters.eof_events.fetch_add(events, Ordering::Relaxed);
    Ok(bucket)
}

pub fn run(store: &Store, metadata: &Metadata) -> Result<CollectResult> {
    let counters = CollectCounters::default();

    let (orders, splits, merges, redemptions) = std::thread::scope(|scope| {
        let orders_h = scope.spawn(|| scan_orders(store, metadata, &counters));
        let splits_h = scope.spawn(|| scan_split_merge(store, "split", EventType::Split, metadata, &counters));
        let merges_h = scope.spawn(|| scan_split_merge(store, "merge", EventType::Merge, metadata, &counters));
        let redemptions_h = scope.spawn(|| scan_redemptions(store, metadata, &counters));

        (
            orders_h.join().expect("orders scan thread panicked"),
            splits_h.join().expect("splits scan thread panicked"),
            merges_h.join().expect("merges scan thread panicked"),
            redemptions_h.join().expect("redemptions scan thread panicked"),
        )
    });

    let mut user_ids = Vec::new();
    let mut user_index_of: HashMap<String, u32> = HashMap::new();
    let mut buckets: Vec<Vec<RawEvent>> = Vec::new();

    for local in [orders?, splits?, merges?, redemptions?] {
        for (user_id, events) in local {
            let idx = *user_index_of.entry(user_id.clone()).or_insert_with(|| {
                user_ids.push(user_id.clone());
                buckets.push(Vec::new());
                (user_ids.len() - 1) as u32
            });
            buckets[idx as usize].extend(events);
        }
    }

    Ok(CollectResult {
        user_ids,
        user_index_of,
        buckets,
        counters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ENRICHED_ORDER_FILLED, MERGE, REDEMPTION, SPLIT};
    use rusqlite::types::Value;
    use std::sync::atomic::Ordering;

    fn metadata_with_one_condition() -> Metadata {
        let mut metadata = Metadata::default();
        metadata.cond_ids.push("c1".into());
        metadata.cond_index_of.insert("c1".into(), 0);
        metadata.token_map.insert("tokA".into(), (0, 0));
        metadata.token_map.insert("tokB".into(), (0, 1));
        metadata
    }

    #[test]
    fn parses_scaled_price_rounding_half_up() {
        assert_eq!(parse_scaled_price("0.5").unwrap(), 500_000);
        assert_eq!(parse_scaled_price("0.1234565").unwrap(), 123_457);
        assert_eq!(parse_scaled_price("1").unwrap(), 1_000_000);
        assert_eq!(parse_scaled_price("-0.25").unwrap(), -250_000);
    }

    #[test]
    fn order_row_emits_two_opposite_events() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("t.db")).unwrap();
        store.init_entity(&ENRICHED_ORDER_FILLED).unwrap();

        let rows = vec![vec![
            Value::Text("o1".into()),
            Value::Integer(100),
            Value::Text("maker1".into()),
            Value::Text("taker1".into()),
            Value::Text("tokA".into()),
            Value::Text("Buy".into()),
            Value::Text("100".into()),
            Value::Text("0.5".into()),
        ]];
        store
            .atomic_insert_with_cursor(&ENRICHED_ORDER_FILLED, "enriched_order_filled", &rows, "s", "enrichedOrderFilled", "100", 0)
            .unwrap();

        let metadata = metadata_with_one_condition();
        let result = run(&store, &metadata).unwrap();

        assert_eq!(result.user_ids.len(), 2);
        let taker_idx = result.user_index_of["taker1"];
        let maker_idx = result.user_index_of["maker1"];
        assert_eq!(result.buckets[taker_idx as usize][0].kind(), EventType::Buy);
        assert_eq!(result.buckets[maker_idx as usize][0].kind(), EventType::Sell);
        assert_eq!(result.counters.eof_events.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn foreign_market_order_skipped_silently() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("t.db")).unwrap();
        store.init_entity(&ENRICHED_ORDER_FILLED).unwrap();

        let rows = vec![vec![
            Value::Text("o1".into()),
            Value::Integer(100),
            Value::Text("maker1".into()),
            Value::Text("taker1".into()),
            Value::Text("unknown-token".into()),
            Value::Text("Buy".into()),
            Value::Text("100".into()),
            Value::Text("0.5".into()),
        ]];
        store
            .atomic_insert_with_cursor(&ENRICHED_ORDER_FILLED, "enriched_order_filled", &rows, "s", "enrichedOrderFilled", "100", 0)
            .unwrap();

        let metadata = metadata_with_one_condition();
        let result = run(&store, &metadata).unwrap();

        assert_eq!(result.user_ids.len(), 0);
        assert_eq!(result.counters.eof_events.load(Ordering::Relaxed), 0);
        assert_eq!(result.counters.eof_orders.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn split_and_merge_rows_emit_all_outcomes_events() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("t.db")).unwrap();
        store.init_entity(&SPLIT).unwrap();
        store.init_entity(&MERGE).unwrap();
        store.init_entity(&REDEMPTION).unwrap();

        let split_rows = vec![vec![
            Value::Text("s1".into()),
            Value::Integer(50),
            Value::Text("user1".into()),
            Value::Text("c1".into()),
            Value::Text("10".into()),
        ]];
        store
            .atomic_insert_with_cursor(&SPLIT, "split", &split_rows, "s", "split", "50", 0)
            .unwrap();

        let metadata = metadata_with_one_condition();
        let result = run(&store, &metadata).unwrap();

        assert_eq!(result.user_ids, vec!["user1".to_string()]);
        let events = &result.buckets[0];
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), EventType::Split);
        assert_eq!(events[0].token_index, ALL_OUTCOMES);
    }
}
