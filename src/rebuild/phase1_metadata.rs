//! Rebuild Phase 1 — Metadata.
//!
//! Single pass over `condition`, joined against `pnl_condition` for the
//! `positionIds` array a separate feed supplies per condition.

use crate::rebuild::types::{ConditionInfo, Metadata, MAX_OUTCOMES};
use crate::store::Store;
use anyhow::{bail, Result};
use std::collections::HashMap;

fn parse_json_str_array(raw: Option<String>) -> Vec<String> {
    let Some(raw) = raw else { return Vec::new() };
    serde_json::from_str::<Vec<serde_json::Value>>(&raw)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| match v {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

fn parse_json_i64_array(raw: Option<String>) -> Vec<i64> {
    let Some(raw) = raw else { return Vec::new() };
    serde_json::from_str::<Vec<serde_json::Value>>(&raw)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| match v {
            serde_json::Value::String(s) => s.parse().ok(),
            serde_json::Value::Number(n) => n.as_i64(),
            _ => None,
        })
        .collect()
}

/// Runs Phase 1 against `store`. Fails fast on any schema violation
/// (`outcomeSlotCount` out of `[1, MAX_OUTCOMES]`, or a payout numerator
/// count mismatch).
pub fn run(store: &Store) -> Result<Metadata> {
    let mut position_ids_by_condition: HashMap<String, Vec<String>> = HashMap::new();
    store.scan("SELECT id, position_ids FROM pnl_condition", |row| {
        let id: String = row.get(0)?;
        let position_ids_json: Option<String> = row.get(1)?;
        position_ids_by_condition.insert(id, parse_json_str_array(position_ids_json));
        Ok(())
    })?;

    let mut metadata = Metadata::default();

    store.scan(
        "SELECT id, outcome_slot_count, payout_numerators, payout_denominator FROM condition ORDER BY rowid",
        |row| {
            let id: String = row.get(0)?;
            let outcome_slot_count: i64 = row.get(1)?;
            let payout_numerators_json: Option<String> = row.get(2)?;
            let payout_denominator: Option<i64> = row.get(3)?;

            if outcome_slot_count < 1 || outcome_slot_count as usize > MAX_OUTCOMES {
                bail!(
                    "condition {id} has outcomeSlotCount {outcome_slot_count} outside [1, {MAX_OUTCOMES}]"
                );
            }
            let outcome_count = outcome_slot_count as u8;

            let payout_numerators = parse_json_i64_array(payout_numerators_json);
            if !payout_numerators.is_empty() && payout_numerators.len() != outcome_count as usize {
                bail!(
                    "condition {id} has {} payout numerators but {outcome_count} outcomes",
                    payout_numerators.len()
                );
            }

            let cond_index = metadata.cond_ids.len() as u32;
            metadata.cond_ids.push(id.clone());
            metadata.cond_index_of.insert(id.clone(), cond_index);
            metadata.cond_info.push(ConditionInfo {
                outcome_count,
                payout_numerators,
                payout_denominator: payout_denominator.unwrap_or(0),
            });

            if let Some(token_ids) = position_ids_by_condition.get(&id) {
                for (i, token_id) in token_ids.iter().enumerate().take(outcome_count as usize) {
                    metadata.token_map.insert(token_id.clone(), (cond_index, i as u8));
                }
            }

            Ok(())
        },
    )?;

    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CONDITION, PNL_CONDITION};
    use rusqlite::types::Value;

    fn seed(store: &Store) {
        store.init_entity(&CONDITION).unwrap();
        store.init_entity(&PNL_CONDITION).unwrap();

        let rows = vec![vec![
            Value::Text("c1".into()),
            Value::Null,
            Value::Null,
            Value::Integer(2),
            Value::Null,
            Value::Null,
            Value::Null,
        ]];
        store
            .atomic_insert_with_cursor(&CONDITION, "condition", &rows, "s", "condition", "0", 0)
            .unwrap();

        let pnl_rows = vec![vec![
            Value::Text("c1".into()),
            Value::Text(r#"["tokA","tokB"]"#.into()),
        ]];
        store
            .atomic_insert_with_cursor(&PNL_CONDITION, "pnl_condition", &pnl_rows, "s", "pnlCondition", "c1", 0)
            .unwrap();
    }

    #[test]
    fn assigns_dense_index_and_token_map() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("t.db")).unwrap();
        seed(&store);

        let metadata = run(&store).unwrap();
        assert_eq!(metadata.condition_count(), 1);
        assert_eq!(metadata.cond_index_of["c1"], 0);
        assert_eq!(metadata.token_map["tokA"], (0, 0));
        assert_eq!(metadata.token_map["tokB"], (0, 1));
    }

    #[test]
    fn rejects_outcome_count_above_cap() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("t.db")).unwrap();
        store.init_entity(&CONDITION).unwrap();
        let rows = vec![vec![
            Value::Text("bad".into()),
            Value::Null,
            Value::Null,
            Value::Integer(9),
            Value::Null,
            Value::Null,
            Value::Null,
        ]];
        store
            .atomic_insert_with_cursor(&CONDITION, "condition", &rows, "s", "condition", "0", 0)
            .unwrap();

        assert!(run(&store).is_err());
    }
}
