//! Entity Registry.
//!
//! The only site where entity-specific decisions live: wire fields,
//! storage schema, JSON-row -> SQL-values mapping, and sync mode —
//! one static table describing each entity, parameterized instead of
//! hand-written per call site.

use anyhow::{Context, Result};
use rusqlite::types::Value;
use serde_json::Value as Json;

/// Pagination strategy for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Order by `id` ascending; `where: { id_gt: <cursor> }`; no skip.
    Id,
    /// Order by a timestamp-like field that may tie across rows;
    /// `where: { <field>_gte: <cursor> }`, `skip: <cursor_skip>`.
    Timestamp,
    /// Same pagination shape as `Timestamp`, over the condition's
    /// resolution timestamp (which is null until settlement).
    ResolutionTs,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Id => "ID",
            SyncMode::Timestamp => "TIMESTAMP",
            SyncMode::ResolutionTs => "RESOLUTION_TS",
        }
    }

    pub fn uses_skip(&self) -> bool {
        !matches!(self, SyncMode::Id)
    }
}

/// Static description of one logical entity.
pub struct EntityDef {
    /// Registry key, also the wire entity name (singular).
    pub name: &'static str,
    /// Plural name used by the wire query (`plural(first: N, ...)`).
    pub plural: &'static str,
    /// Storage table name (default; a source's config may rename it).
    pub table: &'static str,
    /// Ordered wire field selections, including `{ id }` sub-selections
    /// for reference fields (e.g. `"market { id }"`).
    pub wire_fields: &'static [&'static str],
    /// `CREATE TABLE IF NOT EXISTS ...` DDL.
    pub ddl: &'static str,
    /// Ordered storage columns (first is always `id`).
    pub columns: &'static [&'static str],
    /// Pagination strategy.
    pub sync_mode: SyncMode,
    /// Wire field used for ordering: `"id"` for `Id` mode, otherwise the
    /// timestamp-like field name.
    pub order_field: &'static str,
    /// Maps one JSON row (as returned by the GraphQL response) to a
    /// positional list of SQL values matching `columns`.
    pub row_to_values: fn(&Json) -> Result<Vec<Value>>,
}

fn text(v: &Json, field: &str) -> Result<Value> {
    match v.get(field) {
        Some(Json::String(s)) => Ok(Value::Text(s.clone())),
        Some(Json::Null) | None => Ok(Value::Null),
        Some(other) => Ok(Value::Text(other.to_string())),
    }
}

fn reference_id(v: &Json, field: &str) -> Result<Value> {
    match v.get(field).and_then(|r| r.get("id")) {
        Some(Json::String(s)) => Ok(Value::Text(s.clone())),
        _ => Ok(Value::Null),
    }
}

fn int(v: &Json, field: &str) -> Result<Value> {
    match v.get(field) {
        Some(Json::Number(n)) => Ok(Value::Integer(n.as_i64().context("non-integer number")?)),
        Some(Json::String(s)) => Ok(Value::Integer(
            s.parse::<i64>().with_context(|| format!("parsing {field} as i64"))?,
        )),
        Some(Json::Null) | None => Ok(Value::Null),
        _ => anyhow::bail!("unexpected type for field {field}"),
    }
}

fn real(v: &Json, field: &str) -> Result<Value> {
    match v.get(field) {
        Some(Json::Number(n)) => Ok(Value::Real(n.as_f64().context("non-numeric number")?)),
        Some(Json::String(s)) => Ok(Value::Real(
            s.parse::<f64>().with_context(|| format!("parsing {field} as f64"))?,
        )),
        Some(Json::Null) | None => Ok(Value::Null),
        _ => anyhow::bail!("unexpected type for field {field}"),
    }
}

fn json_array_text(v: &Json, field: &str) -> Value {
    match v.get(field) {
        Some(arr @ Json::Array(_)) => Value::Text(arr.to_string()),
        _ => Value::Null,
    }
}

fn condition_row(v: &Json) -> Result<Vec<Value>> {
    Ok(vec![
        text(v, "id")?,
        text(v, "questionId")?,
        text(v, "oracle")?,
        int(v, "outcomeSlotCount")?,
        int(v, "resolutionTimestamp")?,
        json_array_text(v, "payoutNumerators"),
        int(v, "payoutDenominator")?,
    ])
}

fn pnl_condition_row(v: &Json) -> Result<Vec<Value>> {
    Ok(vec![text(v, "id")?, json_array_text(v, "positionIds")])
}

fn order_filled_row(v: &Json) -> Result<Vec<Value>> {
    Ok(vec![
        text(v, "id")?,
        int(v, "timestamp")?,
        text(v, "maker")?,
        text(v, "taker")?,
        reference_id(v, "market")?,
        text(v, "side")?,
        text(v, "size")?,
        text(v, "price")?,
    ])
}

fn split_merge_row(v: &Json) -> Result<Vec<Value>> {
    Ok(vec![
        text(v, "id")?,
        int(v, "timestamp")?,
        text(v, "stakeholder")?,
        reference_id(v, "condition")?,
        text(v, "amount")?,
    ])
}

fn redemption_row(v: &Json) -> Result<Vec<Value>> {
    Ok(vec![
        text(v, "id")?,
        int(v, "timestamp")?,
        text(v, "redeemer")?,
        reference_id(v, "condition")?,
        json_array_text(v, "indexSets"),
        text(v, "payout")?,
    ])
}

pub const CONDITION: EntityDef = EntityDef {
    name: "condition",
    plural: "conditions",
    table: "condition",
    wire_fields: &[
        "id",
        "questionId",
        "oracle",
        "outcomeSlotCount",
        "resolutionTimestamp",
        "payoutNumerators",
        "payoutDenominator",
    ],
    ddl: "CREATE TABLE IF NOT EXISTS condition (
        id TEXT PRIMARY KEY,
        question_id TEXT,
        oracle TEXT,
        outcome_slot_count INTEGER,
        resolution_timestamp INTEGER,
        payout_numerators TEXT,
        payout_denominator INTEGER
    )",
    columns: &[
        "id",
        "question_id",
        "oracle",
        "outcome_slot_count",
        "resolution_timestamp",
        "payout_numerators",
        "payout_denominator",
    ],
    sync_mode: SyncMode::ResolutionTs,
    order_field: "resolutionTimestamp",
    row_to_values: condition_row,
};

pub const PNL_CONDITION: EntityDef = EntityDef {
    name: "pnlCondition",
    plural: "pnlConditions",
    table: "pnl_condition",
    wire_fields: &["id", "positionIds"],
    ddl: "CREATE TABLE IF NOT EXISTS pnl_condition (
        id TEXT PRIMARY KEY,
        position_ids TEXT
    )",
    columns: &["id", "position_ids"],
    sync_mode: SyncMode::Id,
    order_field: "id",
    row_to_values: pnl_condition_row,
};

pub const ENRICHED_ORDER_FILLED: EntityDef = EntityDef {
    name: "enrichedOrderFilled",
    plural: "enrichedOrderFilleds",
    table: "enriched_order_filled",
    wire_fields: &["id", "timestamp", "maker", "taker", "market { id }", "side", "size", "price"],
    ddl: "CREATE TABLE IF NOT EXISTS enriched_order_filled (
        id TEXT PRIMARY KEY,
        timestamp INTEGER,
        maker TEXT,
        taker TEXT,
        market TEXT,
        side TEXT,
        size TEXT,
        price TEXT
    )",
    columns: &["id", "timestamp", "maker", "taker", "market", "side", "size", "price"],
    sync_mode: SyncMode::Timestamp,
    order_field: "timestamp",
    row_to_values: order_filled_row,
};

pub const SPLIT: EntityDef = EntityDef {
    name: "split",
    plural: "splits",
    table: "split",
    wire_fields: &["id", "timestamp", "stakeholder", "condition { id }", "amount"],
    ddl: "CREATE TABLE IF NOT EXISTS split (
        id TEXT PRIMARY KEY,
        timestamp INTEGER,
        stakeholder TEXT,
        condition TEXT,
        amount TEXT
    )",
    columns: &["id", "timestamp", "stakeholder", "condition", "amount"],
    sync_mode: SyncMode::Timestamp,
    order_field: "timestamp",
    row_to_values: split_merge_row,
};

pub const MERGE: EntityDef = EntityDef {
    name: "merge",
    plural: "merges",
    table: "merge",
    wire_fields: &["id", "timestamp", "stakeholder", "condition { id }", "amount"],
    ddl: "CREATE TABLE IF NOT EXISTS merge (
        id TEXT PRIMARY KEY,
        timestamp INTEGER,
        stakeholder TEXT,
        condition TEXT,
        amount TEXT
    )",
    columns: &["id", "timestamp", "stakeholder", "condition", "amount"],
    sync_mode: SyncMode::Timestamp,
    order_field: "timestamp",
    row_to_values: split_merge_row,
};

pub const REDEMPTION: EntityDef = EntityDef {
    name: "redemption",
    plural: "redemptions",
    table: "redemption",
    wire_fields: &["id", "timestamp", "redeemer", "condition { id }", "indexSets", "payout"],
    ddl: "CREATE TABLE IF NOT EXISTS redemption (
        id TEXT PRIMARY KEY,
        timestamp INTEGER,
        redeemer TEXT,
        condition TEXT,
        index_sets TEXT,
        payout TEXT
    )",
    columns: &["id", "timestamp", "redeemer", "condition", "index_sets", "payout"],
    sync_mode: SyncMode::Timestamp,
    order_field: "timestamp",
    row_to_values: redemption_row,
};

/// All registered entities, in sync order.
pub const ENTITIES: &[&EntityDef] = &[
    &CONDITION,
    &PNL_CONDITION,
    &ENRICHED_ORDER_FILLED,
    &SPLIT,
    &MERGE,
    &REDEMPTION,
];

pub fn by_name(name: &str) -> Option<&'static EntityDef> {
    ENTITIES.iter().find(|e| e.name == name).copied()
}
