//! In-memory entities for the PnL rebuild engine.
//!
//! `RawEvent` and `Snapshot` are deliberately fixed-width, cache-friendly
//! records — dense integer indices everywhere instead of hashing on
//! string ids, keeping hot-path event structs plain-old-data.

use std::collections::HashMap;

pub const MAX_OUTCOMES: usize = 8;
/// Fixed-point scale for prices (1.0 == `PRICE_SCALE`).
pub const PRICE_SCALE: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventType {
    Buy = 0,
    Sell = 1,
    Split = 2,
    Merge = 3,
    Redemption = 4,
}

impl EventType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => EventType::Buy,
            1 => EventType::Sell,
            2 => EventType::Split,
            3 => EventType::Merge,
            4 => EventType::Redemption,
            other => panic!("invalid EventType discriminant {other}"),
        }
    }
}

/// Sentinel `token_index` meaning "all outcomes of the condition"
/// (split/merge/redemption events, which are not tied to one outcome).
pub const ALL_OUTCOMES: u8 = 0xFF;

/// Exactly 32 bytes: `8 + 4 + 1 + 1 + 2 + 8 + 8`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct RawEvent {
    pub timestamp: i64,
    pub cond_index: u32,
    pub event_type: u8,
    pub token_index: u8,
    pub _pad: u16,
    pub amount: i64,
    pub price: i64,
}

const _: () = assert!(std::mem::size_of::<RawEvent>() == 32);

impl RawEvent {
    pub fn new(timestamp: i64, cond_index: u32, event_type: EventType, token_index: u8, amount: i64, price: i64) -> Self {
        Self {
            timestamp,
            cond_index,
            event_type: event_type as u8,
            token_index,
            _pad: 0,
            amount,
            price,
        }
    }

    pub fn kind(&self) -> EventType {
        EventType::from_u8(self.event_type)
    }
}

/// Exactly 112 bytes: `8*3 + 8*8 + 8*2 + 1*3 + 5`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Snapshot {
    pub timestamp: i64,
    pub delta: i64,
    pub price: i64,
    pub positions: [i64; MAX_OUTCOMES],
    pub cost_basis: i64,
    pub realized_pnl: i64,
    pub event_type: u8,
    pub token_index: u8,
    pub outcome_count: u8,
    pub _pad: [u8; 5],
}

const _: () = assert!(std::mem::size_of::<Snapshot>() == 112);

/// Per-outcome replay state for one `(user, condition)` pair.
#[derive(Debug, Clone, Copy)]
pub struct ReplayState {
    pub positions: [i64; MAX_OUTCOMES],
    pub cost: [i64; MAX_OUTCOMES],
    pub realized_pnl: i64,
}

impl Default for ReplayState {
    fn default() -> Self {
        Self {
            positions: [0; MAX_OUTCOMES],
            cost: [0; MAX_OUTCOMES],
            realized_pnl: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConditionInfo {
    pub outcome_count: u8,
    pub payout_numerators: Vec<i64>,
    pub payout_denominator: i64,
}

#[derive(Debug, Clone)]
pub struct UserConditionHistory {
    pub cond_index: u32,
    pub snapshots: Vec<Snapshot>,
}

#[derive(Debug, Clone, Default)]
pub struct UserState {
    pub histories: Vec<UserConditionHistory>,
}

/// Frozen-after-Phase-1 metadata shared read-only by Phases 2 and 3.
#[derive(Debug, Default)]
pub struct Metadata {
    pub cond_ids: Vec<String>,
    pub cond_index_of: HashMap<String, u32>,
    pub cond_info: Vec<ConditionInfo>,
    /// token_id -> (cond_index, outcome_index)
    pub token_map: HashMap<String, (u32, u8)>,
}

impl Metadata {
    pub fn condition_count(&self) -> usize {
        self.cond_ids.len()
    }
}
