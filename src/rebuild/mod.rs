//! PnL Rebuild Engine: batch replay of stored trade events into
//! per-user position and realized-PnL snapshot chains.

pub mod engine;
pub mod persistence;
pub mod phase1_metadata;
pub mod phase2_collect;
pub mod phase3_replay;
pub mod query;
pub mod types;

pub use engine::{RebuildEngine, RebuildPhase, RebuildStatus};
