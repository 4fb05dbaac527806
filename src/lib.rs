//! Prediction-market GraphQL sync and PnL rebuild library.
//!
//! Two subsystems: an incremental GraphQL [`sync`] engine that pulls
//! entities into the [`store`] under bounded concurrency, and a batch
//! [`rebuild`] engine that replays the stored events into per-user
//! position/PnL snapshot chains. [`api`] exposes both read-only over
//! HTTP.

pub mod api;
pub mod config;
pub mod http_pool;
pub mod middleware;
pub mod rebuild;
pub mod registry;
pub mod stats;
pub mod store;
pub mod sync;

pub use config::Config;
pub use rebuild::RebuildEngine;
pub use stats::StatsLedger;
pub use store::Store;
pub use sync::SyncCoordinator;
