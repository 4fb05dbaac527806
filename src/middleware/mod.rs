//! Middleware for observability.
//!
//! Request logging with latency tracking, used by the read-only query façade.

pub mod logging;

pub use logging::request_logging_simple;
