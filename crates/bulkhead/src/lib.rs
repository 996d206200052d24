//! Blocking-work bulkhead for the transfer reliability engine.
//!
//! A single cooperative dispatch loop must never stall on a slow store call,
//! so every blocking operation is routed through a worker pool with a hard
//! admission bound. When the pool is saturated, new submissions queue
//! instead of spawning unbounded workers; that queueing is the backpressure
//! upstream callers observe.

pub mod error;
pub mod pool;

pub use error::BulkheadError;
pub use pool::{Bulkhead, BulkheadConfig};
