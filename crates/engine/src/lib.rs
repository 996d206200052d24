//! Partitioned transfer reliability engine.
//!
//! Moves transfer records through their lifecycle with at-least-once
//! delivery and lock-free concurrent partition processing:
//! - the [`OutboxPublisher`] pushes unsent transfers to the broker and flags
//!   them sent;
//! - the [`RetryScheduler`] re-drives transfers whose retry time elapsed;
//! - the [`AccidentReconciler`] anti-joins task-expecting transfers against
//!   the task journal and re-triggers orphaned work;
//! - the [`IngestionService`] creates transfers idempotently on their
//!   external reference id.
//!
//! Cross-component races are resolved by idempotent, monotonic updates (the
//! published flag only advances, the journal is insert-if-absent), never by
//! locks.

pub mod config;
pub mod error;
pub mod ingest;
pub mod outbox;
pub mod reconcile;
pub mod retry;
pub mod runtime;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use ingest::{Ingested, IngestionService, NewTransfer};
pub use outbox::{
    BrokerError, BrokerPublisher, InMemoryBroker, OutboxConfig, OutboxPublisher, OutboxReport,
};
pub use reconcile::{
    AccidentReconciler, DispatchError, InMemoryDispatcher, ReconcileConfig, ReconcileCoverage,
    ReconcileReport, TaskDispatcher,
};
pub use retry::{RetryConfig, RetryHandler, RetryOutcome, RetryReport, RetryScheduler};
pub use runtime::{EngineRuntime, SweepSchedule};
