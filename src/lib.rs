//! Herbtrace Library
//!
//! Supply-chain tracking for herbal batches: a farmer registers a harvest, an
//! admin verifies or rejects it, a manufacturer collects and processes it.
//! Every step is committed to an authoritative off-chain store and then
//! mirrored to a blockchain ledger.
//!
//! ## Modules
//!
//! - [`domain`] - Batch, status, principal and request types
//! - [`auth`] - Role and ownership rules for transitions and views
//! - [`lifecycle`] - State machine and the dual-write engine
//! - [`ledger`] - Ledger client adapter (EVM contract binding)
//! - [`projection`] - Batch views and role-scoped listings
//! - [`infra`] - Batch repositories (PostgreSQL, SQLite), retry, circuit breaker
//! - [`metrics`] - In-process metrics
//! - [`telemetry`] - Structured logging setup
//! - [`service`] - Wiring from environment configuration

pub mod auth;
pub mod domain;
pub mod infra;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod migrations;
pub mod projection;
pub mod service;
pub mod telemetry;

// Re-export commonly used types
pub use domain::{
    Batch, BatchId, BatchStatus, CreateBatchRequest, ManufacturerDetails, Principal, QrCode,
    Role, SyncState, Transition,
};

pub use infra::{BatchError, BatchRepository, Result};
pub use ledger::{LedgerClient, LedgerError};
pub use lifecycle::{LedgerOutcome, LifecycleConfig, LifecycleEngine, TransitionOutcome, WriteMode};
pub use projection::{BatchSummary, BatchView, QueryService};
