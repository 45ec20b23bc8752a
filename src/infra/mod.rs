//! Infrastructure layer for herbtrace
//!
//! Contains the batch repository trait and its implementations:
//! - Batch storage (PostgreSQL, SQLite)
//! - Retry with backoff (transient database errors)
//! - Circuit breaker (ledger protection)

mod circuit_breaker;
mod error;
pub mod postgres;
mod retry;
pub(crate) mod rows;
pub mod sqlite;
mod traits;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use error::*;
pub use postgres::PgBatchRepository;
pub use retry::{is_retryable_db_error, Retry, RetryConfig, RetryResult};
pub use sqlite::SqliteBatchRepository;
pub use traits::*;
