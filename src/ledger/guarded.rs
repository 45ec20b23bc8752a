//! Circuit-breaker wrapper around any ledger client.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{
    LedgerClient, LedgerError, ManufacturerSubmission, OnChainRecord, RecordSubmission,
    StatusSubmission, TxHash,
};
use crate::domain::BatchId;
use crate::infra::CircuitBreaker;

/// Fails fast with `Unavailable` while the circuit is open.
///
/// Only transport-level failures (timeouts, unreachable node) count against the
/// circuit; rejected writes count as successes.
pub struct CircuitBreakerLedger {
    inner: Arc<dyn LedgerClient>,
    breaker: Arc<CircuitBreaker>,
    call_timeout: Duration,
}

impl CircuitBreakerLedger {
    pub fn new(
        inner: Arc<dyn LedgerClient>,
        breaker: Arc<CircuitBreaker>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            inner,
            breaker,
            call_timeout,
        }
    }

    async fn guard<T, F>(&self, call: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        if !self.breaker.is_allowed().await {
            return Err(LedgerError::Unavailable(format!(
                "circuit {} open",
                self.breaker.name()
            )));
        }

        let result = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout),
        };

        match &result {
            Ok(_) | Err(LedgerError::Rejected(_)) => self.breaker.record_success().await,
            Err(LedgerError::Timeout) | Err(LedgerError::Unavailable(_)) => {
                self.breaker.record_failure().await
            }
        }
        result
    }
}

#[async_trait]
impl LedgerClient for CircuitBreakerLedger {
    async fn submit_record(&self, record: &RecordSubmission) -> Result<TxHash, LedgerError> {
        self.guard(self.inner.submit_record(record)).await
    }

    async fn submit_status_update(
        &self,
        update: &StatusSubmission,
    ) -> Result<TxHash, LedgerError> {
        self.guard(self.inner.submit_status_update(update)).await
    }

    async fn submit_manufacturer_update(
        &self,
        update: &ManufacturerSubmission,
    ) -> Result<TxHash, LedgerError> {
        self.guard(self.inner.submit_manufacturer_update(update)).await
    }

    async fn fetch_record(&self, batch_id: &BatchId) -> Result<Option<OnChainRecord>, LedgerError> {
        self.guard(self.inner.fetch_record(batch_id)).await
    }
}
