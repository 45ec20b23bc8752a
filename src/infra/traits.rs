//! Trait definitions for the off-chain batch store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;

use crate::domain::{Batch, BatchId, BatchStatus, PrincipalId, QrCode, SyncState, TransitionRecord};

use super::Result;

/// Conditions a stored batch must still satisfy for a transition to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precondition {
    pub expected_status: BatchStatus,
    pub expected_revision: u64,
    /// Collect additionally requires that no collector is recorded yet.
    pub require_uncollected: bool,
}

/// A fully planned mutation: the post-state plus its journal row.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchUpdate {
    pub precondition: Precondition,
    pub batch: Batch,
    pub record: TransitionRecord,
}

/// Outcome of a ledger call, written back after the business commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerAnnotation {
    pub state: SyncState,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Which batches a listing may return.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BatchScope {
    #[default]
    All,
    /// Batches created by this farmer.
    Farmer(PrincipalId),
    /// Verified batches plus those collected by this manufacturer.
    Manufacturer(PrincipalId),
}

/// Listing filter. Results are ordered by creation time, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchFilter {
    pub scope: BatchScope,
    /// Empty means any status.
    pub statuses: Vec<BatchStatus>,
    pub ledger_state: Option<SyncState>,
    /// Only batches whose last ledger attempt started before this instant.
    pub attempted_before: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl BatchFilter {
    pub fn scoped(scope: BatchScope) -> Self {
        Self {
            scope,
            ..Default::default()
        }
    }

    pub fn with_statuses(mut self, statuses: Vec<BatchStatus>) -> Self {
        self.statuses = statuses;
        self
    }

    pub fn with_ledger_state(mut self, state: SyncState) -> Self {
        self.ledger_state = Some(state);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Authoritative off-chain store for batches.
///
/// Every business mutation is a single atomic conditional write; there is no
/// read-modify-write path.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BatchRepository: Send + Sync {
    /// Insert a new batch with its creation journal row.
    ///
    /// Fails with `DuplicateBatch` if the batch id or QR code is taken.
    async fn insert(&self, batch: &Batch, record: &TransitionRecord) -> Result<()>;

    /// Get a batch by id
    async fn get(&self, batch_id: &BatchId) -> Result<Option<Batch>>;

    /// Get a batch by its public QR code
    async fn get_by_qr(&self, qr_code: &QrCode) -> Result<Option<Batch>>;

    /// Commit `update.batch` if the stored batch still matches the
    /// precondition. Returns false when the compare-and-set lost.
    async fn apply_transition(&self, update: &BatchUpdate) -> Result<bool>;

    /// Record a ledger outcome for `revision`.
    ///
    /// The journal row is always updated. The batch's `ledger_sync` is only
    /// updated while it still describes `revision`; returns whether it was.
    async fn record_ledger_outcome(
        &self,
        batch_id: &BatchId,
        revision: u64,
        annotation: &LedgerAnnotation,
    ) -> Result<bool>;

    /// List batches matching a filter, newest first
    async fn list(&self, filter: &BatchFilter) -> Result<Vec<Batch>>;

    /// Journal of committed transitions, oldest first
    async fn history(&self, batch_id: &BatchId) -> Result<Vec<TransitionRecord>>;
}
