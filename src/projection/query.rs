//! Read-only access to batches for consumers, participants and operators.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::view::{BatchSummary, BatchView};
use crate::auth::{self, ViewAudience};
use crate::domain::{Batch, BatchId, BatchStatus, Principal, QrCode, Role, SyncState};
use crate::infra::{BatchError, BatchFilter, BatchRepository, BatchScope, Result};
use crate::ledger::{LedgerClient, OnChainRecord};

/// Cap on role-scoped listings
pub const DEFAULT_LIST_LIMIT: u32 = 100;

/// Statuses listed for a role when the caller gives no filter
pub fn default_statuses(role: Role) -> Vec<BatchStatus> {
    match role {
        Role::Farmer => BatchStatus::ALL.to_vec(),
        Role::Admin => vec![BatchStatus::PendingVerification],
        Role::Manufacturer => vec![BatchStatus::Verified, BatchStatus::Collected],
    }
}

/// Batches a role may list at all
pub fn scope_for(principal: &Principal) -> BatchScope {
    match principal.role {
        Role::Farmer => BatchScope::Farmer(principal.id.clone()),
        Role::Admin => BatchScope::All,
        Role::Manufacturer => BatchScope::Manufacturer(principal.id.clone()),
    }
}

pub struct QueryService {
    repo: Arc<dyn BatchRepository>,
    ledger: Arc<dyn LedgerClient>,
    ledger_timeout: Duration,
}

impl QueryService {
    pub fn new(
        repo: Arc<dyn BatchRepository>,
        ledger: Arc<dyn LedgerClient>,
        ledger_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            ledger,
            ledger_timeout,
        }
    }

    /// Public (QR) view. Resolves a batch id first, then a QR code.
    pub async fn get_batch_view(&self, id_or_qr: &str) -> Result<BatchView> {
        let batch = self.resolve(id_or_qr).await?;
        self.render(batch, ViewAudience::Public).await
    }

    /// Participant view, subject to the caller's view rights.
    pub async fn get_batch_view_as(
        &self,
        principal: &Principal,
        id_or_qr: &str,
    ) -> Result<BatchView> {
        let batch = self.resolve(id_or_qr).await?;
        auth::authorize_view(principal, &batch)?;
        self.render(batch, ViewAudience::Participant).await
    }

    /// Role-scoped listing, newest first.
    ///
    /// `statuses` narrows the role's scope; a status the role cannot see
    /// yields nothing.
    pub async fn list_by_role_and_status(
        &self,
        principal: &Principal,
        statuses: Option<Vec<BatchStatus>>,
    ) -> Result<Vec<BatchSummary>> {
        let statuses = match statuses {
            Some(s) if !s.is_empty() => s,
            _ => default_statuses(principal.role),
        };
        let filter = BatchFilter::scoped(scope_for(principal))
            .with_statuses(statuses)
            .with_limit(DEFAULT_LIST_LIMIT);
        self.summaries(&filter).await
    }

    /// Batches whose latest ledger write failed, newest first.
    pub async fn list_sync_failures(&self, limit: u32) -> Result<Vec<BatchSummary>> {
        let filter = BatchFilter::default()
            .with_ledger_state(SyncState::Failed)
            .with_limit(limit);
        self.summaries(&filter).await
    }

    /// Batches still pending a ledger outcome whose attempt started before
    /// `now - older_than`.
    pub async fn list_stale_pending(
        &self,
        older_than: Duration,
        limit: u32,
    ) -> Result<Vec<BatchSummary>> {
        let cutoff = cutoff(Utc::now(), older_than)?;
        let filter = BatchFilter {
            attempted_before: Some(cutoff),
            ..BatchFilter::default()
                .with_ledger_state(SyncState::Pending)
                .with_limit(limit)
        };
        self.summaries(&filter).await
    }

    async fn summaries(&self, filter: &BatchFilter) -> Result<Vec<BatchSummary>> {
        let batches = self.repo.list(filter).await?;
        Ok(batches.into_iter().map(BatchSummary::from).collect())
    }

    /// QR-shaped keys resolve by QR code only; anything else by batch id,
    /// then QR code.
    async fn resolve(&self, id_or_qr: &str) -> Result<Batch> {
        let key = id_or_qr.trim();
        let found = if QrCode::is_token_shaped(key) {
            self.repo.get_by_qr(&QrCode::from(key)).await?
        } else {
            let by_id = if BatchId::is_well_formed(key) {
                self.repo.get(&BatchId::from(key)).await?
            } else {
                None
            };
            match by_id {
                Some(batch) => Some(batch),
                None => self.repo.get_by_qr(&QrCode::from(key)).await?,
            }
        };
        found.ok_or_else(|| BatchError::NotFound(key.to_string()))
    }

    async fn render(&self, batch: Batch, audience: ViewAudience) -> Result<BatchView> {
        let history = self.repo.history(&batch.batch_id).await?;
        let on_chain = if batch.ledger_sync.state == SyncState::Unsynced {
            None
        } else {
            self.fetch_on_chain(&batch.batch_id).await
        };
        Ok(BatchView::render(batch, &history, on_chain, audience))
    }

    /// Best effort: any failure or a slow ledger just drops the on-chain part.
    async fn fetch_on_chain(&self, batch_id: &BatchId) -> Option<OnChainRecord> {
        match tokio::time::timeout(self.ledger_timeout, self.ledger.fetch_record(batch_id)).await {
            Ok(Ok(record)) => record,
            Ok(Err(e)) => {
                debug!(batch_id = %batch_id, error = %e, "on-chain record unavailable");
                None
            }
            Err(_) => {
                warn!(batch_id = %batch_id, "on-chain lookup timed out");
                None
            }
        }
    }
}

fn cutoff(now: DateTime<Utc>, older_than: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(older_than)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .ok_or_else(|| BatchError::ValidationFailed(format!("age {older_than:?} out of range")))
}
