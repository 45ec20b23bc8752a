//! Ledger client adapter
//!
//! The ledger is an external, append-only, independently failing service. The
//! lifecycle engine talks to it only through [`LedgerClient`], so the EVM
//! binding in [`evm`] can be swapped for a fake in tests.

pub mod evm;
mod guarded;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::{
    Batch, BatchId, BatchStatus, ManufacturerUpdate, Principal, Transition,
};

pub use evm::{EvmLedgerClient, LedgerConfig};
pub use guarded::CircuitBreakerLedger;

/// Classified failure of a ledger call. Never fails a transition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("timeout")]
    Timeout,

    /// The ledger answered and refused the write (revert, failed receipt)
    #[error("rejected: {0}")]
    Rejected(String),

    /// The ledger could not be reached or is not configured
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Timeout => "timeout",
            LedgerError::Rejected(_) => "rejected",
            LedgerError::Unavailable(_) => "unavailable",
        }
    }
}

/// Transaction reference returned by a successful ledger write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl TxHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Origin data written with a new record. Identity profile data (names,
/// emails) is not available here and never goes on-chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmerInfo {
    pub farmer_id: String,
    pub village: String,
    pub city: String,
    pub pincode: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSubmission {
    pub batch_id: BatchId,
    pub herb_name: String,
    pub farmer: FarmerInfo,
    /// Quantity in thousandths of `unit`
    pub quantity_milli: u64,
    pub unit: String,
    /// Harvest date as Unix seconds (midnight UTC)
    pub harvest_timestamp: i64,
    pub certifications: Vec<String>,
    pub additional_info: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSubmission {
    pub batch_id: BatchId,
    pub status: BatchStatus,
    pub remarks: String,
    pub actor: Principal,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManufacturerSubmission {
    pub batch_id: BatchId,
    pub processing_details: String,
    pub remarks: String,
    pub storage_location: String,
    pub batch_number: String,
    pub processed: bool,
}

/// Batch as read back from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnChainRecord {
    pub batch_id: BatchId,
    pub herb_name: String,
    pub status: String,
    pub quantity_milli: u64,
    pub unit: String,
    pub harvest_timestamp: i64,
    pub farmer_id: String,
}

/// The ledger contract, as seen by the lifecycle engine.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn submit_record(&self, record: &RecordSubmission) -> Result<TxHash, LedgerError>;

    async fn submit_status_update(&self, update: &StatusSubmission)
        -> Result<TxHash, LedgerError>;

    async fn submit_manufacturer_update(
        &self,
        update: &ManufacturerSubmission,
    ) -> Result<TxHash, LedgerError>;

    /// `Ok(None)` when the ledger has no record for the batch
    async fn fetch_record(&self, batch_id: &BatchId) -> Result<Option<OnChainRecord>, LedgerError>;
}

/// One pending ledger write, built from a committed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerWrite {
    Record(RecordSubmission),
    Status(StatusSubmission),
    Manufacturer(ManufacturerSubmission),
}

impl LedgerWrite {
    /// Build the ledger call mirroring `transition`, from the committed post-state.
    pub fn for_transition(transition: Transition, batch: &Batch, actor: &Principal) -> Self {
        match transition {
            Transition::Create => LedgerWrite::Record(RecordSubmission {
                batch_id: batch.batch_id.clone(),
                herb_name: batch.herb_name.clone(),
                farmer: FarmerInfo {
                    farmer_id: batch.farmer_id.to_string(),
                    village: batch.location.village.clone().unwrap_or_default(),
                    city: batch.location.city.clone().unwrap_or_default(),
                    pincode: batch.location.pincode.clone().unwrap_or_default(),
                    state: batch.location.state.clone().unwrap_or_default(),
                },
                quantity_milli: batch.quantity.milli_units(),
                unit: batch.quantity.unit.to_string(),
                harvest_timestamp: batch
                    .harvest_date
                    .and_hms_opt(0, 0, 0)
                    .map(|dt| dt.and_utc().timestamp())
                    .unwrap_or_default(),
                certifications: batch.certifications.iter().cloned().collect(),
                additional_info: batch.additional_info.clone().unwrap_or_default(),
            }),
            Transition::Verify | Transition::Reject | Transition::Collect => {
                let remarks = match transition {
                    Transition::Collect => String::new(),
                    _ => batch
                        .admin_decision
                        .as_ref()
                        .map(|d| d.remarks.clone())
                        .unwrap_or_default(),
                };
                LedgerWrite::Status(StatusSubmission {
                    batch_id: batch.batch_id.clone(),
                    status: batch.status,
                    remarks,
                    actor: actor.clone(),
                    at: batch.updated_at,
                })
            }
            Transition::UpdateManufacturerDetails => {
                let update = batch.manufacturer_update.clone().unwrap_or_default();
                LedgerWrite::Manufacturer(manufacturer_submission(
                    &batch.batch_id,
                    &update,
                    batch.status == BatchStatus::Processed,
                ))
            }
        }
    }

    pub async fn submit(&self, client: &dyn LedgerClient) -> Result<TxHash, LedgerError> {
        match self {
            LedgerWrite::Record(r) => client.submit_record(r).await,
            LedgerWrite::Status(s) => client.submit_status_update(s).await,
            LedgerWrite::Manufacturer(m) => client.submit_manufacturer_update(m).await,
        }
    }
}

fn manufacturer_submission(
    batch_id: &BatchId,
    update: &ManufacturerUpdate,
    processed: bool,
) -> ManufacturerSubmission {
    ManufacturerSubmission {
        batch_id: batch_id.clone(),
        processing_details: update.processing_details.clone().unwrap_or_default(),
        remarks: update.remarks.clone().unwrap_or_default(),
        storage_location: update.storage_location.clone().unwrap_or_default(),
        batch_number: update.batch_number.clone().unwrap_or_default(),
        processed,
    }
}

/// Used when no ledger is configured. Every write fails, so batches are marked
/// as failed to sync rather than silently treated as synced.
#[derive(Debug, Default, Clone)]
pub struct DisabledLedger;

const NOT_CONFIGURED: &str = "ledger not configured";

#[async_trait]
impl LedgerClient for DisabledLedger {
    async fn submit_record(&self, _record: &RecordSubmission) -> Result<TxHash, LedgerError> {
        Err(LedgerError::Unavailable(NOT_CONFIGURED.into()))
    }

    async fn submit_status_update(
        &self,
        _update: &StatusSubmission,
    ) -> Result<TxHash, LedgerError> {
        Err(LedgerError::Unavailable(NOT_CONFIGURED.into()))
    }

    async fn submit_manufacturer_update(
        &self,
        _update: &ManufacturerSubmission,
    ) -> Result<TxHash, LedgerError> {
        Err(LedgerError::Unavailable(NOT_CONFIGURED.into()))
    }

    async fn fetch_record(
        &self,
        _batch_id: &BatchId,
    ) -> Result<Option<OnChainRecord>, LedgerError> {
        Err(LedgerError::Unavailable(NOT_CONFIGURED.into()))
    }
}
