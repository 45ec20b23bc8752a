//! Batch aggregate and its value types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::types::{BatchId, Principal, PrincipalId, QrCode};

/// Lifecycle status of a batch.
///
/// ```text
/// PendingVerification ─┬─> Verified ──> Collected ──> Processed
///                      └─> Rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    PendingVerification,
    Verified,
    Rejected,
    Collected,
    Processed,
}

impl BatchStatus {
    pub const ALL: [BatchStatus; 5] = [
        BatchStatus::PendingVerification,
        BatchStatus::Verified,
        BatchStatus::Rejected,
        BatchStatus::Collected,
        BatchStatus::Processed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::PendingVerification => "pending_verification",
            BatchStatus::Verified => "verified",
            BatchStatus::Rejected => "rejected",
            BatchStatus::Collected => "collected",
            BatchStatus::Processed => "processed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Rejected | BatchStatus::Processed)
    }

    /// Distance from creation along the lifecycle. Strictly increases on every
    /// status change.
    pub fn rank(&self) -> u8 {
        match self {
            BatchStatus::PendingVerification => 0,
            BatchStatus::Verified | BatchStatus::Rejected => 1,
            BatchStatus::Collected => 2,
            BatchStatus::Processed => 3,
        }
    }

    /// Whether a batch may move from `self` to `next` in one step.
    pub fn can_advance_to(&self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (BatchStatus::PendingVerification, BatchStatus::Verified)
                | (BatchStatus::PendingVerification, BatchStatus::Rejected)
                | (BatchStatus::Verified, BatchStatus::Collected)
                | (BatchStatus::Collected, BatchStatus::Processed)
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pending_verification" | "pending" => Ok(BatchStatus::PendingVerification),
            "verified" => Ok(BatchStatus::Verified),
            "rejected" => Ok(BatchStatus::Rejected),
            "collected" => Ok(BatchStatus::Collected),
            "processed" => Ok(BatchStatus::Processed),
            other => Err(format!("unknown batch status: {other}")),
        }
    }
}

/// Unit of a harvested quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantityUnit {
    #[default]
    Kg,
    G,
    Lb,
}

impl QuantityUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuantityUnit::Kg => "kg",
            QuantityUnit::G => "g",
            QuantityUnit::Lb => "lb",
        }
    }
}

impl fmt::Display for QuantityUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuantityUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kg" => Ok(QuantityUnit::Kg),
            "g" => Ok(QuantityUnit::G),
            "lb" => Ok(QuantityUnit::Lb),
            other => Err(format!("unsupported unit: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: QuantityUnit,
}

impl Quantity {
    pub fn new(value: f64, unit: QuantityUnit) -> Self {
        Self { value, unit }
    }

    /// Value in thousandths of the unit, as written to the ledger.
    pub fn milli_units(&self) -> u64 {
        (self.value * 1000.0).round().max(0.0) as u64
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// Where the herb was harvested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub village: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pincode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Processing details recorded by the collecting manufacturer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManufacturerUpdate {
    pub processing_details: Option<String>,
    pub remarks: Option<String>,
    pub storage_location: Option<String>,
    pub batch_number: Option<String>,
    pub updated_by: Option<PrincipalId>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Verification or rejection decision taken by an admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminDecision {
    pub remarks: String,
    pub decided_by: Principal,
    pub decided_at: DateTime<Utc>,
}

/// Ledger reflection state of the most recent ledger-bound mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Unsynced,
    Pending,
    Confirmed,
    Failed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Unsynced => "unsynced",
            SyncState::Pending => "pending",
            SyncState::Confirmed => "confirmed",
            SyncState::Failed => "failed",
        }
    }

    /// Label shown next to the business status.
    pub fn label(&self) -> &'static str {
        match self {
            SyncState::Unsynced => "not submitted to blockchain",
            SyncState::Pending => "pending blockchain confirmation",
            SyncState::Confirmed => "confirmed on blockchain",
            SyncState::Failed => "blockchain sync failed",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unsynced" => Ok(SyncState::Unsynced),
            "pending" => Ok(SyncState::Pending),
            "confirmed" => Ok(SyncState::Confirmed),
            "failed" => Ok(SyncState::Failed),
            other => Err(format!("unknown sync state: {other}")),
        }
    }
}

/// Which ledger call a mutation is mirrored with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerTxKind {
    Record,
    StatusUpdate,
    ManufacturerUpdate,
}

impl LedgerTxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerTxKind::Record => "record",
            LedgerTxKind::StatusUpdate => "status_update",
            LedgerTxKind::ManufacturerUpdate => "manufacturer_update",
        }
    }
}

impl fmt::Display for LedgerTxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerTxKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "record" => Ok(LedgerTxKind::Record),
            "status_update" => Ok(LedgerTxKind::StatusUpdate),
            "manufacturer_update" => Ok(LedgerTxKind::ManufacturerUpdate),
            other => Err(format!("unknown ledger tx kind: {other}")),
        }
    }
}

/// Dual-write bookkeeping. Only the lifecycle engine writes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSync {
    pub last_attempted_tx_kind: Option<LedgerTxKind>,
    pub tx_hash: Option<String>,
    pub state: SyncState,
    pub last_error: Option<String>,
    /// Batch revision whose ledger write this annotation describes.
    pub revision: u64,
    pub attempted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl LedgerSync {
    /// Annotation committed together with a business mutation.
    pub fn pending(kind: LedgerTxKind, revision: u64, at: DateTime<Utc>) -> Self {
        Self {
            last_attempted_tx_kind: Some(kind),
            tx_hash: None,
            state: SyncState::Pending,
            last_error: None,
            revision,
            attempted_at: Some(at),
            completed_at: None,
        }
    }
}

/// The aggregate root: one farmer-submitted harvest traced through processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub batch_id: BatchId,
    pub qr_code: QrCode,
    pub farmer_id: PrincipalId,
    pub herb_name: String,
    pub quantity: Quantity,
    pub harvest_date: NaiveDate,
    pub location: Location,
    pub certifications: BTreeSet<String>,
    pub additional_info: Option<String>,
    pub photo_ref: Option<String>,
    pub status: BatchStatus,
    pub collected_by: Option<PrincipalId>,
    pub manufacturer_update: Option<ManufacturerUpdate>,
    pub admin_decision: Option<AdminDecision>,
    pub revision: u64,
    pub ledger_sync: LedgerSync,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    pub fn is_collected_by(&self, id: &PrincipalId) -> bool {
        self.collected_by.as_ref() == Some(id)
    }
}
