//! Lifecycle transitions and the per-batch transition journal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::batch::{BatchStatus, LedgerTxKind, SyncState};
use super::types::{BatchId, Principal, Role};

/// A request to move a batch through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Create,
    Verify,
    Reject,
    Collect,
    UpdateManufacturerDetails,
}

impl Transition {
    pub const ALL: [Transition; 5] = [
        Transition::Create,
        Transition::Verify,
        Transition::Reject,
        Transition::Collect,
        Transition::UpdateManufacturerDetails,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Create => "create",
            Transition::Verify => "verify",
            Transition::Reject => "reject",
            Transition::Collect => "collect",
            Transition::UpdateManufacturerDetails => "update_manufacturer_details",
        }
    }

    /// The only role allowed to invoke this transition.
    pub fn allowed_role(&self) -> Role {
        match self {
            Transition::Create => Role::Farmer,
            Transition::Verify | Transition::Reject => Role::Admin,
            Transition::Collect | Transition::UpdateManufacturerDetails => Role::Manufacturer,
        }
    }

    /// Statuses a batch must be in for this transition to apply.
    pub fn expected_statuses(&self) -> &'static [BatchStatus] {
        match self {
            Transition::Create => &[],
            Transition::Verify | Transition::Reject => &[BatchStatus::PendingVerification],
            Transition::Collect => &[BatchStatus::Verified],
            Transition::UpdateManufacturerDetails => {
                &[BatchStatus::Collected, BatchStatus::Processed]
            }
        }
    }

    pub fn ledger_tx_kind(&self) -> LedgerTxKind {
        match self {
            Transition::Create => LedgerTxKind::Record,
            Transition::Verify | Transition::Reject | Transition::Collect => {
                LedgerTxKind::StatusUpdate
            }
            Transition::UpdateManufacturerDetails => LedgerTxKind::ManufacturerUpdate,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Transition::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown transition: {s}"))
    }
}

/// One committed transition, appended in the same write as the mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    pub batch_id: BatchId,
    pub revision: u64,
    pub transition: Transition,
    pub from_status: Option<BatchStatus>,
    pub to_status: BatchStatus,
    pub actor: Principal,
    pub at: DateTime<Utc>,
    pub tx_hash: Option<String>,
    pub ledger_state: SyncState,
    pub ledger_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_round_trip_through_str() {
        for t in Transition::ALL {
            assert_eq!(t.as_str().parse::<Transition>().unwrap(), t);
        }
    }

    #[test]
    fn collect_only_from_verified() {
        assert_eq!(
            Transition::Collect.expected_statuses(),
            &[BatchStatus::Verified]
        );
    }

    #[test]
    fn ledger_kinds() {
        assert_eq!(Transition::Create.ledger_tx_kind(), LedgerTxKind::Record);
        assert_eq!(Transition::Reject.ledger_tx_kind(), LedgerTxKind::StatusUpdate);
        assert_eq!(
            Transition::UpdateManufacturerDetails.ledger_tx_kind(),
            LedgerTxKind::ManufacturerUpdate
        );
    }
}
