//! Read models rendered from the batch store and the journal.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::auth::{FieldVisibility, ViewAudience};
use crate::domain::{
    Batch, BatchId, BatchStatus, LedgerSync, Location, ManufacturerUpdate, PrincipalId, QrCode,
    Quantity, Role, SyncState, Transition, TransitionRecord,
};
use crate::ledger::OnChainRecord;

/// Admin decision as shown to a reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionView {
    pub remarks: String,
    pub decided_by: Option<PrincipalId>,
    pub decided_at: DateTime<Utc>,
}

/// Milestone in a batch's journey
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Harvested,
    Verified,
    Rejected,
    Collected,
    Processed,
}

impl Stage {
    /// Detail-only manufacturer updates are not milestones.
    fn of(record: &TransitionRecord) -> Option<Stage> {
        match record.transition {
            Transition::Create => Some(Stage::Harvested),
            Transition::Verify => Some(Stage::Verified),
            Transition::Reject => Some(Stage::Rejected),
            Transition::Collect => Some(Stage::Collected),
            Transition::UpdateManufacturerDetails => (record.from_status
                == Some(BatchStatus::Collected)
                && record.to_status == BatchStatus::Processed)
                .then_some(Stage::Processed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub stage: Stage,
    pub at: DateTime<Utc>,
    pub actor_role: Role,
    pub actor_id: Option<PrincipalId>,
    pub tx_hash: Option<String>,
    pub ledger_state: SyncState,
}

/// Merged off-chain/on-chain view of one batch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchView {
    pub audience: ViewAudience,
    pub batch_id: BatchId,
    pub qr_code: QrCode,
    pub herb_name: String,
    pub quantity: Quantity,
    pub harvest_date: NaiveDate,
    pub location: Location,
    pub certifications: BTreeSet<String>,
    pub additional_info: Option<String>,
    pub photo_ref: Option<String>,
    pub status: BatchStatus,
    pub farmer_id: Option<PrincipalId>,
    pub collected_by: Option<PrincipalId>,
    pub admin_decision: Option<DecisionView>,
    pub manufacturer_update: Option<ManufacturerUpdate>,
    pub revision: u64,
    pub ledger_sync: LedgerSync,
    pub sync_label: &'static str,
    pub on_chain: Option<OnChainRecord>,
    pub on_chain_consistent: Option<bool>,
    pub timeline: Vec<TimelineEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BatchView {
    pub fn render(
        batch: Batch,
        history: &[TransitionRecord],
        on_chain: Option<OnChainRecord>,
        audience: ViewAudience,
    ) -> Self {
        let visible = FieldVisibility::for_audience(audience);
        let ids = |id: PrincipalId| visible.principal_ids.then_some(id);

        let on_chain_consistent = on_chain.as_ref().map(|record| {
            record.status == batch.status.as_str() && record.herb_name == batch.herb_name
        });

        let mut ledger_sync = batch.ledger_sync;
        if !visible.ledger_error {
            ledger_sync.last_error = None;
        }

        let manufacturer_update = batch.manufacturer_update.map(|mut update| {
            if !visible.principal_ids {
                update.updated_by = None;
            }
            update
        });

        let timeline = history
            .iter()
            .filter_map(|record| {
                Stage::of(record).map(|stage| TimelineEntry {
                    stage,
                    at: record.at,
                    actor_role: record.actor.role,
                    actor_id: ids(record.actor.id.clone()),
                    tx_hash: record.tx_hash.clone(),
                    ledger_state: record.ledger_state,
                })
            })
            .collect();

        Self {
            audience,
            batch_id: batch.batch_id,
            qr_code: batch.qr_code,
            herb_name: batch.herb_name,
            quantity: batch.quantity,
            harvest_date: batch.harvest_date,
            location: batch.location,
            certifications: batch.certifications,
            additional_info: batch.additional_info,
            photo_ref: batch.photo_ref,
            status: batch.status,
            farmer_id: ids(batch.farmer_id),
            collected_by: batch.collected_by.and_then(ids),
            admin_decision: batch.admin_decision.map(|d| DecisionView {
                remarks: d.remarks,
                decided_by: ids(d.decided_by.id),
                decided_at: d.decided_at,
            }),
            manufacturer_update,
            revision: batch.revision,
            sync_label: ledger_sync.state.label(),
            ledger_sync,
            on_chain,
            on_chain_consistent,
            timeline,
            created_at: batch.created_at,
            updated_at: batch.updated_at,
        }
    }
}

/// One row of a listing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch_id: BatchId,
    pub herb_name: String,
    pub quantity: Quantity,
    pub status: BatchStatus,
    pub harvest_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub qr_code: QrCode,
    pub ledger_state: SyncState,
}

impl From<Batch> for BatchSummary {
    fn from(batch: Batch) -> Self {
        Self {
            batch_id: batch.batch_id,
            herb_name: batch.herb_name,
            quantity: batch.quantity,
            status: batch.status,
            harvest_date: batch.harvest_date,
            created_at: batch.created_at,
            qr_code: batch.qr_code,
            ledger_state: batch.ledger_sync.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AdminDecision, Principal, QuantityUnit};

    fn verified_batch() -> (Batch, Vec<TransitionRecord>) {
        let now = Utc::now();
        let farmer = Principal::farmer("f-1");
        let admin = Principal::admin("a-1");
        let batch = Batch {
            batch_id: BatchId::from("VC-1"),
            qr_code: QrCode::from("qr-1"),
            farmer_id: farmer.id.clone(),
            herb_name: "Tulsi".into(),
            quantity: Quantity::new(10.0, QuantityUnit::Kg),
            harvest_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            location: Location::default(),
            certifications: BTreeSet::new(),
            additional_info: None,
            photo_ref: None,
            status: BatchStatus::Verified,
            collected_by: None,
            manufacturer_update: None,
            admin_decision: Some(AdminDecision {
                remarks: "looks good".into(),
                decided_by: admin.clone(),
                decided_at: now,
            }),
            revision: 2,
            ledger_sync: LedgerSync {
                state: SyncState::Failed,
                last_error: Some("unavailable: connection refused".into()),
                revision: 2,
                ..Default::default()
            },
            created_at: now,
            updated_at: now,
        };
        let record = |revision, transition, from_status, to_status, actor: &Principal| {
            TransitionRecord {
                batch_id: batch.batch_id.clone(),
                revision,
                transition,
                from_status,
                to_status,
                actor: actor.clone(),
                at: now,
                tx_hash: None,
                ledger_state: SyncState::Confirmed,
                ledger_error: None,
            }
        };
        let history = vec![
            record(1, Transition::Create, None, BatchStatus::PendingVerification, &farmer),
            record(
                2,
                Transition::Verify,
                Some(BatchStatus::PendingVerification),
                BatchStatus::Verified,
                &admin,
            ),
        ];
        (batch, history)
    }

    #[test]
    fn public_view_hides_ids_and_ledger_error() {
        let (batch, history) = verified_batch();
        let view = BatchView::render(batch, &history, None, ViewAudience::Public);

        assert_eq!(view.farmer_id, None);
        assert_eq!(view.admin_decision.as_ref().unwrap().decided_by, None);
        assert_eq!(view.ledger_sync.last_error, None);
        assert_eq!(view.sync_label, "blockchain sync failed");
        assert!(view.timeline.iter().all(|t| t.actor_id.is_none()));

        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("f-1") && !json.contains("a-1"), "{json}");
        assert!(!json.contains("connection refused"), "{json}");
    }

    #[test]
    fn participant_view_keeps_everything() {
        let (batch, history) = verified_batch();
        let view = BatchView::render(batch, &history, None, ViewAudience::Participant);

        assert_eq!(view.farmer_id, Some(PrincipalId::from("f-1")));
        assert!(view.ledger_sync.last_error.is_some());
        let stages: Vec<Stage> = view.timeline.iter().map(|t| t.stage).collect();
        assert_eq!(stages, vec![Stage::Harvested, Stage::Verified]);
        assert_eq!(view.on_chain_consistent, None);
    }

    #[test]
    fn on_chain_consistency_compares_status_and_name() {
        let (batch, history) = verified_batch();
        let on_chain = OnChainRecord {
            batch_id: batch.batch_id.clone(),
            herb_name: "Tulsi".into(),
            status: "pending_verification".into(),
            quantity_milli: 10_000,
            unit: "kg".into(),
            harvest_timestamp: 0,
            farmer_id: "f-1".into(),
        };
        let view = BatchView::render(batch, &history, Some(on_chain), ViewAudience::Participant);
        assert_eq!(view.on_chain_consistent, Some(false));
    }
}
