//! Transition planning.
//!
//! Given the current batch and a command, produce the exact post-state and
//! journal row to commit, or the error that stops it. Check order is fixed:
//! authorization, then current state, then payload. Nothing here touches
//! storage or the ledger.

use chrono::{DateTime, Utc};

use crate::auth;
use crate::domain::{
    AdminDecision, Batch, BatchId, BatchStatus, CreateBatchRequest, LedgerSync,
    ManufacturerDetails, ManufacturerUpdate, Principal, QrCode, SyncState, Transition,
    TransitionRecord, validate_remarks,
};
use crate::infra::{BatchError, BatchUpdate, Precondition, Result};

/// A transition on an existing batch, with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Verify { remarks: String },
    Reject { remarks: String },
    Collect,
    UpdateManufacturerDetails(ManufacturerDetails),
}

impl Command {
    pub fn transition(&self) -> Transition {
        match self {
            Command::Verify { .. } => Transition::Verify,
            Command::Reject { .. } => Transition::Reject,
            Command::Collect => Transition::Collect,
            Command::UpdateManufacturerDetails(_) => Transition::UpdateManufacturerDetails,
        }
    }
}

/// Build the initial record for a creation request.
///
/// A caller-supplied batch id is kept; otherwise one is generated with
/// `id_prefix`. The QR code is always fresh.
pub fn plan_creation(
    principal: &Principal,
    request: &CreateBatchRequest,
    id_prefix: &str,
    now: DateTime<Utc>,
) -> Result<(Batch, TransitionRecord)> {
    auth::authorize(principal, Transition::Create, None)?;
    let payload = request.validate()?;

    let revision = 1;
    let batch = Batch {
        batch_id: payload
            .batch_id
            .unwrap_or_else(|| BatchId::generate(id_prefix)),
        qr_code: QrCode::generate(),
        farmer_id: principal.id.clone(),
        herb_name: payload.herb_name,
        quantity: payload.quantity,
        harvest_date: payload.harvest_date,
        location: payload.location,
        certifications: payload.certifications,
        additional_info: payload.additional_info,
        photo_ref: payload.photo_ref,
        status: BatchStatus::PendingVerification,
        collected_by: None,
        manufacturer_update: None,
        admin_decision: None,
        revision,
        ledger_sync: LedgerSync::pending(Transition::Create.ledger_tx_kind(), revision, now),
        created_at: now,
        updated_at: now,
    };
    let record = journal_row(&batch, Transition::Create, None, principal, now);
    Ok((batch, record))
}

/// Plan `command` against `current`.
pub fn plan_transition(
    principal: &Principal,
    current: &Batch,
    command: &Command,
    now: DateTime<Utc>,
) -> Result<BatchUpdate> {
    let transition = command.transition();

    auth::authorize(principal, transition, Some(current))?;
    check_state(current, transition)?;

    let mut next = current.clone();
    match command {
        Command::Verify { remarks } | Command::Reject { remarks } => {
            let remarks = validate_remarks(remarks, transition == Transition::Reject)?;
            next.status = if transition == Transition::Verify {
                BatchStatus::Verified
            } else {
                BatchStatus::Rejected
            };
            next.admin_decision = Some(AdminDecision {
                remarks,
                decided_by: principal.clone(),
                decided_at: now,
            });
        }
        Command::Collect => {
            next.status = BatchStatus::Collected;
            next.collected_by = Some(principal.id.clone());
        }
        Command::UpdateManufacturerDetails(details) => {
            let details = details.validate()?;
            next.manufacturer_update = Some(merge_details(
                current.manufacturer_update.as_ref(),
                &details,
                principal,
                now,
            ));
            if details.advance_to_processed && current.status == BatchStatus::Collected {
                next.status = BatchStatus::Processed;
            }
        }
    }

    next.revision = current.revision + 1;
    next.updated_at = now;
    next.ledger_sync = LedgerSync::pending(transition.ledger_tx_kind(), next.revision, now);

    let record = journal_row(&next, transition, Some(current.status), principal, now);

    Ok(BatchUpdate {
        precondition: Precondition {
            expected_status: current.status,
            expected_revision: current.revision,
            require_uncollected: transition == Transition::Collect,
        },
        batch: next,
        record,
    })
}

fn check_state(current: &Batch, transition: Transition) -> Result<()> {
    if transition.expected_statuses().contains(&current.status) {
        return Ok(());
    }
    let err = BatchError::invalid_transition(&current.batch_id, transition, current.status);
    Err(match (&current.collected_by, transition) {
        (Some(collector), Transition::Collect) => {
            err.with_detail(format!("already collected by {collector}"))
        }
        _ => err,
    })
}

/// Present fields overwrite; absent fields keep their stored value.
fn merge_details(
    existing: Option<&ManufacturerUpdate>,
    details: &ManufacturerDetails,
    principal: &Principal,
    now: DateTime<Utc>,
) -> ManufacturerUpdate {
    let base = existing.cloned().unwrap_or_default();
    ManufacturerUpdate {
        processing_details: details
            .processing_details
            .clone()
            .or(base.processing_details),
        remarks: details.remarks.clone().or(base.remarks),
        storage_location: details.storage_location.clone().or(base.storage_location),
        batch_number: details.batch_number.clone().or(base.batch_number),
        updated_by: Some(principal.id.clone()),
        updated_at: Some(now),
    }
}

fn journal_row(
    batch: &Batch,
    transition: Transition,
    from_status: Option<BatchStatus>,
    actor: &Principal,
    at: DateTime<Utc>,
) -> TransitionRecord {
    TransitionRecord {
        batch_id: batch.batch_id.clone(),
        revision: batch.revision,
        transition,
        from_status,
        to_status: batch.status,
        actor: actor.clone(),
        at,
        tx_hash: None,
        ledger_state: SyncState::Pending,
        ledger_error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QuantityInput;

    fn request() -> CreateBatchRequest {
        CreateBatchRequest {
            herb_name: Some("Tulsi".into()),
            quantity: Some(QuantityInput::Number(10.0)),
            harvest_date: Some("2024-03-01".into()),
            ..Default::default()
        }
    }

    fn created() -> Batch {
        plan_creation(&Principal::farmer("f-1"), &request(), "VC", Utc::now())
            .unwrap()
            .0
    }

    fn step(batch: &Batch, principal: &Principal, command: Command) -> Result<Batch> {
        plan_transition(principal, batch, &command, Utc::now()).map(|u| u.batch)
    }

    #[test]
    fn creation_starts_pending_with_ledger_pending() {
        let b = created();
        assert_eq!(b.status, BatchStatus::PendingVerification);
        assert_eq!(b.revision, 1);
        assert_eq!(b.ledger_sync.state, SyncState::Pending);
        assert_eq!(b.farmer_id.as_str(), "f-1");
    }

    #[test]
    fn generated_ids_use_prefix_and_supplied_ids_are_kept() {
        let b = created();
        assert!(b.batch_id.as_str().starts_with("VC-"));
        assert_eq!(b.qr_code.as_str().len(), 32);

        let mut req = request();
        req.batch_id = Some("VC-1".into());
        let (b, record) = plan_creation(&Principal::farmer("f-1"), &req, "VC", Utc::now()).unwrap();
        assert_eq!(b.batch_id.as_str(), "VC-1");
        assert_eq!(record.from_status, None);
        assert_eq!(record.transition, Transition::Create);
    }

    #[test]
    fn non_farmer_cannot_create_even_with_bad_payload() {
        let err = plan_creation(
            &Principal::admin("a-1"),
            &CreateBatchRequest::default(),
            "VC",
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, BatchError::Forbidden { .. }));

        let err = plan_creation(
            &Principal::farmer("f-1"),
            &CreateBatchRequest::default(),
            "VC",
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, BatchError::ValidationFailed(_)));
    }

    #[test]
    fn verify_sets_decision_and_bumps_revision() {
        let b = created();
        let update = plan_transition(
            &Principal::admin("a-1"),
            &b,
            &Command::Verify {
                remarks: " looks good ".into(),
            },
            Utc::now(),
        )
        .unwrap();

        assert_eq!(update.batch.status, BatchStatus::Verified);
        assert_eq!(update.batch.revision, 2);
        assert_eq!(update.precondition.expected_revision, 1);
        assert_eq!(
            update.batch.admin_decision.as_ref().unwrap().remarks,
            "looks good"
        );
        assert_eq!(update.record.from_status, Some(BatchStatus::PendingVerification));
    }

    #[test]
    fn forbidden_is_reported_before_invalid_state() {
        let b = created();
        let err = step(&b, &Principal::farmer("f-1"), Command::Collect).unwrap_err();
        assert!(matches!(err, BatchError::Forbidden { .. }));
    }

    #[test]
    fn collect_before_verify_is_invalid() {
        let b = created();
        let err = step(&b, &Principal::manufacturer("m-1"), Command::Collect).unwrap_err();
        assert!(matches!(
            err,
            BatchError::InvalidTransition {
                current: BatchStatus::PendingVerification,
                ..
            }
        ));
    }

    #[test]
    fn second_collect_names_collector() {
        let b = created();
        let verify = Command::Verify {
            remarks: String::new(),
        };
        let b = step(&b, &Principal::admin("a-1"), verify).unwrap();
        let b = step(&b, &Principal::manufacturer("m-1"), Command::Collect).unwrap();
        assert_eq!(b.collected_by.as_ref().unwrap().as_str(), "m-1");

        let err = step(&b, &Principal::manufacturer("m-2"), Command::Collect).unwrap_err();
        assert!(err.to_string().contains("already collected by m-1"), "{err}");
    }

    #[test]
    fn reject_without_remarks_fails_validation_after_state_check() {
        let b = created();
        let reject = Command::Reject {
            remarks: " ".into(),
        };
        let err = step(&b, &Principal::admin("a-1"), reject).unwrap_err();
        assert!(matches!(err, BatchError::ValidationFailed(_)));
    }

    #[test]
    fn manufacturer_update_merges_and_advances() {
        let m1 = Principal::manufacturer("m-1");
        let b = created();
        let verify = Command::Verify {
            remarks: String::new(),
        };
        let b = step(&b, &Principal::admin("a-1"), verify).unwrap();
        let b = step(&b, &m1, Command::Collect).unwrap();

        let b = step(
            &b,
            &m1,
            Command::UpdateManufacturerDetails(ManufacturerDetails {
                processing_details: Some("dried".into()),
                storage_location: Some("WH-1".into()),
                ..Default::default()
            }),
        )
        .unwrap();
        assert_eq!(b.status, BatchStatus::Collected);

        let b = step(
            &b,
            &m1,
            Command::UpdateManufacturerDetails(ManufacturerDetails {
                storage_location: Some("WH-2".into()),
                advance_to_processed: true,
                ..Default::default()
            }),
        )
        .unwrap();
        let update = b.manufacturer_update.as_ref().unwrap();
        assert_eq!(b.status, BatchStatus::Processed);
        assert_eq!(update.processing_details.as_deref(), Some("dried"));
        assert_eq!(update.storage_location.as_deref(), Some("WH-2"));
        assert_eq!(b.revision, 5);

        // Processed is terminal for status but details stay editable.
        let b = step(
            &b,
            &m1,
            Command::UpdateManufacturerDetails(ManufacturerDetails {
                remarks: Some("shipped".into()),
                advance_to_processed: true,
                ..Default::default()
            }),
        )
        .unwrap();
        assert_eq!(b.status, BatchStatus::Processed);
    }

    #[test]
    fn terminal_rejected_accepts_nothing() {
        let b = created();
        let reject = Command::Reject {
            remarks: "mould".into(),
        };
        let b = step(&b, &Principal::admin("a-1"), reject).unwrap();
        for (principal, command) in [
            (Principal::admin("a-1"), Command::Verify { remarks: String::new() }),
            (Principal::admin("a-1"), Command::Reject { remarks: "again".into() }),
            (Principal::manufacturer("m-1"), Command::Collect),
        ] {
            assert!(matches!(
                step(&b, &principal, command),
                Err(BatchError::InvalidTransition { .. })
            ));
        }
    }
}
