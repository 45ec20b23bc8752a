//! Property-based tests using proptest.
//!
//! These tests drive the pure state machine with arbitrary command sequences
//! and check the invariants that must hold after every step.

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use herbtrace::auth::{can_perform, Decision};
use herbtrace::domain::{
    Batch, BatchStatus, CreateBatchRequest, Location, ManufacturerDetails, Principal,
    QuantityInput, Role, Transition,
};
use herbtrace::infra::BatchError;
use herbtrace::lifecycle::{plan_creation, plan_transition, Command};

// ============================================================================
// Custom Strategies
// ============================================================================

fn arb_principal() -> impl Strategy<Value = Principal> {
    prop_oneof![
        Just(Principal::farmer("farmer-F")),
        Just(Principal::farmer("farmer-G")),
        Just(Principal::admin("admin-A")),
        Just(Principal::manufacturer("m-1")),
        Just(Principal::manufacturer("m-2")),
    ]
}

fn arb_details() -> impl Strategy<Value = ManufacturerDetails> {
    (
        proptest::option::of("[a-z ]{1,20}"),
        proptest::option::of("[A-Z]{2}-[0-9]{1,3}"),
        any::<bool>(),
    )
        .prop_map(|(processing_details, storage_location, advance)| ManufacturerDetails {
            processing_details,
            storage_location,
            advance_to_processed: advance,
            ..Default::default()
        })
}

fn arb_command() -> impl Strategy<Value = Command> {
    prop_oneof![
        "[a-z ]{0,30}".prop_map(|remarks| Command::Verify { remarks }),
        "[a-z ]{0,30}".prop_map(|remarks| Command::Reject { remarks }),
        Just(Command::Collect),
        arb_details().prop_map(Command::UpdateManufacturerDetails),
    ]
}

fn arb_steps() -> impl Strategy<Value = Vec<(Principal, Command)>> {
    proptest::collection::vec((arb_principal(), arb_command()), 1..25)
}

fn arb_status() -> impl Strategy<Value = BatchStatus> {
    prop_oneof![
        Just(BatchStatus::PendingVerification),
        Just(BatchStatus::Verified),
        Just(BatchStatus::Rejected),
        Just(BatchStatus::Collected),
        Just(BatchStatus::Processed),
    ]
}

fn created_batch() -> Batch {
    let request = CreateBatchRequest {
        batch_id: Some("VC-P".to_string()),
        herb_name: Some("Ashwagandha".to_string()),
        quantity: Some(QuantityInput::Number(2.5)),
        unit: Some("kg".to_string()),
        harvest_date: Some("2024-01-15".to_string()),
        location: Location {
            village: Some("Kolli Hills".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    let at = Utc.with_ymd_and_hms(2024, 1, 16, 8, 0, 0).unwrap();
    plan_creation(&Principal::farmer("farmer-F"), &request, "VC", at)
        .unwrap()
        .0
}

// ============================================================================
// State machine invariants
// ============================================================================

proptest! {
    #[test]
    fn statuses_only_move_along_valid_edges(steps in arb_steps()) {
        let mut batch = created_batch();
        let mut at = batch.created_at;

        for (principal, command) in steps {
            at += Duration::seconds(1);
            let before = batch.clone();
            match plan_transition(&principal, &batch, &command, at) {
                Ok(update) => {
                    let next = update.batch;
                    prop_assert!(
                        next.status == before.status || before.status.can_advance_to(next.status),
                        "{} -> {}", before.status, next.status
                    );
                    prop_assert_eq!(next.revision, before.revision + 1);
                    prop_assert_eq!(update.precondition.expected_revision, before.revision);
                    prop_assert_eq!(update.precondition.expected_status, before.status);
                    prop_assert_eq!(update.record.from_status, Some(before.status));
                    prop_assert_eq!(update.record.to_status, next.status);
                    prop_assert_eq!(next.ledger_sync.revision, next.revision);
                    if before.collected_by.is_some() {
                        prop_assert_eq!(&next.collected_by, &before.collected_by);
                    }
                    batch = next;
                }
                Err(err) => {
                    let refused = matches!(
                        err,
                        BatchError::Forbidden { .. }
                            | BatchError::InvalidTransition { .. }
                            | BatchError::ValidationFailed(_)
                    );
                    prop_assert!(refused, "{err}");
                }
            }
            if batch.revision > 1 {
                prop_assert_ne!(batch.status, BatchStatus::PendingVerification);
            }
        }
    }

    #[test]
    fn wrong_role_is_always_forbidden(
        principal in arb_principal(),
        command in arb_command(),
        status in arb_status(),
    ) {
        let transition = command.transition();
        prop_assume!(principal.role != transition.allowed_role());

        let mut batch = created_batch();
        batch.status = status;
        let err = plan_transition(&principal, &batch, &command, Utc::now()).unwrap_err();
        let is_forbidden = matches!(err, BatchError::Forbidden { .. });
        prop_assert!(is_forbidden, "{err}");
    }

    #[test]
    fn only_the_collector_updates_details(
        details in arb_details(),
        status in prop_oneof![Just(BatchStatus::Collected), Just(BatchStatus::Processed)],
    ) {
        let mut batch = created_batch();
        batch.status = status;
        batch.collected_by = Some(Principal::manufacturer("m-1").id);

        let owner = Principal::manufacturer("m-1");
        let other = Principal::manufacturer("m-2");
        let command = Command::UpdateManufacturerDetails(details);

        let allowed = matches!(
            can_perform(&owner, Transition::UpdateManufacturerDetails, Some(&batch)),
            Decision::Allow
        );
        prop_assert!(allowed);
        let denied = matches!(
            plan_transition(&other, &batch, &command, Utc::now()),
            Err(BatchError::Forbidden { .. })
        );
        prop_assert!(denied);
    }

    #[test]
    fn transitions_from_other_states_are_invalid(
        command in arb_command(),
        status in arb_status(),
    ) {
        let transition = command.transition();
        prop_assume!(!transition.expected_statuses().contains(&status));

        let principal = match transition.allowed_role() {
            Role::Farmer => Principal::farmer("farmer-F"),
            Role::Admin => Principal::admin("admin-A"),
            Role::Manufacturer => Principal::manufacturer("m-1"),
        };
        let mut batch = created_batch();
        batch.status = status;
        if principal.role == Role::Manufacturer {
            batch.collected_by = Some(principal.id.clone());
        }

        let err = plan_transition(&principal, &batch, &command, Utc::now()).unwrap_err();
        let is_invalid = matches!(
            err,
            BatchError::InvalidTransition { current, .. } if current == status
        );
        prop_assert!(is_invalid, "{err}");
    }
}
