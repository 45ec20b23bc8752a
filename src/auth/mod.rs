//! Authorization for batch transitions and views
//!
//! Principals arrive already authenticated (`{id, role}`) from the identity
//! provider. This module decides what they may do with a given batch. Every
//! function here is pure: no I/O, no state.
//!
//! # Transition rules
//!
//! | Transition                  | Role         | Extra condition          |
//! |-----------------------------|--------------|--------------------------|
//! | Create                      | farmer       |                          |
//! | Verify / Reject             | admin        |                          |
//! | Collect                     | manufacturer |                          |
//! | UpdateManufacturerDetails   | manufacturer | caller is the collector  |
//!
//! # View rules
//!
//! The public (QR) audience sees the product story without principal ids or
//! raw ledger errors. Participants see everything, subject to [`can_view`].

use serde::{Deserialize, Serialize};

use crate::domain::{Batch, BatchStatus, Principal, Role, Transition};
use crate::infra::{BatchError, Result};

/// Outcome of an authorization check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Decide whether `principal` may invoke `transition` on `batch`.
///
/// `batch` is `None` for Create. Only role and collector identity are checked
/// here; the batch's current status is the lifecycle engine's concern.
pub fn can_perform(
    principal: &Principal,
    transition: Transition,
    batch: Option<&Batch>,
) -> Decision {
    if let deny @ Decision::Deny(_) = role_decision(principal, transition) {
        return deny;
    }

    if transition == Transition::UpdateManufacturerDetails {
        match batch.and_then(|b| b.collected_by.as_ref()) {
            Some(collector) if *collector == principal.id => {}
            Some(_) => return Decision::Deny("batch was collected by another manufacturer".into()),
            None => return Decision::Deny("batch has not been collected by the caller".into()),
        }
    }

    Decision::Allow
}

fn role_decision(principal: &Principal, transition: Transition) -> Decision {
    let required = transition.allowed_role();
    if principal.role == required {
        Decision::Allow
    } else {
        Decision::Deny(format!(
            "{transition} requires role {required}, caller is {}",
            principal.role
        ))
    }
}

/// [`can_perform`] as a `Result`, failing with `Forbidden`.
pub fn authorize(
    principal: &Principal,
    transition: Transition,
    batch: Option<&Batch>,
) -> Result<()> {
    into_result(principal, transition, can_perform(principal, transition, batch))
}

/// Role-only check, usable before the batch has been loaded.
pub fn authorize_role(principal: &Principal, transition: Transition) -> Result<()> {
    into_result(principal, transition, role_decision(principal, transition))
}

fn into_result(principal: &Principal, transition: Transition, decision: Decision) -> Result<()> {
    match decision {
        Decision::Allow => Ok(()),
        Decision::Deny(reason) => {
            tracing::debug!(
                principal = %principal,
                transition = %transition,
                reason = %reason,
                "transition denied"
            );
            Err(BatchError::Forbidden {
                principal: principal.id.clone(),
                action: transition.to_string(),
                reason,
            })
        }
    }
}

/// Participant access to a single batch.
///
/// Allowed for the creating farmer, any admin, any manufacturer while the
/// batch is Verified, and the manufacturer that collected it.
pub fn can_view(principal: &Principal, batch: &Batch) -> bool {
    match principal.role {
        Role::Admin => true,
        Role::Farmer => batch.farmer_id == principal.id,
        Role::Manufacturer => {
            batch.status == BatchStatus::Verified || batch.is_collected_by(&principal.id)
        }
    }
}

/// [`can_view`] as a `Result`, failing with `Forbidden`.
pub fn authorize_view(principal: &Principal, batch: &Batch) -> Result<()> {
    if can_view(principal, batch) {
        return Ok(());
    }
    tracing::debug!(principal = %principal, batch_id = %batch.batch_id, "view denied");
    Err(BatchError::Forbidden {
        principal: principal.id.clone(),
        action: "view".to_string(),
        reason: format!("batch {} is outside the caller's scope", batch.batch_id),
    })
}

/// Who a batch view is rendered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewAudience {
    /// Consumer QR lookup, unauthenticated
    Public,
    /// An authenticated supply-chain participant
    Participant,
}

/// Which sensitive fields a view may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldVisibility {
    pub principal_ids: bool,
    pub ledger_error: bool,
}

impl FieldVisibility {
    pub fn for_audience(audience: ViewAudience) -> Self {
        match audience {
            ViewAudience::Public => Self {
                principal_ids: false,
                ledger_error: false,
            },
            ViewAudience::Participant => Self {
                principal_ids: true,
                ledger_error: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        BatchId, LedgerSync, Location, PrincipalId, QrCode, Quantity, QuantityUnit,
    };
    use chrono::{NaiveDate, Utc};

    fn batch(status: BatchStatus, collected_by: Option<&str>) -> Batch {
        let now = Utc::now();
        Batch {
            batch_id: BatchId::from("VC-1"),
            qr_code: QrCode::from("qr"),
            farmer_id: PrincipalId::from("f-1"),
            herb_name: "Tulsi".into(),
            quantity: Quantity::new(10.0, QuantityUnit::Kg),
            harvest_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            location: Location::default(),
            certifications: Default::default(),
            additional_info: None,
            photo_ref: None,
            status,
            collected_by: collected_by.map(PrincipalId::from),
            manufacturer_update: None,
            admin_decision: None,
            revision: 1,
            ledger_sync: LedgerSync::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn each_transition_has_exactly_one_role() {
        let b = batch(BatchStatus::Collected, Some("m-1"));
        for t in Transition::ALL {
            let allowed: Vec<Role> = Role::ALL
                .into_iter()
                .filter(|role| {
                    let id = if *role == Role::Manufacturer { "m-1" } else { "x" };
                    can_perform(&Principal::new(id, *role), t, Some(&b)).is_allowed()
                })
                .collect();
            assert_eq!(allowed, vec![t.allowed_role()], "{t}");
        }
    }

    #[test]
    fn only_collector_may_update_details() {
        let b = batch(BatchStatus::Collected, Some("m-1"));
        let t = Transition::UpdateManufacturerDetails;
        assert!(can_perform(&Principal::manufacturer("m-1"), t, Some(&b)).is_allowed());
        assert!(!can_perform(&Principal::manufacturer("m-2"), t, Some(&b)).is_allowed());

        let uncollected = batch(BatchStatus::Verified, None);
        assert!(!can_perform(&Principal::manufacturer("m-1"), t, Some(&uncollected)).is_allowed());
    }

    #[test]
    fn authorize_maps_denial_to_forbidden() {
        let err = authorize(&Principal::farmer("f-2"), Transition::Verify, None).unwrap_err();
        assert!(matches!(err, BatchError::Forbidden { ref action, .. } if action == "verify"));
    }

    #[test]
    fn role_check_needs_no_batch() {
        let t = Transition::UpdateManufacturerDetails;
        assert!(authorize_role(&Principal::manufacturer("m-1"), t).is_ok());
        assert!(matches!(
            authorize_role(&Principal::farmer("f-2"), t),
            Err(BatchError::Forbidden { .. })
        ));
    }

    #[test]
    fn participant_view_rules() {
        let pending = batch(BatchStatus::PendingVerification, None);
        assert!(can_view(&Principal::farmer("f-1"), &pending));
        assert!(!can_view(&Principal::farmer("f-2"), &pending));
        assert!(can_view(&Principal::admin("a-1"), &pending));
        assert!(!can_view(&Principal::manufacturer("m-1"), &pending));

        let verified = batch(BatchStatus::Verified, None);
        assert!(can_view(&Principal::manufacturer("m-9"), &verified));

        let collected = batch(BatchStatus::Collected, Some("m-1"));
        assert!(can_view(&Principal::manufacturer("m-1"), &collected));
        assert!(!can_view(&Principal::manufacturer("m-2"), &collected));
    }

    #[test]
    fn public_audience_hides_sensitive_fields() {
        let v = FieldVisibility::for_audience(ViewAudience::Public);
        assert!(!v.principal_ids && !v.ledger_error);
        let v = FieldVisibility::for_audience(ViewAudience::Participant);
        assert!(v.principal_ids && v.ledger_error);
    }
}
