//! Row types shared by the Postgres and SQLite repositories.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::BTreeSet;

use crate::domain::{
    AdminDecision, Batch, BatchId, BatchStatus, LedgerSync, LedgerTxKind, Location,
    ManufacturerUpdate, Principal, PrincipalId, QrCode, Quantity, QuantityUnit, Role, SyncState,
    Transition, TransitionRecord,
};

use super::{BatchError, Result};

pub(crate) const BATCH_COLUMNS: &str = "batch_id, qr_code, farmer_id, herb_name, \
    quantity_value, quantity_unit, harvest_date, location, certifications, additional_info, \
    photo_ref, status, collected_by, manufacturer_update, admin_decision, revision, \
    ledger_tx_kind, ledger_tx_hash, ledger_state, ledger_error, ledger_revision, \
    ledger_attempted_at, ledger_completed_at, created_at, updated_at";

pub(crate) const TRANSITION_COLUMNS: &str = "batch_id, revision, transition, from_status, \
    to_status, actor_id, actor_role, at, tx_hash, ledger_state, ledger_error";

#[derive(Debug, FromRow)]
pub(crate) struct BatchRow {
    pub batch_id: String,
    pub qr_code: String,
    pub farmer_id: String,
    pub herb_name: String,
    pub quantity_value: f64,
    pub quantity_unit: String,
    pub harvest_date: NaiveDate,
    pub location: Json<Location>,
    pub certifications: Json<BTreeSet<String>>,
    pub additional_info: Option<String>,
    pub photo_ref: Option<String>,
    pub status: String,
    pub collected_by: Option<String>,
    pub manufacturer_update: Option<Json<ManufacturerUpdate>>,
    pub admin_decision: Option<Json<AdminDecision>>,
    pub revision: i64,
    pub ledger_tx_kind: Option<String>,
    pub ledger_tx_hash: Option<String>,
    pub ledger_state: String,
    pub ledger_error: Option<String>,
    pub ledger_revision: i64,
    pub ledger_attempted_at: Option<DateTime<Utc>>,
    pub ledger_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<BatchRow> for Batch {
    type Error = BatchError;

    fn try_from(row: BatchRow) -> Result<Self> {
        let unit: QuantityUnit = row.quantity_unit.parse().map_err(corrupt)?;
        let status: BatchStatus = row.status.parse().map_err(corrupt)?;
        let ledger_state: SyncState = row.ledger_state.parse().map_err(corrupt)?;
        let tx_kind = row
            .ledger_tx_kind
            .map(|k| k.parse::<LedgerTxKind>())
            .transpose()
            .map_err(corrupt)?;

        Ok(Batch {
            batch_id: BatchId(row.batch_id),
            qr_code: QrCode(row.qr_code),
            farmer_id: PrincipalId(row.farmer_id),
            herb_name: row.herb_name,
            quantity: Quantity::new(row.quantity_value, unit),
            harvest_date: row.harvest_date,
            location: row.location.0,
            certifications: row.certifications.0,
            additional_info: row.additional_info,
            photo_ref: row.photo_ref,
            status,
            collected_by: row.collected_by.map(PrincipalId),
            manufacturer_update: row.manufacturer_update.map(|j| j.0),
            admin_decision: row.admin_decision.map(|j| j.0),
            revision: row.revision as u64,
            ledger_sync: LedgerSync {
                last_attempted_tx_kind: tx_kind,
                tx_hash: row.ledger_tx_hash,
                state: ledger_state,
                last_error: row.ledger_error,
                revision: row.ledger_revision as u64,
                attempted_at: row.ledger_attempted_at,
                completed_at: row.ledger_completed_at,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct TransitionRow {
    pub batch_id: String,
    pub revision: i64,
    pub transition: String,
    pub from_status: Option<String>,
    pub to_status: String,
    pub actor_id: String,
    pub actor_role: String,
    pub at: DateTime<Utc>,
    pub tx_hash: Option<String>,
    pub ledger_state: String,
    pub ledger_error: Option<String>,
}

impl TryFrom<TransitionRow> for TransitionRecord {
    type Error = BatchError;

    fn try_from(row: TransitionRow) -> Result<Self> {
        Ok(TransitionRecord {
            batch_id: BatchId(row.batch_id),
            revision: row.revision as u64,
            transition: row.transition.parse::<Transition>().map_err(corrupt)?,
            from_status: row
                .from_status
                .map(|s| s.parse::<BatchStatus>())
                .transpose()
                .map_err(corrupt)?,
            to_status: row.to_status.parse().map_err(corrupt)?,
            actor: Principal {
                id: PrincipalId(row.actor_id),
                role: row.actor_role.parse::<Role>().map_err(corrupt)?,
            },
            at: row.at,
            tx_hash: row.tx_hash,
            ledger_state: row.ledger_state.parse().map_err(corrupt)?,
            ledger_error: row.ledger_error,
        })
    }
}

fn corrupt(msg: String) -> BatchError {
    BatchError::Serialization(format!("corrupt stored value: {msg}"))
}

/// Whether a database error is a unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}
