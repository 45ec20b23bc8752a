//! PostgreSQL batch repository
//!
//! Production store for batches. Transitions are a conditional `UPDATE` on
//! `(status, revision)` plus a journal insert inside one transaction.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, Postgres};
use sqlx::types::Json;
use sqlx::QueryBuilder;

use crate::domain::{Batch, BatchId, QrCode, TransitionRecord};
use crate::infra::rows::{
    is_unique_violation, BatchRow, TransitionRow, BATCH_COLUMNS, TRANSITION_COLUMNS,
};
use crate::infra::{
    BatchError, BatchFilter, BatchRepository, BatchScope, BatchUpdate, LedgerAnnotation, Result,
};

/// PostgreSQL-based batch repository
pub struct PgBatchRepository {
    pool: PgPool,
}

impl PgBatchRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create from connection string
    pub async fn from_url(url: &str) -> Result<Self> {
        let pool = PgPool::connect(url).await?;
        Ok(Self::new(pool))
    }

    /// Run migrations
    pub async fn initialize(&self) -> Result<()> {
        crate::migrations::run_postgres(&self.pool)
            .await
            .map_err(|e| BatchError::Internal(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_record(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        record: &TransitionRecord,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO batch_transitions (
                batch_id, revision, transition, from_status, to_status,
                actor_id, actor_role, at, tx_hash, ledger_state, ledger_error
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.batch_id.as_str())
        .bind(record.revision as i64)
        .bind(record.transition.as_str())
        .bind(record.from_status.map(|s| s.as_str()))
        .bind(record.to_status.as_str())
        .bind(record.actor.id.as_str())
        .bind(record.actor.role.as_str())
        .bind(record.at)
        .bind(record.tx_hash.as_deref())
        .bind(record.ledger_state.as_str())
        .bind(record.ledger_error.as_deref())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn fetch_one_by(&self, column: &str, value: &str) -> Result<Option<Batch>> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM batches WHERE {column} = $1");
        let row: Option<BatchRow> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Batch::try_from).transpose()
    }
}

#[async_trait]
impl BatchRepository for PgBatchRepository {
    async fn insert(&self, batch: &Batch, record: &TransitionRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let sync = &batch.ledger_sync;

        let inserted = sqlx::query(
            r#"
            INSERT INTO batches (
                batch_id, qr_code, farmer_id, herb_name,
                quantity_value, quantity_unit, harvest_date, location, certifications,
                additional_info, photo_ref, status, collected_by,
                manufacturer_update, admin_decision, revision,
                ledger_tx_kind, ledger_tx_hash, ledger_state, ledger_error, ledger_revision,
                ledger_attempted_at, ledger_completed_at, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25
            )
            "#,
        )
        .bind(batch.batch_id.as_str())
        .bind(batch.qr_code.as_str())
        .bind(batch.farmer_id.as_str())
        .bind(&batch.herb_name)
        .bind(batch.quantity.value)
        .bind(batch.quantity.unit.as_str())
        .bind(batch.harvest_date)
        .bind(Json(&batch.location))
        .bind(Json(&batch.certifications))
        .bind(batch.additional_info.as_deref())
        .bind(batch.photo_ref.as_deref())
        .bind(batch.status.as_str())
        .bind(batch.collected_by.as_ref().map(|p| p.as_str()))
        .bind(batch.manufacturer_update.as_ref().map(Json))
        .bind(batch.admin_decision.as_ref().map(Json))
        .bind(batch.revision as i64)
        .bind(sync.last_attempted_tx_kind.map(|k| k.as_str()))
        .bind(sync.tx_hash.as_deref())
        .bind(sync.state.as_str())
        .bind(sync.last_error.as_deref())
        .bind(sync.revision as i64)
        .bind(sync.attempted_at)
        .bind(sync.completed_at)
        .bind(batch.created_at)
        .bind(batch.updated_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(BatchError::DuplicateBatch(batch.batch_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        Self::insert_record(&mut tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, batch_id: &BatchId) -> Result<Option<Batch>> {
        self.fetch_one_by("batch_id", batch_id.as_str()).await
    }

    async fn get_by_qr(&self, qr_code: &QrCode) -> Result<Option<Batch>> {
        self.fetch_one_by("qr_code", qr_code.as_str()).await
    }

    async fn apply_transition(&self, update: &BatchUpdate) -> Result<bool> {
        let batch = &update.batch;
        let sync = &batch.ledger_sync;
        let pre = &update.precondition;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE batches SET
                status = $4,
                collected_by = $5,
                manufacturer_update = $6,
                admin_decision = $7,
                revision = $8,
                ledger_tx_kind = $9,
                ledger_tx_hash = $10,
                ledger_state = $11,
                ledger_error = $12,
                ledger_revision = $13,
                ledger_attempted_at = $14,
                ledger_completed_at = $15,
                updated_at = $16
            WHERE batch_id = $1
              AND status = $2
              AND revision = $3
              AND (NOT $17 OR collected_by IS NULL)
            "#,
        )
        .bind(batch.batch_id.as_str())
        .bind(pre.expected_status.as_str())
        .bind(pre.expected_revision as i64)
        .bind(batch.status.as_str())
        .bind(batch.collected_by.as_ref().map(|p| p.as_str()))
        .bind(batch.manufacturer_update.as_ref().map(Json))
        .bind(batch.admin_decision.as_ref().map(Json))
        .bind(batch.revision as i64)
        .bind(sync.last_attempted_tx_kind.map(|k| k.as_str()))
        .bind(sync.tx_hash.as_deref())
        .bind(sync.state.as_str())
        .bind(sync.last_error.as_deref())
        .bind(sync.revision as i64)
        .bind(sync.attempted_at)
        .bind(sync.completed_at)
        .bind(batch.updated_at)
        .bind(pre.require_uncollected)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        Self::insert_record(&mut tx, &update.record).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn record_ledger_outcome(
        &self,
        batch_id: &BatchId,
        revision: u64,
        annotation: &LedgerAnnotation,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE batch_transitions
            SET tx_hash = $3, ledger_state = $4, ledger_error = $5
            WHERE batch_id = $1 AND revision = $2
            "#,
        )
        .bind(batch_id.as_str())
        .bind(revision as i64)
        .bind(annotation.tx_hash.as_deref())
        .bind(annotation.state.as_str())
        .bind(annotation.error.as_deref())
        .execute(&mut *tx)
        .await?;

        let current = sqlx::query(
            r#"
            UPDATE batches
            SET ledger_tx_hash = $3, ledger_state = $4, ledger_error = $5,
                ledger_completed_at = $6
            WHERE batch_id = $1 AND ledger_revision = $2
            "#,
        )
        .bind(batch_id.as_str())
        .bind(revision as i64)
        .bind(annotation.tx_hash.as_deref())
        .bind(annotation.state.as_str())
        .bind(annotation.error.as_deref())
        .bind(annotation.completed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(current.rows_affected() == 1)
    }

    async fn list(&self, filter: &BatchFilter) -> Result<Vec<Batch>> {
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {BATCH_COLUMNS} FROM batches WHERE TRUE"));

        match &filter.scope {
            BatchScope::All => {}
            BatchScope::Farmer(id) => {
                qb.push(" AND farmer_id = ").push_bind(id.as_str());
            }
            BatchScope::Manufacturer(id) => {
                qb.push(" AND (status = 'verified' OR collected_by = ")
                    .push_bind(id.as_str())
                    .push(")");
            }
        }

        if !filter.statuses.is_empty() {
            qb.push(" AND status IN (");
            let mut separated = qb.separated(", ");
            for status in &filter.statuses {
                separated.push_bind(status.as_str());
            }
            separated.push_unseparated(")");
        }

        if let Some(state) = filter.ledger_state {
            qb.push(" AND ledger_state = ").push_bind(state.as_str());
        }

        if let Some(before) = filter.attempted_before {
            qb.push(" AND ledger_attempted_at < ").push_bind(before);
        }

        qb.push(" ORDER BY created_at DESC, batch_id DESC");

        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows: Vec<BatchRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Batch::try_from).collect()
    }

    async fn history(&self, batch_id: &BatchId) -> Result<Vec<TransitionRecord>> {
        let sql = format!(
            "SELECT {TRANSITION_COLUMNS} FROM batch_transitions \
             WHERE batch_id = $1 ORDER BY revision ASC"
        );
        let rows: Vec<TransitionRow> = sqlx::query_as(&sql)
            .bind(batch_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TransitionRecord::try_from).collect()
    }
}
