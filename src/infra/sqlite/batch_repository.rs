//! SQLite batch repository
//!
//! Single-node store with the same conditional-update semantics as the
//! Postgres repository. Used for local deployments and tests.

use async_trait::async_trait;
use sqlx::sqlite::{Sqlite, SqlitePool, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::QueryBuilder;

use crate::domain::{Batch, BatchId, QrCode, TransitionRecord};
use crate::infra::rows::{
    is_unique_violation, BatchRow, TransitionRow, BATCH_COLUMNS, TRANSITION_COLUMNS,
};
use crate::infra::{
    BatchError, BatchFilter, BatchRepository, BatchScope, BatchUpdate, LedgerAnnotation, Result,
};

/// SQLite-based batch repository
pub struct SqliteBatchRepository {
    pool: SqlitePool,
}

impl SqliteBatchRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a database path or URL, e.g. `sqlite:herbtrace.db?mode=rwc`
    pub async fn from_path(path: &str) -> Result<Self> {
        let pool = SqlitePool::connect(path).await?;
        Ok(Self { pool })
    }

    /// Private in-memory database. A single connection keeps every query on the
    /// same database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Initialize the database schema
    pub async fn initialize(&self) -> Result<()> {
        crate::migrations::run_sqlite(&self.pool)
            .await
            .map_err(|e| BatchError::Internal(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn insert_record(
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        record: &TransitionRecord,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO batch_transitions (
                batch_id, revision, transition, from_status, to_status,
                actor_id, actor_role, at, tx_hash, ledger_state, ledger_error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
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
        let sql = format!("SELECT {BATCH_COLUMNS} FROM batches WHERE {column} = ?");
        let row: Option<BatchRow> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Batch::try_from).transpose()
    }
}

#[async_trait]
impl BatchRepository for SqliteBatchRepository {
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
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
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
                status = ?4,
                collected_by = ?5,
                manufacturer_update = ?6,
                admin_decision = ?7,
                revision = ?8,
                ledger_tx_kind = ?9,
                ledger_tx_hash = ?10,
                ledger_state = ?11,
                ledger_error = ?12,
                ledger_revision = ?13,
                ledger_attempted_at = ?14,
                ledger_completed_at = ?15,
                updated_at = ?16
            WHERE batch_id = ?1
              AND status = ?2
              AND revision = ?3
              AND (NOT ?17 OR collected_by IS NULL)
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
            SET tx_hash = ?3, ledger_state = ?4, ledger_error = ?5
            WHERE batch_id = ?1 AND revision = ?2
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
            SET ledger_tx_hash = ?3, ledger_state = ?4, ledger_error = ?5,
                ledger_completed_at = ?6
            WHERE batch_id = ?1 AND ledger_revision = ?2
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
        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {BATCH_COLUMNS} FROM batches WHERE 1 = 1"));

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
             WHERE batch_id = ? ORDER BY revision ASC"
        );
        let rows: Vec<TransitionRow> = sqlx::query_as(&sql)
            .bind(batch_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TransitionRecord::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        BatchStatus, LedgerSync, LedgerTxKind, Location, Principal, PrincipalId, Quantity,
        QuantityUnit, SyncState, Transition,
    };
    use crate::infra::Precondition;
    use chrono::{Duration, NaiveDate, TimeZone, Utc};

    fn batch(id: &str, farmer: &str, created_secs: i64) -> (Batch, TransitionRecord) {
        let at = Utc.timestamp_opt(1_700_000_000 + created_secs, 0).unwrap();
        let batch = Batch {
            batch_id: BatchId::from(id),
            qr_code: QrCode::generate(),
            farmer_id: PrincipalId::from(farmer),
            herb_name: "Tulsi".into(),
            quantity: Quantity::new(10.0, QuantityUnit::Kg),
            harvest_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            location: Location {
                village: Some("Rampur".into()),
                ..Default::default()
            },
            certifications: ["organic".to_string()].into_iter().collect(),
            additional_info: None,
            photo_ref: None,
            status: BatchStatus::PendingVerification,
            collected_by: None,
            manufacturer_update: None,
            admin_decision: None,
            revision: 1,
            ledger_sync: LedgerSync::pending(LedgerTxKind::Record, 1, at),
            created_at: at,
            updated_at: at,
        };
        let record = TransitionRecord {
            batch_id: batch.batch_id.clone(),
            revision: 1,
            transition: Transition::Create,
            from_status: None,
            to_status: BatchStatus::PendingVerification,
            actor: Principal::farmer(farmer),
            at,
            tx_hash: None,
            ledger_state: SyncState::Pending,
            ledger_error: None,
        };
        (batch, record)
    }

    fn verify_update(current: &Batch) -> BatchUpdate {
        let mut next = current.clone();
        next.status = BatchStatus::Verified;
        next.revision = current.revision + 1;
        next.ledger_sync =
            LedgerSync::pending(LedgerTxKind::StatusUpdate, next.revision, Utc::now());
        BatchUpdate {
            precondition: Precondition {
                expected_status: current.status,
                expected_revision: current.revision,
                require_uncollected: false,
            },
            record: TransitionRecord {
                batch_id: next.batch_id.clone(),
                revision: next.revision,
                transition: Transition::Verify,
                from_status: Some(current.status),
                to_status: next.status,
                actor: Principal::admin("a-1"),
                at: Utc::now(),
                tx_hash: None,
                ledger_state: SyncState::Pending,
                ledger_error: None,
            },
            batch: next,
        }
    }

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let repo = SqliteBatchRepository::in_memory().await.unwrap();
        let (b, r) = batch("VC-1", "f-1", 0);
        repo.insert(&b, &r).await.unwrap();

        let by_id = repo.get(&b.batch_id).await.unwrap().unwrap();
        assert_eq!(by_id, b);
        let by_qr = repo.get_by_qr(&b.qr_code).await.unwrap().unwrap();
        assert_eq!(by_qr.batch_id, b.batch_id);
        assert!(repo.get(&BatchId::from("VC-404")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_batch_id_is_rejected() {
        let repo = SqliteBatchRepository::in_memory().await.unwrap();
        let (b, r) = batch("VC-1", "f-1", 0);
        repo.insert(&b, &r).await.unwrap();

        let (mut again, r2) = batch("VC-1", "f-2", 1);
        again.qr_code = QrCode::generate();
        let err = repo.insert(&again, &r2).await.unwrap_err();
        assert!(matches!(err, BatchError::DuplicateBatch(_)));
    }

    #[tokio::test]
    async fn stale_precondition_loses() {
        let repo = SqliteBatchRepository::in_memory().await.unwrap();
        let (b, r) = batch("VC-1", "f-1", 0);
        repo.insert(&b, &r).await.unwrap();

        let update = verify_update(&b);
        assert!(repo.apply_transition(&update).await.unwrap());
        assert!(!repo.apply_transition(&update).await.unwrap());

        let history = repo.history(&b.batch_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].to_status, BatchStatus::Verified);
    }

    #[tokio::test]
    async fn ledger_outcome_for_old_revision_only_touches_journal() {
        let repo = SqliteBatchRepository::in_memory().await.unwrap();
        let (b, r) = batch("VC-1", "f-1", 0);
        repo.insert(&b, &r).await.unwrap();
        repo.apply_transition(&verify_update(&b)).await.unwrap();

        let annotation = LedgerAnnotation {
            state: SyncState::Confirmed,
            tx_hash: Some("0xabc".into()),
            error: None,
            completed_at: Utc::now(),
        };
        let applied = repo
            .record_ledger_outcome(&b.batch_id, 1, &annotation)
            .await
            .unwrap();
        assert!(!applied);

        let stored = repo.get(&b.batch_id).await.unwrap().unwrap();
        assert_eq!(stored.ledger_sync.state, SyncState::Pending);
        assert_eq!(stored.ledger_sync.revision, 2);

        let history = repo.history(&b.batch_id).await.unwrap();
        assert_eq!(history[0].ledger_state, SyncState::Confirmed);
        assert_eq!(history[0].tx_hash.as_deref(), Some("0xabc"));
    }

    #[tokio::test]
    async fn list_scopes_and_orders_newest_first() {
        let repo = SqliteBatchRepository::in_memory().await.unwrap();
        for (id, farmer, secs) in [("VC-1", "f-1", 0), ("VC-2", "f-2", 10), ("VC-3", "f-1", 20)] {
            let (b, r) = batch(id, farmer, secs);
            repo.insert(&b, &r).await.unwrap();
        }

        let mine = repo
            .list(&BatchFilter::scoped(BatchScope::Farmer(PrincipalId::from("f-1"))))
            .await
            .unwrap();
        let ids: Vec<_> = mine.iter().map(|b| b.batch_id.as_str()).collect();
        assert_eq!(ids, vec!["VC-3", "VC-1"]);

        let all = repo.list(&BatchFilter::default().with_limit(2)).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].batch_id.as_str(), "VC-3");

        let verified = repo
            .list(&BatchFilter::default().with_statuses(vec![BatchStatus::Verified]))
            .await
            .unwrap();
        assert!(verified.is_empty());

        let stale = repo
            .list(&BatchFilter {
                ledger_state: Some(SyncState::Pending),
                attempted_before: Some(
                    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(15),
                ),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(stale.len(), 2);
    }
}
