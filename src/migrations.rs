//! Embedded schema migrations for the batch store.
//!
//! Postgres is the production backend; SQLite backs tests and single-node
//! deployments. Both carry the same `batches` and `batch_transitions` tables.

use sqlx::{PgPool, SqlitePool};

static POSTGRES_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/postgres");
static SQLITE_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/sqlite");

pub async fn run_postgres(pool: &PgPool) -> anyhow::Result<()> {
    POSTGRES_MIGRATOR.run(pool).await?;
    tracing::info!(
        migrations = POSTGRES_MIGRATOR.iter().count(),
        "postgres schema up to date"
    );
    Ok(())
}

pub async fn run_sqlite(pool: &SqlitePool) -> anyhow::Result<()> {
    SQLITE_MIGRATOR.run(pool).await?;
    tracing::debug!(
        migrations = SQLITE_MIGRATOR.iter().count(),
        "sqlite schema up to date"
    );
    Ok(())
}
