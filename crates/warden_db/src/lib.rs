//! Database pool and schema setup.
//!
//! Uses concrete sqlx pool types selected at compile time via feature flags,
//! the way `casparian_db::pool` does, rather than `sqlx::AnyPool` — this keeps
//! full support for `#[derive(sqlx::FromRow)]` against native column types.
//! Production deployments build with the default `postgres` feature (needed
//! for `SELECT ... FOR UPDATE` in `warden_state`'s notification dedup);
//! crate-local tests build with `--no-default-features --features sqlite`
//! for speed where the SQL overlaps.

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(String),
}

#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
pub type DbPool = sqlx::PgPool;

#[cfg(feature = "sqlite")]
pub type DbPool = sqlx::SqlitePool;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
        }
    }

    #[cfg(feature = "sqlite")]
    pub fn sqlite_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }
}

/// Create and connect a pool, then run the orchestrator's schema migration.
pub async fn create_pool(config: DbConfig) -> Result<DbPool, DbError> {
    #[cfg(feature = "sqlite")]
    {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA foreign_keys=ON").execute(&pool).await?;
        info!("connected to sqlite database");
        migrate(&pool).await?;
        return Ok(pool);
    }

    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        info!("connected to postgres database");
        migrate(&pool).await?;
        return Ok(pool);
    }

    #[allow(unreachable_code)]
    Err(DbError::Migration("no database backend compiled in".to_string()))
}

/// Create the `check`, `scan`, and `notification` tables if they don't
/// already exist. Column layout follows the data model in SPEC_FULL §3.
pub async fn migrate(pool: &DbPool) -> Result<(), DbError> {
    #[cfg(feature = "sqlite")]
    {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS check_run (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                external_id TEXT NOT NULL UNIQUE,
                event_kind TEXT NOT NULL,
                event_payload TEXT NOT NULL,
                commit_id TEXT NOT NULL,
                branch TEXT NOT NULL,
                project_name TEXT NOT NULL,
                source_url TEXT NOT NULL,
                prefix TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scan (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                check_id INTEGER NOT NULL REFERENCES check_run(id),
                scan_name TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT,
                response TEXT,
                outputs_test_id TEXT NOT NULL DEFAULT '{}',
                UNIQUE(check_id, scan_name)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notification (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_id INTEGER NOT NULL REFERENCES scan(id),
                channel TEXT NOT NULL,
                payload TEXT NOT NULL,
                is_sent INTEGER NOT NULL DEFAULT 0,
                UNIQUE(scan_id, channel)
            )
            "#,
        )
        .execute(pool)
        .await?;

        return Ok(());
    }

    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS check_run (
                id BIGSERIAL PRIMARY KEY,
                external_id TEXT NOT NULL UNIQUE,
                event_kind TEXT NOT NULL,
                event_payload TEXT NOT NULL,
                commit_id TEXT NOT NULL,
                branch TEXT NOT NULL,
                project_name TEXT NOT NULL,
                source_url TEXT NOT NULL,
                prefix TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scan (
                id BIGSERIAL PRIMARY KEY,
                check_id BIGINT NOT NULL REFERENCES check_run(id),
                scan_name TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TIMESTAMPTZ,
                finished_at TIMESTAMPTZ,
                response TEXT,
                outputs_test_id TEXT NOT NULL DEFAULT '{}',
                UNIQUE(check_id, scan_name)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notification (
                id BIGSERIAL PRIMARY KEY,
                scan_id BIGINT NOT NULL REFERENCES scan(id),
                channel TEXT NOT NULL,
                payload TEXT NOT NULL,
                is_sent BOOLEAN NOT NULL DEFAULT FALSE,
                UNIQUE(scan_id, channel)
            )
            "#,
        )
        .execute(pool)
        .await?;

        return Ok(());
    }

    #[allow(unreachable_code)]
    Ok(())
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrate_creates_tables() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type='table'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(row.0 >= 3);
    }
}
