//! `Check` row: one per webhook event, keyed by `external_id` (C3).

use chrono::{DateTime, Utc};
use serde_json::Value;
use warden_db::DbPool;

use crate::{is_unique_violation, StateError};

#[derive(Debug, Clone)]
pub struct Check {
    pub id: i64,
    pub external_id: String,
    pub event_kind: String,
    pub event_payload: Value,
    pub commit_id: String,
    pub branch: String,
    pub project_name: String,
    pub source_url: String,
    pub prefix: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to create a new `Check` row the first time an event with a
/// given `external_id` is seen.
#[derive(Debug, Clone)]
pub struct NewCheck {
    pub external_id: String,
    pub event_kind: String,
    pub event_payload: Value,
    pub commit_id: String,
    pub branch: String,
    pub project_name: String,
    pub source_url: String,
    pub prefix: String,
}

pub struct CheckStore;

impl CheckStore {
    #[cfg(feature = "sqlite")]
    pub async fn find_by_external_id(
        pool: &DbPool,
        external_id: &str,
    ) -> Result<Option<Check>, StateError> {
        let row: Option<(i64, String, String, String, String, String, String, String, String, String, String)> =
            sqlx::query_as(
                r#"
                SELECT id, external_id, event_kind, event_payload, commit_id, branch,
                       project_name, source_url, prefix, created_at, updated_at
                FROM check_run WHERE external_id = ?
                "#,
            )
            .bind(external_id)
            .fetch_optional(pool)
            .await?;

        row.map(row_to_check).transpose()
    }

    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    pub async fn find_by_external_id(
        pool: &DbPool,
        external_id: &str,
    ) -> Result<Option<Check>, StateError> {
        let row: Option<(
            i64,
            String,
            String,
            String,
            String,
            String,
            String,
            String,
            String,
            DateTime<Utc>,
            DateTime<Utc>,
        )> = sqlx::query_as(
            r#"
            SELECT id, external_id, event_kind, event_payload, commit_id, branch,
                   project_name, source_url, prefix, created_at, updated_at
            FROM check_run WHERE external_id = $1
            "#,
        )
        .bind(external_id)
        .fetch_optional(pool)
        .await?;

        row.map(row_to_check_pg).transpose()
    }

    /// Get the `Check` for `new.external_id`, creating it if this is the
    /// first event we've seen for it. Concurrent webhook deliveries for the
    /// same `(project, commit)` race on the insert; the loser re-reads
    /// instead of erroring, mirroring `get_or_create_security_check`.
    #[cfg(feature = "sqlite")]
    pub async fn get_or_create(pool: &DbPool, new: NewCheck) -> Result<Check, StateError> {
        if let Some(existing) = Self::find_by_external_id(pool, &new.external_id).await? {
            return Ok(existing);
        }

        let now = Utc::now().to_rfc3339();
        let payload = serde_json::to_string(&new.event_payload)?;
        let insert = sqlx::query(
            r#"
            INSERT INTO check_run
                (external_id, event_kind, event_payload, commit_id, branch,
                 project_name, source_url, prefix, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.external_id)
        .bind(&new.event_kind)
        .bind(&payload)
        .bind(&new.commit_id)
        .bind(&new.branch)
        .bind(&new.project_name)
        .bind(&new.source_url)
        .bind(&new.prefix)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await;

        match insert {
            Ok(_) => Self::find_by_external_id(pool, &new.external_id)
                .await?
                .ok_or_else(|| StateError::ScanNotFound(0)),
            Err(err) if is_unique_violation(&err) => Self::find_by_external_id(pool, &new.external_id)
                .await?
                .ok_or(StateError::Database(err)),
            Err(err) => Err(err.into()),
        }
    }

    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    pub async fn get_or_create(pool: &DbPool, new: NewCheck) -> Result<Check, StateError> {
        if let Some(existing) = Self::find_by_external_id(pool, &new.external_id).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let payload = serde_json::to_string(&new.event_payload)?;
        let insert = sqlx::query(
            r#"
            INSERT INTO check_run
                (external_id, event_kind, event_payload, commit_id, branch,
                 project_name, source_url, prefix, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&new.external_id)
        .bind(&new.event_kind)
        .bind(&payload)
        .bind(&new.commit_id)
        .bind(&new.branch)
        .bind(&new.project_name)
        .bind(&new.source_url)
        .bind(&new.prefix)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await;

        match insert {
            Ok(_) => Self::find_by_external_id(pool, &new.external_id)
                .await?
                .ok_or_else(|| StateError::ScanNotFound(0)),
            Err(err) if is_unique_violation(&err) => Self::find_by_external_id(pool, &new.external_id)
                .await?
                .ok_or(StateError::Database(err)),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(feature = "sqlite")]
fn row_to_check(
    row: (i64, String, String, String, String, String, String, String, String, String, String),
) -> Result<Check, StateError> {
    let (id, external_id, event_kind, event_payload, commit_id, branch, project_name, source_url, prefix, created_at, updated_at) = row;
    Ok(Check {
        id,
        external_id,
        event_kind,
        event_payload: serde_json::from_str(&event_payload)?,
        commit_id,
        branch,
        project_name,
        source_url,
        prefix,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
fn row_to_check_pg(
    row: (
        i64,
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        DateTime<Utc>,
        DateTime<Utc>,
    ),
) -> Result<Check, StateError> {
    let (id, external_id, event_kind, event_payload, commit_id, branch, project_name, source_url, prefix, created_at, updated_at) = row;
    Ok(Check {
        id,
        external_id,
        event_kind,
        event_payload: serde_json::from_str(&event_payload)?,
        commit_id,
        branch,
        project_name,
        source_url,
        prefix,
        created_at,
        updated_at,
    })
}
