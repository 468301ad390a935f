//! `Scan` row: one per `(check, scan_name)`, driving the scan lifecycle
//! state machine (C3/C5).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use warden_db::DbPool;
use warden_protocol::ScanStatus;

use crate::{is_unique_violation, StateError};

#[derive(Debug, Clone)]
pub struct Scan {
    pub id: i64,
    pub check_id: i64,
    pub scan_name: String,
    pub status: ScanStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub response: Option<Value>,
    pub outputs_test_id: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct NewScan {
    pub check_id: i64,
    pub scan_name: String,
}

fn status_from_str(s: &str) -> ScanStatus {
    match s {
        "in_progress" => ScanStatus::InProgress,
        "skip" => ScanStatus::Skip,
        "error" => ScanStatus::Error,
        "done" => ScanStatus::Done,
        _ => ScanStatus::New,
    }
}

pub struct ScanStore;

impl ScanStore {
    #[cfg(feature = "sqlite")]
    pub async fn find(pool: &DbPool, check_id: i64, scan_name: &str) -> Result<Option<Scan>, StateError> {
        let row: Option<(i64, i64, String, String, Option<String>, Option<String>, Option<String>, String)> =
            sqlx::query_as(
                r#"
                SELECT id, check_id, scan_name, status, started_at, finished_at, response, outputs_test_id
                FROM scan WHERE check_id = ? AND scan_name = ?
                "#,
            )
            .bind(check_id)
            .bind(scan_name)
            .fetch_optional(pool)
            .await?;
        row.map(row_to_scan_sqlite).transpose()
    }

    #[cfg(feature = "sqlite")]
    pub async fn find_by_id(pool: &DbPool, scan_id: i64) -> Result<Option<Scan>, StateError> {
        let row: Option<(i64, i64, String, String, Option<String>, Option<String>, Option<String>, String)> =
            sqlx::query_as(
                r#"
                SELECT id, check_id, scan_name, status, started_at, finished_at, response, outputs_test_id
                FROM scan WHERE id = ?
                "#,
            )
            .bind(scan_id)
            .fetch_optional(pool)
            .await?;
        row.map(row_to_scan_sqlite).transpose()
    }

    #[cfg(feature = "sqlite")]
    pub async fn list_by_check(pool: &DbPool, check_id: i64) -> Result<Vec<Scan>, StateError> {
        let rows: Vec<(i64, i64, String, String, Option<String>, Option<String>, Option<String>, String)> =
            sqlx::query_as(
                r#"
                SELECT id, check_id, scan_name, status, started_at, finished_at, response, outputs_test_id
                FROM scan WHERE check_id = ?
                "#,
            )
            .bind(check_id)
            .fetch_all(pool)
            .await?;
        rows.into_iter().map(row_to_scan_sqlite).collect()
    }

    #[cfg(feature = "sqlite")]
    pub async fn get_or_create(pool: &DbPool, new: NewScan) -> Result<Scan, StateError> {
        if let Some(existing) = Self::find(pool, new.check_id, &new.scan_name).await? {
            return Ok(existing);
        }

        let insert = sqlx::query(
            r#"INSERT INTO scan (check_id, scan_name, status, outputs_test_id) VALUES (?, ?, 'new', '{}')"#,
        )
        .bind(new.check_id)
        .bind(&new.scan_name)
        .execute(pool)
        .await;

        match insert {
            Ok(_) => Self::find(pool, new.check_id, &new.scan_name)
                .await?
                .ok_or(StateError::ScanNotFound(0)),
            Err(err) if is_unique_violation(&err) => Self::find(pool, new.check_id, &new.scan_name)
                .await?
                .ok_or(StateError::Database(err)),
            Err(err) => Err(err.into()),
        }
    }

    /// Claim a scan for execution. Only `New` or `Error` (a retry) scans can
    /// start; anything else is `ScanCantBeScanned`, matching `start_scan`.
    #[cfg(feature = "sqlite")]
    pub async fn start_scan(pool: &DbPool, check_id: i64, scan_name: &str) -> Result<Scan, StateError> {
        let scan = Self::get_or_create(
            pool,
            NewScan {
                check_id,
                scan_name: scan_name.to_string(),
            },
        )
        .await?;

        if !scan.status.can_start() {
            return Err(StateError::ScanCantBeScanned(format!(
                "scan {scan_name} is {:?}",
                scan.status
            )));
        }

        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE scan SET status = 'in_progress', started_at = ? WHERE id = ?")
            .bind(&now)
            .bind(scan.id)
            .execute(pool)
            .await?;

        Self::find_by_id(pool, scan.id)
            .await?
            .ok_or(StateError::ScanNotFound(scan.id))
    }

    /// Mark a scan done, merging `output_external_test_id` into
    /// `outputs_test_id` under `output_component_name`. A conflicting key from
    /// a second concurrent output write overwrites the first (last-write-wins,
    /// matching the original's dict-merge `{**old, name: new}`).
    #[cfg(feature = "sqlite")]
    pub async fn complete_scan(
        pool: &DbPool,
        scan_id: i64,
        output_component_name: &str,
        output_external_test_id: &str,
        response: Option<Value>,
    ) -> Result<Scan, StateError> {
        let scan = Self::find_by_id(pool, scan_id)
            .await?
            .ok_or(StateError::ScanNotFound(scan_id))?;

        let mut outputs_test_id = scan.outputs_test_id.clone();
        outputs_test_id.insert(output_component_name.to_string(), output_external_test_id.to_string());
        let outputs_json = serde_json::to_string(&outputs_test_id)?;
        let response_json = response.map(|v| serde_json::to_string(&v)).transpose()?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "UPDATE scan SET status = 'done', finished_at = ?, outputs_test_id = ?, response = COALESCE(?, response) WHERE id = ?",
        )
        .bind(&now)
        .bind(&outputs_json)
        .bind(&response_json)
        .bind(scan_id)
        .execute(pool)
        .await?;

        Self::find_by_id(pool, scan_id)
            .await?
            .ok_or(StateError::ScanNotFound(scan_id))
    }

    /// Handle a scan task failure: `skip` marks the scan `Skip` (a handler
    /// decided this scan doesn't apply), anything else marks it `Error`.
    /// If the scan row doesn't exist yet (failed before it was created) this
    /// is a no-op — the caller re-raises the original error, matching
    /// `handle_exception`'s "log a warning and re-raise" branch.
    #[cfg(feature = "sqlite")]
    pub async fn handle_failure(
        pool: &DbPool,
        check_id: i64,
        scan_name: &str,
        skip: bool,
    ) -> Result<(), StateError> {
        let Some(scan) = Self::find(pool, check_id, scan_name).await? else {
            return Ok(());
        };
        let status = if skip { "skip" } else { "error" };
        sqlx::query("UPDATE scan SET status = ? WHERE id = ?")
            .bind(status)
            .bind(scan.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    // --- postgres variants ---

    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    pub async fn find(pool: &DbPool, check_id: i64, scan_name: &str) -> Result<Option<Scan>, StateError> {
        let row: Option<(
            i64,
            i64,
            String,
            String,
            Option<DateTime<Utc>>,
            Option<DateTime<Utc>>,
            Option<String>,
            String,
        )> = sqlx::query_as(
            r#"
            SELECT id, check_id, scan_name, status, started_at, finished_at, response, outputs_test_id
            FROM scan WHERE check_id = $1 AND scan_name = $2
            "#,
        )
        .bind(check_id)
        .bind(scan_name)
        .fetch_optional(pool)
        .await?;
        row.map(row_to_scan_pg).transpose()
    }

    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    pub async fn find_by_id(pool: &DbPool, scan_id: i64) -> Result<Option<Scan>, StateError> {
        let row: Option<(
            i64,
            i64,
            String,
            String,
            Option<DateTime<Utc>>,
            Option<DateTime<Utc>>,
            Option<String>,
            String,
        )> = sqlx::query_as(
            r#"
            SELECT id, check_id, scan_name, status, started_at, finished_at, response, outputs_test_id
            FROM scan WHERE id = $1
            "#,
        )
        .bind(scan_id)
        .fetch_optional(pool)
        .await?;
        row.map(row_to_scan_pg).transpose()
    }

    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    pub async fn list_by_check(pool: &DbPool, check_id: i64) -> Result<Vec<Scan>, StateError> {
        let rows: Vec<(
            i64,
            i64,
            String,
            String,
            Option<DateTime<Utc>>,
            Option<DateTime<Utc>>,
            Option<String>,
            String,
        )> = sqlx::query_as(
            r#"
            SELECT id, check_id, scan_name, status, started_at, finished_at, response, outputs_test_id
            FROM scan WHERE check_id = $1
            "#,
        )
        .bind(check_id)
        .fetch_all(pool)
        .await?;
        rows.into_iter().map(row_to_scan_pg).collect()
    }

    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    pub async fn get_or_create(pool: &DbPool, new: NewScan) -> Result<Scan, StateError> {
        if let Some(existing) = Self::find(pool, new.check_id, &new.scan_name).await? {
            return Ok(existing);
        }

        let insert = sqlx::query(
            r#"INSERT INTO scan (check_id, scan_name, status, outputs_test_id) VALUES ($1, $2, 'new', '{}')"#,
        )
        .bind(new.check_id)
        .bind(&new.scan_name)
        .execute(pool)
        .await;

        match insert {
            Ok(_) => Self::find(pool, new.check_id, &new.scan_name)
                .await?
                .ok_or(StateError::ScanNotFound(0)),
            Err(err) if is_unique_violation(&err) => Self::find(pool, new.check_id, &new.scan_name)
                .await?
                .ok_or(StateError::Database(err)),
            Err(err) => Err(err.into()),
        }
    }

    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    pub async fn start_scan(pool: &DbPool, check_id: i64, scan_name: &str) -> Result<Scan, StateError> {
        let scan = Self::get_or_create(
            pool,
            NewScan {
                check_id,
                scan_name: scan_name.to_string(),
            },
        )
        .await?;

        if !scan.status.can_start() {
            return Err(StateError::ScanCantBeScanned(format!(
                "scan {scan_name} is {:?}",
                scan.status
            )));
        }

        let now = Utc::now();
        sqlx::query("UPDATE scan SET status = 'in_progress', started_at = $1 WHERE id = $2")
            .bind(now)
            .bind(scan.id)
            .execute(pool)
            .await?;

        Self::find_by_id(pool, scan.id)
            .await?
            .ok_or(StateError::ScanNotFound(scan.id))
    }

    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    pub async fn complete_scan(
        pool: &DbPool,
        scan_id: i64,
        output_component_name: &str,
        output_external_test_id: &str,
        response: Option<Value>,
    ) -> Result<Scan, StateError> {
        let scan = Self::find_by_id(pool, scan_id)
            .await?
            .ok_or(StateError::ScanNotFound(scan_id))?;

        let mut outputs_test_id = scan.outputs_test_id.clone();
        outputs_test_id.insert(output_component_name.to_string(), output_external_test_id.to_string());
        let outputs_json = serde_json::to_string(&outputs_test_id)?;
        let response_json = response.map(|v| serde_json::to_string(&v)).transpose()?;
        let now = Utc::now();

        sqlx::query(
            "UPDATE scan SET status = 'done', finished_at = $1, outputs_test_id = $2, response = COALESCE($3, response) WHERE id = $4",
        )
        .bind(now)
        .bind(&outputs_json)
        .bind(&response_json)
        .bind(scan_id)
        .execute(pool)
        .await?;

        Self::find_by_id(pool, scan_id)
            .await?
            .ok_or(StateError::ScanNotFound(scan_id))
    }

    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    pub async fn handle_failure(
        pool: &DbPool,
        check_id: i64,
        scan_name: &str,
        skip: bool,
    ) -> Result<(), StateError> {
        let Some(scan) = Self::find(pool, check_id, scan_name).await? else {
            return Ok(());
        };
        let status = if skip { "skip" } else { "error" };
        sqlx::query("UPDATE scan SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(scan.id)
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[cfg(feature = "sqlite")]
fn row_to_scan_sqlite(
    row: (i64, i64, String, String, Option<String>, Option<String>, Option<String>, String),
) -> Result<Scan, StateError> {
    let (id, check_id, scan_name, status, started_at, finished_at, response, outputs_test_id) = row;
    Ok(Scan {
        id,
        check_id,
        scan_name,
        status: status_from_str(&status),
        started_at: started_at.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }),
        finished_at: finished_at.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }),
        response: response.map(|r| serde_json::from_str(&r)).transpose()?,
        outputs_test_id: serde_json::from_str(&outputs_test_id)?,
    })
}

#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
fn row_to_scan_pg(
    row: (
        i64,
        i64,
        String,
        String,
        Option<DateTime<Utc>>,
        Option<DateTime<Utc>>,
        Option<String>,
        String,
    ),
) -> Result<Scan, StateError> {
    let (id, check_id, scan_name, status, started_at, finished_at, response, outputs_test_id) = row;
    Ok(Scan {
        id,
        check_id,
        scan_name,
        status: status_from_str(&status),
        started_at,
        finished_at,
        response: response.map(|r| serde_json::from_str(&r)).transpose()?,
        outputs_test_id: serde_json::from_str(&outputs_test_id)?,
    })
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use warden_db::{create_pool, DbConfig};

    #[tokio::test]
    async fn start_scan_then_retry_after_error() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        sqlx::query("INSERT INTO check_run (external_id, event_kind, event_payload, commit_id, branch, project_name, source_url, prefix, created_at, updated_at) VALUES ('x','push','{}','c','main','p','u','gitlab','2020-01-01T00:00:00Z','2020-01-01T00:00:00Z')")
            .execute(&pool)
            .await
            .unwrap();

        let scan = ScanStore::start_scan(&pool, 1, "gitleaks").await.unwrap();
        assert_eq!(scan.status, ScanStatus::InProgress);

        let err = ScanStore::start_scan(&pool, 1, "gitleaks").await;
        assert!(matches!(err, Err(StateError::ScanCantBeScanned(_))));

        ScanStore::handle_failure(&pool, 1, "gitleaks", false).await.unwrap();
        let retried = ScanStore::start_scan(&pool, 1, "gitleaks").await.unwrap();
        assert_eq!(retried.status, ScanStatus::InProgress);
    }

    #[tokio::test]
    async fn complete_scan_merges_outputs_test_id() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        sqlx::query("INSERT INTO check_run (external_id, event_kind, event_payload, commit_id, branch, project_name, source_url, prefix, created_at, updated_at) VALUES ('x','push','{}','c','main','p','u','gitlab','2020-01-01T00:00:00Z','2020-01-01T00:00:00Z')")
            .execute(&pool)
            .await
            .unwrap();
        let scan = ScanStore::start_scan(&pool, 1, "gitleaks").await.unwrap();

        let completed = ScanStore::complete_scan(&pool, scan.id, "defectdojo", "42", None)
            .await
            .unwrap();
        assert_eq!(completed.status, ScanStatus::Done);
        assert_eq!(completed.outputs_test_id.get("defectdojo").unwrap(), "42");
    }
}
