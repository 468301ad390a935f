//! `Notification` row: one per `(scan, channel)`, guarding at-most-once
//! delivery (C7).
//!
//! A notification task can run more than once — a worker crash and retry, a
//! re-delivered webhook landing on a scan that's already `Done` — so sending
//! goes through [`NotificationStore::claim_for_send`], which locks the row
//! (`SELECT ... FOR UPDATE` on postgres), inserts it with the caller's
//! payload if this is the first attempt, and on a retry hands back the
//! *already-stored* payload rather than the caller's freshly-built one. A
//! handler that regenerates its payload from live scan state on every call
//! will still (re)send the first attempt's payload on retry; this is
//! intentional, matching the behavior observed in the Slack notifier this
//! crate is grounded on, not a bug to paper over.

use serde_json::Value;
use warden_db::DbPool;

use crate::{is_unique_violation, StateError};

#[derive(Debug, Clone)]
pub struct Notification {
    pub id: i64,
    pub scan_id: i64,
    pub channel: String,
    pub payload: Value,
    pub is_sent: bool,
}

pub struct NotificationStore;

impl NotificationStore {
    /// Claim the `(scan_id, channel)` notification for sending. Returns
    /// `Some(notification)` with the payload to actually send if it hasn't
    /// been sent yet (the first time this is `payload`, every other time it's
    /// whatever was stored on the first attempt); returns `None` if it was
    /// already sent, so the caller should skip sending entirely.
    #[cfg(feature = "sqlite")]
    pub async fn claim_for_send(
        pool: &DbPool,
        scan_id: i64,
        channel: &str,
        payload: &Value,
    ) -> Result<Option<Notification>, StateError> {
        let mut tx = pool.begin().await?;

        let existing: Option<(i64, i64, String, String, i64)> = sqlx::query_as(
            "SELECT id, scan_id, channel, payload, is_sent FROM notification WHERE scan_id = ? AND channel = ?",
        )
        .bind(scan_id)
        .bind(channel)
        .fetch_optional(&mut *tx)
        .await?;

        let notification = match existing {
            Some(row) => row_to_notification(row)?,
            None => {
                let payload_json = serde_json::to_string(payload)?;
                let insert = sqlx::query(
                    "INSERT INTO notification (scan_id, channel, payload, is_sent) VALUES (?, ?, ?, 0)",
                )
                .bind(scan_id)
                .bind(channel)
                .bind(&payload_json)
                .execute(&mut *tx)
                .await;

                match insert {
                    Ok(_) => {
                        let row: (i64, i64, String, String, i64) = sqlx::query_as(
                            "SELECT id, scan_id, channel, payload, is_sent FROM notification WHERE scan_id = ? AND channel = ?",
                        )
                        .bind(scan_id)
                        .bind(channel)
                        .fetch_one(&mut *tx)
                        .await?;
                        row_to_notification(row)?
                    }
                    Err(err) if is_unique_violation(&err) => {
                        let row: (i64, i64, String, String, i64) = sqlx::query_as(
                            "SELECT id, scan_id, channel, payload, is_sent FROM notification WHERE scan_id = ? AND channel = ?",
                        )
                        .bind(scan_id)
                        .bind(channel)
                        .fetch_one(&mut *tx)
                        .await?;
                        row_to_notification(row)?
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        };

        tx.commit().await?;

        if notification.is_sent {
            Ok(None)
        } else {
            Ok(Some(notification))
        }
    }

    #[cfg(feature = "sqlite")]
    pub async fn mark_sent(pool: &DbPool, notification_id: i64) -> Result<(), StateError> {
        sqlx::query("UPDATE notification SET is_sent = 1 WHERE id = ?")
            .bind(notification_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    pub async fn claim_for_send(
        pool: &DbPool,
        scan_id: i64,
        channel: &str,
        payload: &Value,
    ) -> Result<Option<Notification>, StateError> {
        let mut tx = pool.begin().await?;

        let existing: Option<(i64, i64, String, String, bool)> = sqlx::query_as(
            "SELECT id, scan_id, channel, payload, is_sent FROM notification WHERE scan_id = $1 AND channel = $2 FOR UPDATE",
        )
        .bind(scan_id)
        .bind(channel)
        .fetch_optional(&mut *tx)
        .await?;

        let notification = match existing {
            Some(row) => row_to_notification_pg(row)?,
            None => {
                let payload_json = serde_json::to_string(payload)?;
                let insert = sqlx::query(
                    "INSERT INTO notification (scan_id, channel, payload, is_sent) VALUES ($1, $2, $3, FALSE)",
                )
                .bind(scan_id)
                .bind(channel)
                .bind(&payload_json)
                .execute(&mut *tx)
                .await;

                match insert {
                    Ok(_) => {
                        let row: (i64, i64, String, String, bool) = sqlx::query_as(
                            "SELECT id, scan_id, channel, payload, is_sent FROM notification WHERE scan_id = $1 AND channel = $2 FOR UPDATE",
                        )
                        .bind(scan_id)
                        .bind(channel)
                        .fetch_one(&mut *tx)
                        .await?;
                        row_to_notification_pg(row)?
                    }
                    Err(err) if is_unique_violation(&err) => {
                        let row: (i64, i64, String, String, bool) = sqlx::query_as(
                            "SELECT id, scan_id, channel, payload, is_sent FROM notification WHERE scan_id = $1 AND channel = $2 FOR UPDATE",
                        )
                        .bind(scan_id)
                        .bind(channel)
                        .fetch_one(&mut *tx)
                        .await?;
                        row_to_notification_pg(row)?
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        };

        tx.commit().await?;

        if notification.is_sent {
            Ok(None)
        } else {
            Ok(Some(notification))
        }
    }

    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    pub async fn mark_sent(pool: &DbPool, notification_id: i64) -> Result<(), StateError> {
        sqlx::query("UPDATE notification SET is_sent = TRUE WHERE id = $1")
            .bind(notification_id)
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[cfg(feature = "sqlite")]
fn row_to_notification(row: (i64, i64, String, String, i64)) -> Result<Notification, StateError> {
    let (id, scan_id, channel, payload, is_sent) = row;
    Ok(Notification {
        id,
        scan_id,
        channel,
        payload: serde_json::from_str(&payload)?,
        is_sent: is_sent != 0,
    })
}

#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
fn row_to_notification_pg(row: (i64, i64, String, String, bool)) -> Result<Notification, StateError> {
    let (id, scan_id, channel, payload, is_sent) = row;
    Ok(Notification {
        id,
        scan_id,
        channel,
        payload: serde_json::from_str(&payload)?,
        is_sent,
    })
}
