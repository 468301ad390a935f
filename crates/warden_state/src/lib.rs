//! Durable state store (C3): `Check`, `Scan`, and `Notification` tables,
//! each with a get-or-create-with-retry helper for the unique-constraint
//! race a concurrent webhook delivery can trigger, plus the scan lifecycle
//! transitions and notification dedup logic layered on top (C5, C7).

pub mod check;
pub mod notification;
pub mod scan;

pub use check::{Check, CheckStore, NewCheck};
pub use notification::{Notification, NotificationStore};
pub use scan::{NewScan, Scan, ScanStore};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("malformed json in column: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("scan can't be scanned: {0}")]
    ScanCantBeScanned(String),

    #[error("scan not found: id={0}")]
    ScanNotFound(i64),
}

/// True iff `err` is a unique-constraint violation, used to detect the
/// get-then-insert race on `Check`/`Scan`/`Notification` rows, the same
/// `IntegrityError`-catch-and-reread pattern the original uses.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}
