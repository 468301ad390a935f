//! Carry-tag argument transform and the default failure hook (C8).
//!
//! Mirrors `utils.py`'s `serializer`/`deserializer`: a typed record crossing a
//! task boundary is reduced to a plain map tagged with its type, and rebuilt
//! on the other side by validating the map against that type. Rust's
//! `ScanHandler`/`OutputHandler`/`NotificationHandler` traits already cross
//! the boundary structurally (no dynamic `__path__` lookup needed to pick a
//! deserializer), so this module's job shrinks to two things: actually
//! performing the tag-and-round-trip (kept so a payload really does survive a
//! JSON boundary, the way a broker would impose one) and the default
//! `on_failure` state transition every handler inherits.

use serde::de::DeserializeOwned;
use serde_json::Value;
use warden_db::DbPool;
use warden_protocol::{Taggable, WardenError};
use warden_state::{ScanStore, StateError};

use crate::PipelineError;

const TAG_KEY: &str = "__path__";

/// Reduce `value` to its tagged map form, as if handing it to a broker.
pub fn to_tagged_json<T>(value: &T) -> Result<Value, PipelineError>
where
    T: Taggable + serde::Serialize,
{
    let mut encoded = serde_json::to_value(value)?;
    if let Value::Object(map) = &mut encoded {
        map.insert(TAG_KEY.to_string(), Value::String(T::KIND.to_string()));
    }
    Ok(encoded)
}

/// Rebuild a `T` from its tagged map form, as a worker dequeueing the task
/// would. The tag itself isn't used to pick the type here — the call site
/// already knows it structurally — but it's stripped before deserializing so
/// `T`'s `Deserialize` impl doesn't have to tolerate an extra field.
pub fn from_tagged_json<T>(mut value: Value) -> Result<T, PipelineError>
where
    T: DeserializeOwned,
{
    if let Value::Object(map) = &mut value {
        map.remove(TAG_KEY);
    }
    Ok(serde_json::from_value(value)?)
}

/// The default `on_failure`: flip the owning scan to `ERROR`, unless the
/// handler raised `ScanExecutionSkipped`, in which case it's a `SKIP` — not a
/// failure at all, just a decision that this scan doesn't apply. Applies
/// uniformly whether the exception came from the scan, output, or
/// notification stage of a chain, since all three stages are scoped to one
/// `(check_id, scan_name)`.
pub async fn default_on_failure(
    pool: &DbPool,
    check_id: i64,
    scan_name: &str,
    error: &WardenError,
) -> Result<(), StateError> {
    let skip = matches!(error, WardenError::ScanExecutionSkipped(_));
    ScanStore::handle_failure(pool, check_id, scan_name, skip).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use warden_protocol::{ScanResult, ScanStatus};

    #[test]
    fn tag_round_trips_through_json() {
        let result = ScanResult {
            scan_name: "gitleaks".into(),
            status: ScanStatus::Done,
            response: serde_json::json!({"findings": 0}),
            outputs_test_id: HashMap::new(),
        };
        let tagged = to_tagged_json(&result).unwrap();
        assert_eq!(tagged.get("__path__").unwrap(), "scan_result");

        let rebuilt: ScanResult = from_tagged_json(tagged).unwrap();
        assert_eq!(rebuilt.scan_name, "gitleaks");
        assert_eq!(rebuilt.status, ScanStatus::Done);
    }
}
