use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Failure tag carried by every [`FailedObjectInfo`].
pub const METADATA_PARSE_FAILED: &str = "metadata_parse_failed";

/// A single listed object whose metadata could not be read during an
/// otherwise successful prefix scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedObjectInfo {
    prefix: String,
    object_name_hint: Option<String>,
    failure_reason: &'static str,
    error_message: String,
    observed_at: DateTime<Utc>,
}

impl FailedObjectInfo {
    pub fn new(
        prefix: impl Into<String>,
        object_name_hint: Option<String>,
        error_message: impl Into<String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            object_name_hint,
            failure_reason: METADATA_PARSE_FAILED,
            error_message: error_message.into(),
            observed_at,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn object_name_hint(&self) -> Option<&str> {
        self.object_name_hint.as_deref()
    }

    pub fn failure_reason(&self) -> &'static str {
        self.failure_reason
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }
}

impl fmt::Display for FailedObjectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FailedObjectInfo{{prefix='{}', hint='{}', reason='{}', error='{}'}}",
            self.prefix,
            self.object_name_hint.as_deref().unwrap_or("-"),
            self.failure_reason,
            self.error_message
        )
    }
}

/// Outcome of a partitioned object store scan.
///
/// Distinguishes prefix-level failures (a whole date partition could not be
/// listed, so data may be missing) from object-level failures (one entry's
/// metadata was unreadable). Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    objects: BTreeMap<String, DateTime<Utc>>,
    success: bool,
    failed_prefixes: Vec<String>,
    failed_objects: Vec<FailedObjectInfo>,
}

impl ScanResult {
    /// Build a result. `success` is derived: true iff no prefix failed.
    pub fn new(
        objects: BTreeMap<String, DateTime<Utc>>,
        failed_prefixes: Vec<String>,
        failed_objects: Vec<FailedObjectInfo>,
    ) -> Self {
        Self {
            success: failed_prefixes.is_empty(),
            objects,
            failed_prefixes,
            failed_objects,
        }
    }

    /// Keys modified after the watermark, with their modification times.
    pub fn objects(&self) -> &BTreeMap<String, DateTime<Utc>> {
        &self.objects
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Prefixes whose listing exhausted every retry, in scan order.
    pub fn failed_prefixes(&self) -> &[String] {
        &self.failed_prefixes
    }

    pub fn failed_objects(&self) -> &[FailedObjectInfo] {
        &self.failed_objects
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Highest modification time among the found objects.
    pub fn latest_modified(&self) -> Option<DateTime<Utc>> {
        self.objects.values().copied().max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_success_follows_failed_prefixes() {
        let ok = ScanResult::new(BTreeMap::new(), vec![], vec![]);
        assert!(ok.is_success());
        assert!(ok.is_empty());

        let failed = ScanResult::new(BTreeMap::new(), vec!["2025/09/05/".into()], vec![]);
        assert!(!failed.is_success());
        assert_eq!(failed.failed_prefixes(), ["2025/09/05/".to_string()]);
    }

    #[test]
    fn test_object_failures_do_not_fail_scan() {
        let now = Utc.with_ymd_and_hms(2025, 9, 5, 0, 0, 0).unwrap();
        let info = FailedObjectInfo::new("2025/09/05/", None, "bad date", now);
        let result = ScanResult::new(BTreeMap::new(), vec![], vec![info.clone()]);

        assert!(result.is_success());
        assert_eq!(result.failed_objects()[0].failure_reason(), METADATA_PARSE_FAILED);
        assert!(info.to_string().contains("hint='-'"));
    }

    #[test]
    fn test_latest_modified() {
        let t1 = Utc.with_ymd_and_hms(2025, 9, 5, 1, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2025, 9, 5, 3, 0, 0).unwrap();
        let objects = BTreeMap::from([("b".to_string(), t2), ("a".to_string(), t1)]);
        let result = ScanResult::new(objects, vec![], vec![]);
        assert_eq!(result.latest_modified(), Some(t2));
    }
}
