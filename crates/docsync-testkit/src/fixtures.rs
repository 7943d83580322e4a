use chrono::{DateTime, TimeDelta, Utc};
use docsync_core::StudentRecord;

/// A student record modified at `update_time`.
pub fn student(id: &str, update_time: DateTime<Utc>) -> StudentRecord {
    StudentRecord {
        id: id.to_string(),
        name: Some(format!("student-{}", id)),
        age: Some(18),
        sex: Some("F".to_string()),
        update_time,
        create_time: None,
    }
}

/// A student record modified `offset_ms` milliseconds after `base`.
pub fn student_at(id: &str, base: DateTime<Utc>, offset_ms: i64) -> StudentRecord {
    student(id, base + TimeDelta::milliseconds(offset_ms))
}
