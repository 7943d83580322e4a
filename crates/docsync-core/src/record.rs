use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A student document as stored in the index and carried in exported artifacts.
///
/// Field names follow the index mapping (`updateTime`, `createTime`).
/// Unknown fields are ignored on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sex: Option<String>,
    #[serde(with = "timestamp")]
    pub update_time: DateTime<Utc>,
    #[serde(
        default,
        with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub create_time: Option<DateTime<Utc>>,
}

impl StudentRecord {
    /// Modification time used for watermark computation.
    pub fn modified_at(&self) -> DateTime<Utc> {
        self.update_time
    }

    /// Copy of this record restricted to the exported field set.
    pub fn projected(&self) -> Self {
        Self {
            create_time: None,
            ..self.clone()
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Int(i64),
    }

    match Id::deserialize(deserializer)? {
        Id::Text(s) => Ok(s),
        Id::Int(n) => Ok(n.to_string()),
    }
}

/// Lenient timestamp (de)serialization.
///
/// Writes RFC 3339 with millisecond precision. Reads RFC 3339,
/// `yyyy-MM-dd HH:mm:ss[.SSS]` (taken as UTC), or epoch milliseconds.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    impl Raw {
        fn into_utc(self) -> Result<DateTime<Utc>, String> {
            match self {
                Raw::Millis(ms) => DateTime::from_timestamp_millis(ms)
                    .ok_or_else(|| format!("epoch millis out of range: {}", ms)),
                Raw::Text(s) => parse(&s),
            }
        }
    }

    /// Parse a timestamp string in any of the accepted layouts.
    pub fn parse(s: &str) -> Result<DateTime<Utc>, String> {
        let s = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }
        for fmt in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                return Ok(naive.and_utc());
            }
        }
        Err(format!("unrecognized timestamp: {:?}", s))
    }

    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        Raw::deserialize(d)?.into_utc().map_err(D::Error::custom)
    }

    pub mod option {
        use super::Raw;
        use chrono::{DateTime, Utc};
        use serde::de::Error as _;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            t: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match t {
                Some(t) => super::serialize(t, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<Raw>::deserialize(d)? {
                Some(raw) => raw.into_utc().map(Some).map_err(D::Error::custom),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_reads_all_timestamp_layouts() {
        let expected = Utc.with_ymd_and_hms(2025, 9, 5, 10, 11, 12).unwrap()
            + chrono::TimeDelta::milliseconds(345);

        for raw in [
            r#""2025-09-05T10:11:12.345Z""#,
            r#""2025-09-05T18:11:12.345+08:00""#,
            r#""2025-09-05 10:11:12.345""#,
            "1757067072345",
        ] {
            let json = format!(r#"{{"id":"s1","name":"Ann","updateTime":{}}}"#, raw);
            let record: StudentRecord = serde_json::from_str(&json).unwrap();
            assert_eq!(record.update_time, expected, "layout {}", raw);
        }
    }

    #[test]
    fn test_numeric_id_and_unknown_fields() {
        let json = r#"{"id":42,"name":"Bo","age":19,"sex":"M","updateTime":"2025-01-01 00:00:00","extra":true}"#;
        let record: StudentRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, "42");
        assert_eq!(record.age, Some(19));
        assert!(record.create_time.is_none());
    }

    #[test]
    fn test_writes_rfc3339_and_skips_absent_fields() {
        let record = StudentRecord {
            id: "s1".into(),
            name: Some("Ann".into()),
            age: None,
            sex: Some("F".into()),
            update_time: Utc.with_ymd_and_hms(2025, 9, 5, 10, 0, 0).unwrap(),
            create_time: Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
        };

        let value = serde_json::to_value(record.projected()).unwrap();
        assert_eq!(value["updateTime"], "2025-09-05T10:00:00.000Z");
        assert!(value.get("age").is_none());
        assert!(value.get("createTime").is_none());
    }

    #[test]
    fn test_rejects_garbage_timestamp() {
        let json = r#"{"id":"s1","updateTime":"yesterday"}"#;
        assert!(serde_json::from_str::<StudentRecord>(json).is_err());
    }
}
