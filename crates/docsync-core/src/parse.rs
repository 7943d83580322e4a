use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::error::StorageError;
use crate::record::{timestamp, StudentRecord};

/// A pure parsing function turning object content into records.
pub type ParseFn = fn(&str) -> Result<Vec<StudentRecord>, StorageError>;

/// Maps a type tag (the object key's extension) to a parsing function.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<String, ParseFn>,
}

impl fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.parsers.keys().collect();
        tags.sort();
        f.debug_struct("ParserRegistry").field("tags", &tags).finish()
    }
}

impl ParserRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `json` and `csv` parsers.
    pub fn with_defaults() -> Self {
        Self::new()
            .with_parser("json", parse_json_records)
            .with_parser("csv", parse_csv_records)
    }

    /// Register (or replace) the parser for a tag.
    pub fn with_parser(mut self, tag: &str, parser: ParseFn) -> Self {
        self.parsers.insert(tag.to_ascii_lowercase(), parser);
        self
    }

    pub fn get(&self, tag: &str) -> Option<ParseFn> {
        self.parsers.get(&tag.to_ascii_lowercase()).copied()
    }

    /// Parse an object's content using the parser registered for its key.
    pub fn parse_object(&self, key: &str, content: &str) -> Result<Vec<StudentRecord>, StorageError> {
        let tag = type_tag(key).ok_or_else(|| {
            StorageError::InvalidArgument(format!("Object {} has no type extension", key))
        })?;
        let parser = self.get(tag).ok_or_else(|| {
            StorageError::InvalidArgument(format!("No parser registered for tag {:?}", tag))
        })?;
        parser(content)
    }
}

/// Extension of the last path segment of an object key.
pub fn type_tag(key: &str) -> Option<&str> {
    let name = key.rsplit('/').next().unwrap_or(key);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
        _ => None,
    }
}

/// Parse a JSON object or a non-empty JSON array of objects.
pub fn parse_json_records(content: &str) -> Result<Vec<StudentRecord>, StorageError> {
    let root: Value = serde_json::from_str(content)
        .map_err(|e| StorageError::Parse(format!("Invalid JSON: {}", e)))?;

    match root {
        Value::Object(_) => Ok(vec![record_from_value(root)?]),
        Value::Array(items) if items.is_empty() => {
            Err(StorageError::Parse("JSON array is empty".to_string()))
        }
        Value::Array(items) => items.into_iter().map(record_from_value).collect(),
        _ => Err(StorageError::Parse(
            "JSON content must be an object or an array".to_string(),
        )),
    }
}

fn record_from_value(value: Value) -> Result<StudentRecord, StorageError> {
    serde_json::from_value(value)
        .map_err(|e| StorageError::Parse(format!("Invalid student record: {}", e)))
}

/// Parse line-oriented `id,name,age,sex,updateTime` content.
///
/// The first line is a header and is skipped, as are blank lines.
pub fn parse_csv_records(content: &str) -> Result<Vec<StudentRecord>, StorageError> {
    content
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .map(parse_csv_line)
        .collect()
}

fn parse_csv_line(line: &str) -> Result<StudentRecord, StorageError> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 5 {
        return Err(StorageError::Parse(format!("Illegal data line: {}", line)));
    }

    let age = if parts[2].is_empty() {
        None
    } else {
        Some(parts[2].parse::<i32>().map_err(|e| {
            StorageError::Parse(format!("Invalid age {:?} in line {:?}: {}", parts[2], line, e))
        })?)
    };
    let update_time = timestamp::parse(parts[4]).map_err(StorageError::Parse)?;

    Ok(StudentRecord {
        id: parts[0].to_string(),
        name: (!parts[1].is_empty()).then(|| parts[1].to_string()),
        age,
        sex: (!parts[3].is_empty()).then(|| parts[3].to_string()),
        update_time,
        create_time: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag() {
        assert_eq!(type_tag("2025/09/05/abc.json"), Some("json"));
        assert_eq!(type_tag("2025/09/05/abc.tar.CSV"), Some("CSV"));
        assert_eq!(type_tag("2025/09/05/noext"), None);
        assert_eq!(type_tag("2025/09.05/.hidden"), None);
    }

    #[test]
    fn test_json_object_and_array() {
        let one = r#"{"id":"1","name":"Ann","updateTime":"2025-09-05T00:00:00Z"}"#;
        assert_eq!(parse_json_records(one).unwrap().len(), 1);

        let many = format!("[{},{}]", one, one.replace("\"1\"", "\"2\""));
        let records = parse_json_records(&many).unwrap();
        assert_eq!(records.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), ["1", "2"]);
    }

    #[test]
    fn test_json_rejects_empty_array_and_scalars() {
        assert!(matches!(parse_json_records("[]"), Err(StorageError::Parse(_))));
        assert!(matches!(parse_json_records("42"), Err(StorageError::Parse(_))));
        assert!(matches!(parse_json_records("{not json"), Err(StorageError::Parse(_))));
    }

    #[test]
    fn test_csv_skips_header_and_blank_lines() {
        let content = "id,name,age,sex,updateTime\n1,Ann,20,F,2025-09-05 08:00:00\n\n2,Bo,,M,2025-09-05T09:00:00Z\n";
        let records = parse_csv_records(content).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].age, Some(20));
        assert_eq!(records[1].age, None);
        assert_eq!(records[1].sex.as_deref(), Some("M"));
    }

    #[test]
    fn test_csv_rejects_short_line() {
        let content = "header\n1,Ann,20\n";
        assert!(matches!(parse_csv_records(content), Err(StorageError::Parse(_))));
    }

    #[test]
    fn test_registry_dispatches_by_extension() {
        let registry = ParserRegistry::with_defaults();
        let json = r#"{"id":"1","updateTime":"2025-09-05T00:00:00Z"}"#;
        assert_eq!(registry.parse_object("2025/09/05/a.JSON", json).unwrap().len(), 1);

        let err = registry.parse_object("2025/09/05/a.xml", "<x/>").unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }
}
