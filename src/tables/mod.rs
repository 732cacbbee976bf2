//! Schema inference over structured export payloads
//!
//! Converts unknown JSON and HTML documents into named relational tables
//! without prior schema knowledge. Flattening is intentionally shallow: one
//! level of record nesting is expanded into dotted columns, and anything
//! still nested after that is serialized to a JSON string so every column
//! is scalar before persistence.

mod markup;

pub use markup::tables_from_markup;

use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, warn};

/// A relational table inferred from a single document
#[derive(Debug, Clone, PartialEq)]
pub struct InferredTable {
    /// Sanitized table name, `^[A-Za-z][A-Za-z0-9_]*$`
    pub name: String,
    /// Column names in first-seen order
    pub columns: Vec<String>,
    /// Rows aligned with `columns`; missing cells are None
    pub rows: Vec<Vec<Option<String>>>,
}

impl InferredTable {
    /// A table with no rows or no columns carries nothing worth persisting
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.columns.is_empty()
    }
}

/// Shape of a JSON value, resolved once per key at flatten time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// Null, bool, number or string
    Scalar,
    /// A list to be treated as table rows
    Rows,
    /// A single record to be treated as a one-row table
    Record,
    /// Empty list or empty object; skipped, not an error
    Empty,
}

fn shape_of(value: &Value) -> Shape {
    match value {
        Value::Array(items) if items.is_empty() => Shape::Empty,
        Value::Array(_) => Shape::Rows,
        Value::Object(fields) if fields.is_empty() => Shape::Empty,
        Value::Object(_) => Shape::Record,
        _ => Shape::Scalar,
    }
}

/// Derive a table name from a file path relative to the extraction root
///
/// `connections/contacts/synced_contacts.json` becomes
/// `connections__contacts__synced_contacts`. Characters outside
/// `[A-Za-z0-9_]` are replaced with `_` and the result is forced to start
/// with a letter.
pub fn table_name_from_path(file_path: &Path, base_path: &Path) -> String {
    let relative = file_path.strip_prefix(base_path).unwrap_or(file_path);
    let stem = relative.with_extension("");

    let joined = stem
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("__");

    sanitize_table_name(&joined)
}

/// Sanitize an arbitrary string into a valid SQLite table name
pub fn sanitize_table_name(raw: &str) -> String {
    let mut name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    if !name.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        name = format!("t_{}", name);
    }
    name
}

/// Convert a JSON value into a scalar cell
fn cell_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        // Still nested after flattening: serialize to a JSON string leaf
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

/// Flatten a record one level deep into (column, cell) pairs
///
/// Nested records contribute dotted columns (`address.city`); anything
/// nested beyond that, and all arrays, become stringified JSON cells.
/// Column order follows document order (serde_json's preserve_order).
fn flatten_record(record: &Map<String, Value>) -> Vec<(String, Option<String>)> {
    let mut cells = Vec::new();
    for (key, value) in record {
        match value {
            Value::Object(inner) if !inner.is_empty() => {
                for (inner_key, inner_value) in inner {
                    cells.push((format!("{}.{}", key, inner_key), cell_of(inner_value)));
                }
            }
            _ => cells.push((key.clone(), cell_of(value))),
        }
    }
    cells
}

/// Build a table from a list of records, keeping first-seen column order
fn table_from_rows(name: String, records: &[Value]) -> InferredTable {
    let mut columns: Vec<String> = Vec::new();
    let mut raw_rows: Vec<Vec<(String, Option<String>)>> = Vec::new();

    for record in records {
        let cells = match record {
            Value::Object(fields) => flatten_record(fields),
            // A list of bare scalars becomes a single-column table
            other => vec![("value".to_string(), cell_of(other))],
        };
        for (column, _) in &cells {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        raw_rows.push(cells);
    }

    let rows = raw_rows
        .into_iter()
        .map(|cells| {
            columns
                .iter()
                .map(|col| {
                    cells
                        .iter()
                        .find(|(name, _)| name == col)
                        .and_then(|(_, value)| value.clone())
                })
                .collect()
        })
        .collect();

    InferredTable { name, columns, rows }
}

/// Infer zero or more tables from a JSON document
///
/// A top-level list becomes one table named `base_name`; a top-level object
/// yields one table per non-empty list or record key, named
/// `<base_name>__<key>`. Empty values are skipped with a debug note.
pub fn tables_from_json(content: &str, base_name: &str) -> serde_json::Result<Vec<InferredTable>> {
    let document: Value = serde_json::from_str(content)?;
    let mut tables = Vec::new();

    match shape_of(&document) {
        Shape::Rows => {
            if let Value::Array(items) = &document {
                tables.push(table_from_rows(base_name.to_string(), items));
            }
        }
        Shape::Record => {
            if let Value::Object(fields) = &document {
                for (key, value) in fields {
                    let table_name = sanitize_table_name(&format!("{}__{}", base_name, key));
                    match shape_of(value) {
                        Shape::Rows => {
                            if let Value::Array(items) = value {
                                tables.push(table_from_rows(table_name, items));
                            }
                        }
                        Shape::Record => {
                            tables.push(table_from_rows(table_name, std::slice::from_ref(value)));
                        }
                        Shape::Empty => {
                            debug!("Skipping empty value for key '{}' in {}", key, base_name);
                        }
                        Shape::Scalar => {
                            debug!("Skipping scalar key '{}' in {}", key, base_name);
                        }
                    }
                }
            }
        }
        Shape::Empty => debug!("Empty top-level value in {}", base_name),
        Shape::Scalar => debug!("Scalar top-level value in {}", base_name),
    }

    tables.retain(|t| {
        if t.is_empty() {
            warn!("Dropping table '{}' with no usable rows/columns", t.name);
            false
        } else {
            true
        }
    });

    Ok(tables)
}

/// Infer tables from one structured file on disk
///
/// Malformed content yields zero tables and a warning; it never aborts the
/// surrounding run.
pub fn tables_from_file(path: &Path, base_path: &Path, is_markup: bool) -> Vec<InferredTable> {
    let base_name = table_name_from_path(path, base_path);

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Cannot read {:?}: {}", path, e);
            return Vec::new();
        }
    };

    let tables = if is_markup {
        tables_from_markup(&content, &base_name)
    } else {
        match tables_from_json(&content, &base_name) {
            Ok(tables) => tables,
            Err(e) => {
                warn!("Malformed JSON in {:?}: {}", path, e);
                return Vec::new();
            }
        }
    };

    debug!(
        "Inferred {} table(s) from {:?}: {:?}",
        tables.len(),
        path,
        tables.iter().map(|t| t.name.as_str()).collect::<Vec<_>>()
    );
    tables
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use std::path::PathBuf;

    fn name_pattern() -> Regex {
        Regex::new("^[A-Za-z][A-Za-z0-9_]*$").unwrap()
    }

    #[test]
    fn test_table_name_from_nested_path() {
        let base = PathBuf::from("/tmp/extract");
        let file = base.join("connections/contacts/synced_contacts.json");
        assert_eq!(
            table_name_from_path(&file, &base),
            "connections__contacts__synced_contacts"
        );
    }

    #[test]
    fn test_sanitized_names_always_match_pattern() {
        let pattern = name_pattern();
        for raw in [
            "connections/contacts",
            "2021 archive",
            "média-sociaux",
            "__private",
            "9lives",
            "posts (copy)",
        ] {
            let name = sanitize_table_name(raw);
            assert!(pattern.is_match(&name), "bad name {:?} from {:?}", name, raw);
        }
    }

    #[test]
    fn test_top_level_list_becomes_one_table() {
        let tables = tables_from_json(
            r#"[{"name":"A","age":30},{"name":"B"}]"#,
            "data__friends",
        )
        .unwrap();

        assert_eq!(tables.len(), 1);
        let table = &tables[0];
        assert_eq!(table.name, "data__friends");
        assert_eq!(table.columns, vec!["name", "age"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], vec![Some("B".to_string()), None]);
    }

    #[test]
    fn test_object_keys_become_separate_tables_and_empties_are_skipped() {
        let tables = tables_from_json(
            r#"{"posts": [{"title":"hi"}], "settings": {}}"#,
            "content",
        )
        .unwrap();

        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "content__posts");
        assert_eq!(tables[0].rows.len(), 1);
    }

    #[test]
    fn test_record_key_becomes_one_row_table() {
        let tables = tables_from_json(
            r#"{"profile": {"username": "ana", "verified": false}}"#,
            "account",
        )
        .unwrap();

        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "account__profile");
        assert_eq!(tables[0].rows.len(), 1);
        assert_eq!(
            tables[0].rows[0],
            vec![Some("ana".to_string()), Some("false".to_string())]
        );
    }

    #[test]
    fn test_one_level_flatten_then_stringify() {
        let tables = tables_from_json(
            r#"[{"id": 1, "address": {"city": "Lisbon", "geo": {"lat": 38.7}}, "tags": ["a","b"]}]"#,
            "places",
        )
        .unwrap();

        let table = &tables[0];
        assert_eq!(
            table.columns,
            vec!["id", "address.city", "address.geo", "tags"]
        );
        assert_eq!(
            table.rows[0],
            vec![
                Some("1".to_string()),
                Some("Lisbon".to_string()),
                Some(r#"{"lat":38.7}"#.to_string()),
                Some(r#"["a","b"]"#.to_string()),
            ]
        );
    }

    #[test]
    fn test_list_of_scalars() {
        let tables = tables_from_json(r#"{"hashtags": ["sun", "sea"]}"#, "posts").unwrap();
        assert_eq!(tables[0].columns, vec!["value"]);
        assert_eq!(tables[0].rows.len(), 2);
    }

    #[test]
    fn test_malformed_file_contributes_zero_tables() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();

        let tables = tables_from_file(&path, dir.path(), false);
        assert!(tables.is_empty());
    }
}
