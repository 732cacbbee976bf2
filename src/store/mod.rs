//! Per-identity datastore
//!
//! One embedded SQLite file per identity, sink for inferred tables and
//! media annotations and source for all later querying. Table shapes are
//! only known at runtime, so everything here is dynamic SQL over TEXT
//! columns; identifiers are always quoted.

use crate::error::{Error, Result};
use crate::media::{AnnotationPayload, MediaAnnotation};
use crate::tables::InferredTable;
use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Column, Row};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Columns shared by every media table, regardless of category
const MEDIA_COLUMNS: [&str; 9] = [
    "date",
    "filename",
    "uri",
    "media_type",
    "text",
    "description",
    "language",
    "segments",
    "metadata",
];

/// Result rows of a dynamic query
#[derive(Debug, Clone, Default)]
pub struct TableData {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl TableData {
    /// Render rows as a compact pipe-separated block, capped at `max_rows`
    pub fn render(&self, max_rows: usize) -> String {
        let mut out = String::new();
        out.push_str(&self.columns.join(" | "));
        for row in self.rows.iter().take(max_rows) {
            out.push('\n');
            let cells: Vec<&str> = row
                .iter()
                .map(|cell| cell.as_deref().unwrap_or("NULL"))
                .collect();
            out.push_str(&cells.join(" | "));
        }
        if self.rows.len() > max_rows {
            out.push_str(&format!("\n... ({} more rows)", self.rows.len() - max_rows));
        }
        out
    }
}

/// Quote an identifier for embedding in dynamic SQL
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Handle to one identity's datastore
#[derive(Clone)]
pub struct Datastore {
    pool: SqlitePool,
    path: PathBuf,
}

impl Datastore {
    /// Whether a datastore file already exists — the idempotency marker for
    /// the whole ingestion job
    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    /// Open (and create if missing) the datastore at the given path
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Opening datastore at {:?}", path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write an inferred table with replace-on-conflict semantics
    pub async fn write_table(&self, table: &InferredTable) -> Result<()> {
        if table.is_empty() {
            warn!("Refusing to write empty table '{}'", table.name);
            return Ok(());
        }

        info!("Saving table {} with {} rows", table.name, table.rows.len());

        let quoted_name = quote_ident(&table.name);
        let column_defs = table
            .columns
            .iter()
            .map(|c| format!("{} TEXT", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");

        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", quoted_name))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("CREATE TABLE {} ({})", quoted_name, column_defs))
            .execute(&mut *tx)
            .await?;

        let placeholders = vec!["?"; table.columns.len()].join(", ");
        let insert = format!("INSERT INTO {} VALUES ({})", quoted_name, placeholders);

        for row in &table.rows {
            let mut query = sqlx::query(&insert);
            for cell in row {
                query = query.bind(cell);
            }
            query.execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Append media annotations, one table per semantic bucket
    ///
    /// Annotations without a time bucket are skipped (logged, not an error).
    /// Returns the number of rows written.
    pub async fn append_media(
        &self,
        annotations: &[MediaAnnotation],
        extract_root: &Path,
    ) -> Result<usize> {
        let mut written = 0;

        for annotation in annotations {
            if !annotation.has_time_bucket() {
                warn!(
                    "Skipping media {:?}: no time bucket in path",
                    annotation.path
                );
                continue;
            }

            let table_name = format!("media__{}", annotation.semantic_bucket);
            self.ensure_media_table(&table_name).await?;

            let filename = annotation
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let uri = annotation
                .path
                .strip_prefix(extract_root)
                .unwrap_or(&annotation.path)
                .to_string_lossy()
                .into_owned();

            let (media_type, text, description, language, segments, metadata) =
                match &annotation.payload {
                    AnnotationPayload::Audio {
                        text,
                        segments,
                        language,
                        duration_secs,
                        bitrate_bps,
                    } => (
                        "audio",
                        Some(text.clone()),
                        None,
                        Some(language.clone()),
                        Some(serde_json::to_string(segments)?),
                        json!({
                            "length": duration_secs,
                            "bitrate": bitrate_bps,
                            "type": "audio",
                        }),
                    ),
                    AnnotationPayload::Image {
                        caption,
                        width,
                        height,
                        format,
                        mode,
                    } => (
                        "image",
                        None,
                        Some(caption.clone()),
                        None,
                        None,
                        json!({
                            "size": [width, height],
                            "format": format,
                            "mode": mode,
                            "type": "image",
                        }),
                    ),
                };

            let columns = MEDIA_COLUMNS
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            let insert = format!(
                "INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                quote_ident(&table_name),
                columns
            );

            sqlx::query(&insert)
                .bind(&annotation.time_bucket)
                .bind(&filename)
                .bind(&uri)
                .bind(media_type)
                .bind(&text)
                .bind(&description)
                .bind(&language)
                .bind(&segments)
                .bind(metadata.to_string())
                .execute(&self.pool)
                .await?;

            written += 1;
            debug!("Appended media row to {}", table_name);
        }

        if written > 0 {
            info!("Saved {} media records", written);
        }
        Ok(written)
    }

    async fn ensure_media_table(&self, table_name: &str) -> Result<()> {
        let column_defs = MEDIA_COLUMNS
            .iter()
            .map(|c| format!("{} TEXT", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(table_name),
            column_defs
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// List all user tables
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    /// Table names containing the given substring
    pub async fn tables_containing(&self, text: &str) -> Result<Vec<String>> {
        let tables = self.list_tables().await?;
        let matching: Vec<String> = tables
            .into_iter()
            .filter(|name| name.contains(text))
            .collect();
        debug!("Found {} tables containing '{}'", matching.len(), text);
        Ok(matching)
    }

    /// Column names of a table, in declaration order
    pub async fn table_columns(&self, table_name: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(table_name)))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .collect())
    }

    /// One-line-per-table schema summary for model prompts
    pub async fn schema_summary(&self) -> Result<String> {
        let mut lines = Vec::new();
        for table in self.list_tables().await? {
            let columns = self.table_columns(&table).await?;
            lines.push(format!("{}({})", table, columns.join(", ")));
        }
        Ok(lines.join("\n"))
    }

    /// Bulk-read a whole table
    pub async fn read_table(&self, table_name: &str) -> Result<TableData> {
        self.query_rows(&format!("SELECT * FROM {}", quote_ident(table_name)))
            .await
    }

    /// Execute a read-only query and collect rows as display strings
    ///
    /// Only SELECT (and WITH ... SELECT) statements are accepted; this is
    /// the execution surface handed to the natural-language-to-query agent.
    pub async fn query_rows(&self, sql: &str) -> Result<TableData> {
        let head = sql.trim_start().to_ascii_uppercase();
        if !head.starts_with("SELECT") && !head.starts_with("WITH") {
            return Err(Error::Other(format!(
                "Only SELECT queries are allowed, got: {}",
                sql.trim().chars().take(40).collect::<String>()
            )));
        }

        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;

        let mut data = TableData::default();
        if let Some(first) = rows.first() {
            data.columns = first
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect();
        }

        for row in &rows {
            let mut cells = Vec::with_capacity(data.columns.len());
            for i in 0..row.columns().len() {
                cells.push(display_value(row, i));
            }
            data.rows.push(cells);
        }

        Ok(data)
    }
}

/// Decode a dynamically typed SQLite cell into a display string
fn display_value(row: &sqlx::sqlite::SqliteRow, index: usize) -> Option<String> {
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return value;
    }
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return value.map(|v| v.to_string());
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return value.map(|v| v.to_string());
    }
    if let Ok(value) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return value.map(|v| format!("<{} bytes>", v.len()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::FileCategory;
    use crate::media::TranscriptSegment;
    use tempfile::TempDir;

    async fn test_store() -> (TempDir, Datastore) {
        let dir = TempDir::new().unwrap();
        let store = Datastore::open(&dir.path().join("archive_1.db"))
            .await
            .unwrap();
        (dir, store)
    }

    fn sample_table(name: &str) -> InferredTable {
        InferredTable {
            name: name.to_string(),
            columns: vec!["name".to_string(), "age".to_string()],
            rows: vec![
                vec![Some("A".to_string()), Some("30".to_string())],
                vec![Some("B".to_string()), None],
            ],
        }
    }

    fn image_annotation(path: &str) -> MediaAnnotation {
        MediaAnnotation {
            category: FileCategory::Image,
            path: PathBuf::from(path),
            time_bucket: crate::media::time_bucket(Path::new(path))
                .unwrap_or_else(|| "unknown".to_string()),
            semantic_bucket: crate::media::semantic_bucket(Path::new(path)),
            payload: AnnotationPayload::Image {
                caption: "a sunset".to_string(),
                width: 800,
                height: 600,
                format: "Jpeg".to_string(),
                mode: "Rgb8".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_write_table_replaces_existing() {
        let (_dir, store) = test_store().await;

        store.write_table(&sample_table("data__friends")).await.unwrap();

        let smaller = InferredTable {
            name: "data__friends".to_string(),
            columns: vec!["name".to_string()],
            rows: vec![vec![Some("C".to_string())]],
        };
        store.write_table(&smaller).await.unwrap();

        let data = store.read_table("data__friends").await.unwrap();
        assert_eq!(data.columns, vec!["name"]);
        assert_eq!(data.rows.len(), 1);
        assert_eq!(data.rows[0][0], Some("C".to_string()));
    }

    #[tokio::test]
    async fn test_media_append_accumulates_per_bucket() {
        let (dir, store) = test_store().await;
        let root = dir.path().to_path_buf();

        let first = image_annotation(&format!("{}/stories/202007/img1.jpg", root.display()));
        let second = image_annotation(&format!("{}/stories/202008/img2.jpg", root.display()));

        assert_eq!(store.append_media(&[first], &root).await.unwrap(), 1);
        assert_eq!(store.append_media(&[second], &root).await.unwrap(), 1);

        let data = store.read_table("media__stories").await.unwrap();
        assert_eq!(data.rows.len(), 2);

        let date_idx = data.columns.iter().position(|c| c == "date").unwrap();
        assert_eq!(data.rows[0][date_idx], Some("202007".to_string()));

        let uri_idx = data.columns.iter().position(|c| c == "uri").unwrap();
        assert_eq!(
            data.rows[0][uri_idx],
            Some("stories/202007/img1.jpg".to_string())
        );
    }

    #[tokio::test]
    async fn test_media_without_time_bucket_is_skipped() {
        let (dir, store) = test_store().await;
        let root = dir.path().to_path_buf();

        let no_date = image_annotation(&format!("{}/stories/misc/img.jpg", root.display()));
        assert_eq!(store.append_media(&[no_date], &root).await.unwrap(), 0);
        assert!(store.list_tables().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_audio_row_columns() {
        let (dir, store) = test_store().await;
        let root = dir.path().to_path_buf();

        let annotation = MediaAnnotation {
            category: FileCategory::Audio,
            path: root.join("posts/202103/note.mp3"),
            time_bucket: "202103".to_string(),
            semantic_bucket: "posts".to_string(),
            payload: AnnotationPayload::Audio {
                text: "hello".to_string(),
                segments: vec![TranscriptSegment {
                    start: 0.0,
                    end: 1.0,
                    text: "hello".to_string(),
                }],
                language: "en".to_string(),
                duration_secs: Some(1.0),
                bitrate_bps: Some(128_000),
            },
        };

        store.append_media(&[annotation], &root).await.unwrap();

        let data = store.read_table("media__posts").await.unwrap();
        let text_idx = data.columns.iter().position(|c| c == "text").unwrap();
        let lang_idx = data.columns.iter().position(|c| c == "language").unwrap();
        assert_eq!(data.rows[0][text_idx], Some("hello".to_string()));
        assert_eq!(data.rows[0][lang_idx], Some("en".to_string()));
    }

    #[tokio::test]
    async fn test_tables_containing_and_schema_summary() {
        let (_dir, store) = test_store().await;
        store.write_table(&sample_table("data__friends")).await.unwrap();
        store.write_table(&sample_table("inbox__threads")).await.unwrap();

        let matching = store.tables_containing("friends").await.unwrap();
        assert_eq!(matching, vec!["data__friends"]);

        let summary = store.schema_summary().await.unwrap();
        assert!(summary.contains("data__friends(name, age)"));
        assert!(summary.contains("inbox__threads(name, age)"));
    }

    #[tokio::test]
    async fn test_query_rows_rejects_writes() {
        let (_dir, store) = test_store().await;
        store.write_table(&sample_table("t")).await.unwrap();

        assert!(store.query_rows("DROP TABLE t").await.is_err());
        assert!(store.query_rows("DELETE FROM t").await.is_err());

        let data = store
            .query_rows("SELECT COUNT(*) AS n FROM t")
            .await
            .unwrap();
        assert_eq!(data.columns, vec!["n"]);
        assert_eq!(data.rows[0][0], Some("2".to_string()));
    }

    #[test]
    fn test_render_caps_rows() {
        let data = TableData {
            columns: vec!["a".to_string()],
            rows: (0..5).map(|i| vec![Some(i.to_string())]).collect(),
        };
        let rendered = data.render(2);
        assert!(rendered.contains("(3 more rows)"));
        assert!(rendered.starts_with("a\n0\n1"));
    }
}
