//! Passage construction for the similarity index
//!
//! Everything textual the ingestion run produces — rendered rows of
//! inferred tables, audio transcripts, image captions — is cut into
//! bounded passages before embedding.

use crate::config::PassageConfig;
use crate::media::{AnnotationPayload, MediaAnnotation};
use crate::tables::InferredTable;

/// A passage ready to be embedded and indexed
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    /// Text that gets embedded and later returned as context
    pub text: String,
    /// Where the text came from (table name or media path)
    pub source: String,
}

/// Split free text into passages bounded by `max_chars`
///
/// Splits on blank lines first, then on single newlines, then hard-wraps at
/// whitespace. Fragments shorter than `min_chars` are dropped.
pub fn split_passages(text: &str, config: &PassageConfig) -> Vec<String> {
    let mut passages = Vec::new();

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        if paragraph.len() <= config.max_chars {
            passages.push(paragraph.to_string());
            continue;
        }

        let mut current = String::new();
        for line in paragraph.split('\n') {
            for word in line.split_whitespace() {
                if !current.is_empty() && current.len() + word.len() + 1 > config.max_chars {
                    passages.push(std::mem::take(&mut current));
                }
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(word);
            }
        }
        if !current.is_empty() {
            passages.push(current);
        }
    }

    passages.retain(|p| p.len() >= config.min_chars);
    passages
}

/// Render an inferred table into passages, one batch of rows per passage
///
/// Each row becomes a `column: value` line so the embedded text reads like
/// prose-ish facts rather than a CSV dump.
pub fn passages_from_table(table: &InferredTable, config: &PassageConfig) -> Vec<Passage> {
    let mut lines = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        let cells: Vec<String> = table
            .columns
            .iter()
            .zip(row.iter())
            .filter_map(|(column, cell)| {
                cell.as_ref()
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| format!("{}: {}", column, v))
            })
            .collect();
        if !cells.is_empty() {
            lines.push(format!("[{}] {}", table.name, cells.join(", ")));
        }
    }

    split_passages(&lines.join("\n\n"), config)
        .into_iter()
        .map(|text| Passage {
            text,
            source: table.name.clone(),
        })
        .collect()
}

/// Render a media annotation into passages (transcript or caption)
pub fn passages_from_annotation(
    annotation: &MediaAnnotation,
    config: &PassageConfig,
) -> Vec<Passage> {
    let Some(text) = annotation.text_content() else {
        return Vec::new();
    };

    let source = annotation.path.to_string_lossy().into_owned();
    let prefix = match &annotation.payload {
        AnnotationPayload::Audio { .. } => "Audio transcript",
        AnnotationPayload::Image { .. } => "Image description",
    };

    split_passages(&format!("{}: {}", prefix, text), config)
        .into_iter()
        .map(|text| Passage {
            text,
            source: source.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_chars: usize, min_chars: usize) -> PassageConfig {
        PassageConfig { max_chars, min_chars }
    }

    #[test]
    fn test_short_text_is_one_passage() {
        let passages = split_passages("a short note", &config(100, 1));
        assert_eq!(passages, vec!["a short note"]);
    }

    #[test]
    fn test_long_paragraph_wraps_at_whitespace() {
        let text = "word ".repeat(100);
        let passages = split_passages(&text, &config(50, 1));
        assert!(passages.len() > 1);
        assert!(passages.iter().all(|p| p.len() <= 50));
    }

    #[test]
    fn test_tiny_fragments_are_dropped() {
        let passages = split_passages("ok\n\nthis one is long enough", &config(100, 10));
        assert_eq!(passages, vec!["this one is long enough"]);
    }

    #[test]
    fn test_table_rows_render_as_labeled_facts() {
        let table = InferredTable {
            name: "data__friends".to_string(),
            columns: vec!["name".to_string(), "age".to_string()],
            rows: vec![
                vec![Some("A".to_string()), Some("30".to_string())],
                vec![Some("B".to_string()), None],
            ],
        };

        let passages = passages_from_table(&table, &config(200, 1));
        assert_eq!(passages.len(), 1);
        assert!(passages[0].text.contains("[data__friends] name: A, age: 30"));
        assert!(passages[0].text.contains("[data__friends] name: B"));
        assert_eq!(passages[0].source, "data__friends");
    }

    #[test]
    fn test_annotation_without_text_yields_nothing() {
        use crate::archive::FileCategory;
        use std::path::PathBuf;

        let annotation = MediaAnnotation {
            category: FileCategory::Image,
            path: PathBuf::from("/x/img.png"),
            time_bucket: "202001".to_string(),
            semantic_bucket: "posts".to_string(),
            payload: AnnotationPayload::Image {
                caption: String::new(),
                width: 0,
                height: 0,
                format: String::new(),
                mode: String::new(),
            },
        };
        assert!(passages_from_annotation(&annotation, &config(100, 1)).is_empty());
    }
}
