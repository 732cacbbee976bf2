//! Embedded-table extraction from HTML export payloads

use super::{sanitize_table_name, InferredTable};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

/// Extract every `<table>` embedded in an HTML document
///
/// Each table becomes `<base_name>__<index>`. Header cells come from `<th>`
/// elements when present; otherwise columns are named positionally.
pub fn tables_from_markup(content: &str, base_name: &str) -> Vec<InferredTable> {
    let document = Html::parse_document(content);

    let table_selector = match Selector::parse("table") {
        Ok(selector) => selector,
        Err(e) => {
            warn!("Invalid table selector: {}", e);
            return Vec::new();
        }
    };

    let mut tables = Vec::new();
    for (index, element) in document.select(&table_selector).enumerate() {
        let name = sanitize_table_name(&format!("{}__{}", base_name, index));
        if let Some(table) = parse_table(element, name) {
            tables.push(table);
        }
    }

    debug!("Extracted {} table(s) from markup {}", tables.len(), base_name);
    tables
}

fn parse_table(element: ElementRef<'_>, name: String) -> Option<InferredTable> {
    let row_selector = Selector::parse("tr").ok()?;
    let header_selector = Selector::parse("th").ok()?;
    let cell_selector = Selector::parse("td").ok()?;

    let mut columns: Vec<String> = element
        .select(&header_selector)
        .map(cell_text)
        .collect();

    let mut rows = Vec::new();
    for row in element.select(&row_selector) {
        let cells: Vec<String> = row.select(&cell_selector).map(cell_text).collect();
        if cells.is_empty() {
            // Header-only row
            continue;
        }

        if columns.is_empty() {
            columns = (0..cells.len()).map(|i| format!("col_{}", i)).collect();
        }

        let row_cells = columns
            .iter()
            .enumerate()
            .map(|(i, _)| cells.get(i).cloned())
            .collect();
        rows.push(row_cells);
    }

    let table = InferredTable { name, columns, rows };
    if table.is_empty() {
        warn!("Dropping empty markup table '{}'", table.name);
        None
    } else {
        Some(table)
    }
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}
