//! Source adapters: layout-specific rows in, canonical records out.
//!
//! All knowledge of per-term column layouts lives in [`schedule`]; the other
//! source kinds (catalog pages, enrollment grids, rosters, advisor listings)
//! are parsed in [`rosters`]. HTML table extraction helpers sit here so every
//! parser receives plain positional cells.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod rosters;
pub mod schedule;

pub use rosters::{
    faculty_type, parse_advisor_info, parse_catalog_row, parse_enrollment_row,
    parse_professor_roster_row, parse_student_roster_row, program_abbreviation,
    standardize_course_name, ClassNameMap,
};
pub use schedule::{
    adapt_rows, parse_periods, parse_professor_name, parse_professor_names, ScheduleRecords,
    TermFormat,
};

pub const CRATE_NAME: &str = "coursedb-adapters";

/// One positional row as handed over by a table extractor.
pub type RawRow = Vec<String>;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("unsupported format tag: {0}")]
    UnsupportedFormat(String),
    #[error("invalid selector {selector}: {message}")]
    Selector { selector: String, message: String },
}

/// Tables extracted from one source document, page by page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedDocument {
    #[serde(default)]
    pub semester_id: Option<String>,
    /// Explicit term-format tag; the semester id doubles as the tag when absent.
    #[serde(default)]
    pub format: Option<String>,
    pub pages: Vec<Vec<Vec<Option<String>>>>,
}

impl ExtractedDocument {
    /// Pages with absent cells flattened to empty strings, positions preserved.
    pub fn raw_pages(&self) -> Vec<Vec<RawRow>> {
        self.pages
            .iter()
            .map(|page| {
                page.iter()
                    .map(|row| {
                        row.iter()
                            .map(|cell| cell.clone().unwrap_or_default())
                            .collect()
                    })
                    .collect()
            })
            .collect()
    }

    pub fn format_tag(&self) -> Option<&str> {
        self.format.as_deref().or(self.semester_id.as_deref())
    }
}

/// Load an extracted document; the semester id falls back to the file stem.
pub fn load_extracted_document(path: impl AsRef<Path>) -> Result<ExtractedDocument> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut document: ExtractedDocument =
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    if document.semester_id.is_none() {
        document.semester_id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string());
    }
    Ok(document)
}

fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Selector {
        selector: css.to_string(),
        message: e.to_string(),
    })
}

fn cell_texts(row: ElementRef<'_>, cell: &Selector) -> RawRow {
    row.select(cell)
        .map(|n| n.text().collect::<String>().trim().to_string())
        .collect()
}

/// Every row matched by `row_selector`, as trimmed `td` texts.
pub fn table_rows(html: &str, row_selector: &str) -> Result<Vec<RawRow>, AdapterError> {
    let document = Html::parse_document(html);
    let rows = selector(row_selector)?;
    let cell = selector("td")?;
    Ok(document.select(&rows).map(|row| cell_texts(row, &cell)).collect())
}

/// Catalog page rows: every table row after the header row.
pub fn catalog_table_rows(html: &str) -> Result<Vec<RawRow>, AdapterError> {
    Ok(table_rows(html, "table tr")?.into_iter().skip(1).collect())
}

/// Body rows of the first table on an enrollment grid page; empty when the page has no table.
pub fn enrollment_table_rows(html: &str) -> Result<Vec<RawRow>, AdapterError> {
    let document = Html::parse_document(html);
    let table = selector("table")?;
    let body_rows = selector("tbody tr")?;
    let cell = selector("td")?;
    Ok(document
        .select(&table)
        .next()
        .map(|t| t.select(&body_rows).map(|row| cell_texts(row, &cell)).collect())
        .unwrap_or_default())
}

/// Body rows of every staff table except the last one (adjunct staff).
pub fn staff_table_rows(html: &str) -> Result<Vec<RawRow>, AdapterError> {
    let document = Html::parse_document(html);
    let table = selector("table")?;
    let body_rows = selector("tbody tr")?;
    let cell = selector("td")?;
    let tables = document.select(&table).collect::<Vec<_>>();
    let keep = tables.len().saturating_sub(1);
    Ok(tables
        .into_iter()
        .take(keep)
        .flat_map(|t| {
            t.select(&body_rows)
                .map(|row| cell_texts(row, &cell))
                .collect::<Vec<_>>()
        })
        .collect())
}

/// Course headings of an advisor listing page.
pub fn advisor_headings(html: &str) -> Result<Vec<String>, AdapterError> {
    let document = Html::parse_document(html);
    let heading = selector("div.coursebox h3.coursename a")?;
    Ok(document
        .select(&heading)
        .map(|n| n.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_rows_skip_header_and_keep_empty_cells() {
        let html = r#"<table>
            <tr><th>STT</th><th>Mã</th></tr>
            <tr><td>1</td><td> INT1008 </td><td>Nhập môn lập trình</td><td>3</td><td></td><td>30</td><td>15</td><td></td></tr>
        </table>"#;
        let rows = catalog_table_rows(html).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), 8);
        assert_eq!(rows[0][1], "INT1008");
        assert_eq!(rows[0][4], "");
    }

    #[test]
    fn enrollment_rows_are_empty_without_a_table() {
        assert!(enrollment_table_rows("<html><body><p>none</p></body></html>")
            .unwrap()
            .is_empty());
        let html = "<table><thead><tr><td>h</td></tr></thead><tbody><tr><td>1</td><td>2</td></tr></tbody></table>";
        assert_eq!(enrollment_table_rows(html).unwrap(), vec![vec!["1".to_string(), "2".to_string()]]);
    }

    #[test]
    fn staff_rows_drop_the_last_table() {
        let html = "<table><tbody><tr><td>1</td><td>TS. A</td><td>Khoa CNTT</td></tr></tbody></table>\
                    <table><tbody><tr><td>1</td><td>TS. Adjunct</td><td>X</td></tr></tbody></table>";
        let rows = staff_table_rows(html).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][1], "TS. A");
    }

    #[test]
    fn advisor_headings_are_collected() {
        let html = r#"<div class="coursebox"><h3 class="coursename"><a>Cố vấn (Nguyễn Văn B_K64CA)</a></h3></div>"#;
        assert_eq!(advisor_headings(html).unwrap(), vec!["Cố vấn (Nguyễn Văn B_K64CA)".to_string()]);
    }

    #[test]
    fn document_semester_falls_back_to_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2024-2025-1.json");
        std::fs::write(&path, r#"{"pages": [[["a", null, "c"]]]}"#).unwrap();
        let document = load_extracted_document(&path).unwrap();
        assert_eq!(document.semester_id.as_deref(), Some("2024-2025-1"));
        assert_eq!(document.format_tag(), Some("2024-2025-1"));
        assert_eq!(document.raw_pages()[0][0], vec!["a".to_string(), String::new(), "c".to_string()]);
    }
}
