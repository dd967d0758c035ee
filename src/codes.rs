//! Reading the list of client codes to export from a workbook or CSV file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use calamine::{open_workbook_auto, Reader};
use regex::Regex;
use thiserror::Error;

use crate::types::AssessorCode;

static CODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z]?\d{3,})").expect("valid regex"));

const BLANK_VALUES: &[&str] = &["", "nan", "none", "null"];

const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "xlsb", "ods"];

#[derive(Debug, Error)]
pub enum CodesError {
    #[error("Failed to read code list {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed code list {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error("Failed to read workbook {path}: {source}")]
    Workbook {
        path: PathBuf,
        source: calamine::Error,
    },

    #[error("No code column in {path} (expected a 'Código XP' header); columns: {columns:?}")]
    MissingColumn { path: PathBuf, columns: Vec<String> },
}

/// One sheet (or the whole CSV file): lower-cased headers plus raw cells.
#[derive(Debug, Default)]
struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// How well a (lower-cased, trimmed) header names the code column.
/// Lower is better; `None` means it is not a candidate.
fn header_rank(header: &str) -> Option<u8> {
    if header.contains("xp") && (header.contains("cod") || header.contains("cód")) {
        Some(0)
    } else if header.contains("assessor") {
        Some(1)
    } else if header.contains("code") {
        Some(2)
    } else {
        None
    }
}

/// Best-ranked header; the first one wins among equals.
fn pick_code_header(headers: &[String]) -> Option<&str> {
    headers
        .iter()
        .enumerate()
        .filter_map(|(i, h)| header_rank(h).map(|rank| (rank, i, h.as_str())))
        .min_by_key(|&(rank, i, _)| (rank, i))
        .map(|(_, _, h)| h)
}

/// Extract the code from one cell, if it holds one.
pub fn parse_code(cell: &str) -> Option<AssessorCode> {
    let cell = cell.trim();
    if BLANK_VALUES.contains(&cell.to_lowercase().as_str()) {
        return None;
    }
    CODE_PATTERN
        .captures(cell)
        .and_then(|c| c.get(1))
        .map(|m| AssessorCode::new(m.as_str()))
}

/// Semicolon-separated exports are common from spreadsheet tools.
fn sniff_delimiter(first_line: &str) -> u8 {
    if first_line.contains(';') && !first_line.contains(',') {
        b';'
    } else {
        b','
    }
}

fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase()
}

fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| WORKBOOK_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn read_csv(path: &Path) -> Result<Vec<Table>, CodesError> {
    let text = std::fs::read_to_string(path).map_err(|source| CodesError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let text = text.trim_start_matches('\u{feff}');
    let delimiter = sniff_delimiter(text.lines().next().unwrap_or_default());

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(text.as_bytes());
    let csv_err = |source: csv::Error| CodesError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let headers = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(normalize_header)
        .collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(vec![Table { headers, rows }])
}

/// Every sheet in workbook order, the first row of each being its header.
fn read_workbook(path: &Path) -> Result<Vec<Table>, CodesError> {
    let wb_err = |source: calamine::Error| CodesError::Workbook {
        path: path.to_path_buf(),
        source,
    };
    let mut workbook = open_workbook_auto(path).map_err(wb_err)?;

    let mut tables = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook.worksheet_range(&name).map_err(wb_err)?;
        let mut rows = range
            .rows()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect::<Vec<_>>());
        let Some(header_row) = rows.next() else {
            tracing::debug!(sheet = %name, "Skipping empty sheet");
            continue;
        };
        tables.push(Table {
            headers: header_row.iter().map(|h| normalize_header(h)).collect(),
            rows: rows.collect(),
        });
    }
    Ok(tables)
}

/// Load the codes in file order with duplicates removed (first one wins).
///
/// Workbooks have all their sheets concatenated; the code column is chosen
/// once over the union of their headers and read from every sheet that has it.
pub fn load_codes(path: &Path) -> Result<Vec<AssessorCode>, CodesError> {
    let tables = if is_workbook(path) {
        read_workbook(path)?
    } else {
        read_csv(path)?
    };

    let mut columns: Vec<String> = Vec::new();
    for header in tables.iter().flat_map(|t| &t.headers) {
        if !columns.contains(header) {
            columns.push(header.clone());
        }
    }
    let Some(column) = pick_code_header(&columns).map(str::to_string) else {
        return Err(CodesError::MissingColumn {
            path: path.to_path_buf(),
            columns,
        });
    };

    let mut seen = HashSet::new();
    let mut codes = Vec::new();
    for table in &tables {
        let Some(index) = table.headers.iter().position(|h| *h == column) else {
            continue;
        };
        for row in &table.rows {
            let Some(code) = row.get(index).and_then(|cell| parse_code(cell)) else {
                continue;
            };
            if seen.insert(code.clone()) {
                codes.push(code);
            }
        }
    }
    tracing::debug!(count = codes.len(), column = %column, "Loaded codes");
    Ok(codes)
}
