// 📂 CSV Source - header-mapped rows from operator exports
//
// Every export has a header row, but header names drift between files
// ("Borrower ID" vs "BorrowerID" vs "borrower_id"), so lookups go through
// alias lists instead of fixed column positions.

use anyhow::{Context, Result};
use csv::{ReaderBuilder, Trim};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

// ============================================================================
// CORE TYPES
// ============================================================================

/// One data row: header name → trimmed value
#[derive(Debug, Clone, Serialize)]
pub struct CsvRow {
    /// Line in the original file (1-indexed, header is line 1)
    pub line_number: u64,
    pub fields: HashMap<String, String>,
}

impl CsvRow {
    pub fn new(line_number: u64, fields: HashMap<String, String>) -> Self {
        CsvRow {
            line_number,
            fields,
        }
    }

    /// Literal header lookup, falling back to a case-insensitive match
    pub fn get(&self, header: &str) -> Option<&str> {
        if let Some(value) = self.fields.get(header) {
            return Some(value.as_str());
        }

        self.fields
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(header))
            .map(|(_, value)| value.as_str())
    }

    /// First alias that is present AND non-empty
    pub fn get_any(&self, aliases: &[&str]) -> Option<&str> {
        aliases
            .iter()
            .filter_map(|alias| self.get(alias))
            .find(|value| !value.is_empty())
    }

    /// Same as `get_any`, owned
    pub fn text(&self, aliases: &[&str]) -> Option<String> {
        self.get_any(aliases).map(str::to_string)
    }

    pub fn is_blank(&self) -> bool {
        self.fields.values().all(|v| v.is_empty())
    }
}

/// A record the CSV reader could not decode
#[derive(Debug, Clone, Serialize)]
pub struct MalformedRow {
    pub line_number: u64,
    pub message: String,
}

/// A whole parsed file
#[derive(Debug, Clone, Serialize)]
pub struct CsvTable {
    pub source_file: String,
    pub headers: Vec<String>,
    pub rows: Vec<CsvRow>,
    pub malformed: Vec<MalformedRow>,
}

impl CsvTable {
    /// Open and parse a CSV file from disk
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open file: {}", path.display()))?;

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown.csv")
            .to_string();

        Self::from_reader(&name, file)
    }

    /// Parse CSV content from any reader (used by tests with in-memory data)
    pub fn from_reader<R: Read>(source_file: &str, reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = reader
            .headers()
            .with_context(|| format!("Failed to read CSV header in {}", source_file))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let mut rows = Vec::new();
        let mut malformed = Vec::new();

        for (index, result) in reader.records().enumerate() {
            // +2 because: 1-indexed + header row
            let fallback_line = index as u64 + 2;

            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    let line_number = e
                        .position()
                        .map(|p| p.line())
                        .unwrap_or(fallback_line);
                    malformed.push(MalformedRow {
                        line_number,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let line_number = record
                .position()
                .map(|p| p.line())
                .unwrap_or(fallback_line);

            // Ragged rows: missing trailing fields read as empty
            let fields: HashMap<String, String> = headers
                .iter()
                .enumerate()
                .filter(|(_, h)| !h.is_empty())
                .map(|(i, h)| (h.clone(), record.get(i).unwrap_or("").to_string()))
                .collect();

            let row = CsvRow::new(line_number, fields);
            if !row.is_blank() {
                rows.push(row);
            }
        }

        Ok(CsvTable {
            source_file: source_file.to_string(),
            headers,
            rows,
            malformed,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_header(&self, header: &str) -> bool {
        self.headers.iter().any(|h| h.eq_ignore_ascii_case(header))
    }

    /// True when any of the aliases is a header of this file
    pub fn has_any_header(&self, aliases: &[&str]) -> bool {
        aliases.iter().any(|alias| self.has_header(alias))
    }
}

// ============================================================================
// TESTS
// ============================================================================
