//! Row-oriented table of optional string cells, plus CSV encoding.
//!
//! A cell of `None` is a missing value. Writing a missing cell to CSV yields an
//! empty field, and an empty field reads back as missing.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

pub type Row = Vec<Option<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    /// Create an empty table with the given header.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table from JSON objects.
    ///
    /// Columns are the union of keys in first-seen order. Absent keys, `null`
    /// and empty strings become missing cells, matching what a CSV round trip
    /// yields. Other strings are kept verbatim and every other value is stored
    /// as its compact JSON text.
    pub fn from_records(records: &[serde_json::Map<String, serde_json::Value>]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for record in records {
            for key in record.keys() {
                if seen.insert(key.as_str()) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|col| record.get(col).and_then(cell_from_json))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Append a row, padding with missing cells or truncating to the header width.
    pub fn push_row(&mut self, mut row: Row) {
        row.resize(self.columns.len(), None);
        self.rows.push(row);
    }

    /// First `n` rows as a new table.
    pub fn head(&self, n: usize) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// Remove every row holding at least one missing cell.
    pub fn drop_missing(&self) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| row.iter().all(Option::is_some))
                .cloned()
                .collect(),
        }
    }

    /// Remove rows that exactly repeat an earlier row, keeping the first.
    pub fn drop_duplicates(&self) -> Table {
        let mut seen: HashSet<&Row> = HashSet::new();
        Table {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| seen.insert(*row))
                .cloned()
                .collect(),
        }
    }

    /// Occurrences of each distinct value in `column`, most frequent first.
    ///
    /// Ties keep the order in which values were first seen. Missing cells are
    /// not counted. Returns `None` when the column does not exist.
    pub fn value_counts(&self, column: &str) -> Option<Vec<(String, usize)>> {
        let idx = self.column_index(column)?;
        let mut counts: Vec<(String, usize)> = Vec::new();
        let mut positions: HashMap<&str, usize> = HashMap::new();
        for value in self.rows.iter().filter_map(|row| row[idx].as_deref()) {
            match positions.get(value) {
                Some(&pos) => counts[pos].1 += 1,
                None => {
                    positions.insert(value, counts.len());
                    counts.push((value.to_string(), 1));
                }
            }
        }
        // Stable sort preserves first-seen order among equal counts.
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        Some(counts)
    }

    // -----------------------------------------------------------------------
    // CSV
    // -----------------------------------------------------------------------

    /// Parse CSV with a header row from any reader.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Table> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let columns: Vec<String> = reader.headers()?.iter().map(String::from).collect();
        let mut table = Table::new(columns);
        for record in reader.records() {
            let record = record?;
            table.push_row(
                record
                    .iter()
                    .map(|field| (!field.is_empty()).then(|| field.to_string()))
                    .collect(),
            );
        }
        Ok(table)
    }

    /// Read a CSV file with a header row.
    pub fn read_csv(path: &Path) -> Result<Table> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    /// Serialize as CSV with a header row into any writer.
    pub fn to_csv_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(writer);
        if !self.columns.is_empty() {
            writer.write_record(&self.columns)?;
            for row in &self.rows {
                writer.write_record(row.iter().map(|cell| cell.as_deref().unwrap_or("")))?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the table to `path` as CSV, replacing any existing file.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        self.to_csv_writer(file)?;
        tracing::debug!(path = %path.display(), rows = self.len(), "CSV written");
        Ok(())
    }
}

fn cell_from_json(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.is_empty() => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
