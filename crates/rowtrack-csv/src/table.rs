//! In-memory table model. Every cell is a string; nothing is coerced.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::Path;

use indexmap::IndexMap;
use rowtrack_core::RowContext;

use crate::error::CsvError;

/// One row keyed by column name, in column order.
pub type Record = IndexMap<String, String>;

/// A whole CSV file: header plus rows of equal width.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub const fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn with_columns(columns: &[&str]) -> Self {
        Self::new(columns.iter().map(|c| (*c).to_string()).collect())
    }

    /// Build a table from records. Columns come from `fieldnames` when given,
    /// otherwise from the records' keys in first-seen order.
    pub fn from_records(records: &[Record], fieldnames: Option<&[&str]>) -> Self {
        let mut table = fieldnames.map_or_else(Self::default, Self::with_columns);
        for record in records {
            table.push_record(record);
        }
        table
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Add a column filled with `default`. Returns false if it already exists.
    pub fn add_column(&mut self, name: &str, default: &str) -> bool {
        if self.has_column(name) {
            return false;
        }
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(default.to_string());
        }
        true
    }

    /// Append a record, adding any columns the table does not have yet.
    pub fn push_record(&mut self, record: &Record) {
        for key in record.keys() {
            self.add_column(key, "");
        }
        let row = self
            .headers
            .iter()
            .map(|h| record.get(h).cloned().unwrap_or_default())
            .collect();
        self.rows.push(row);
    }

    /// Append every row of `other`, aligning columns by name.
    pub fn append(&mut self, other: &Self) {
        for row in other.rows() {
            self.push_record(&row.to_record());
        }
    }

    pub fn row(&self, index: usize) -> Option<RowRef<'_>> {
        self.rows.get(index).map(|values| RowRef {
            headers: &self.headers,
            values,
            index,
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = RowRef<'_>> {
        self.rows.iter().enumerate().map(|(index, values)| RowRef {
            headers: &self.headers,
            values,
            index,
        })
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.column_index(column)?;
        self.rows.get(row).map(|r| r[col].as_str())
    }

    /// Set a cell. Returns false when the row or column does not exist.
    pub fn set(&mut self, row: usize, column: &str, value: impl Into<String>) -> bool {
        let Some(col) = self.column_index(column) else {
            return false;
        };
        match self.rows.get_mut(row) {
            Some(values) => {
                values[col] = value.into();
                true
            }
            None => false,
        }
    }

    /// Index of the first row whose `row_id` matches.
    pub fn find_by_id(&self, row_id: &str) -> Option<usize> {
        let col = self.column_index("row_id")?;
        let wanted = row_id.trim();
        self.rows.iter().position(|r| r[col].trim() == wanted)
    }

    /// Parse CSV text. `source` is only used in error messages.
    pub fn parse<R: Read>(reader: R, source: &Path) -> Result<Self, CsvError> {
        let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);

        let mut headers: Vec<String> = rdr
            .headers()
            .map_err(|e| CsvError::from_csv(source, &e))?
            .iter()
            .map(str::to_string)
            .collect();
        if let Some(first) = headers.first_mut() {
            if let Some(stripped) = first.strip_prefix('\u{feff}') {
                *first = stripped.to_string();
            }
        }

        let mut seen = HashSet::new();
        if let Some(dup) = headers.iter().find(|h| !seen.insert(h.as_str())) {
            return Err(CsvError::Malformed {
                path: source.to_path_buf(),
                message: format!("duplicate column '{dup}'"),
            });
        }

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record.map_err(|e| CsvError::from_csv(source, &e))?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(Self { headers, rows })
    }

    pub fn read_from(path: &Path) -> Result<Self, CsvError> {
        let file = std::fs::File::open(path).map_err(|e| CsvError::io(path, &e))?;
        Self::parse(std::io::BufReader::new(file), path)
    }

    /// Serialize header and rows.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Borrowed view of one row.
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    headers: &'a [String],
    values: &'a [String],
    index: usize,
}

impl<'a> RowRef<'a> {
    pub const fn index(&self) -> usize {
        self.index
    }

    pub fn get(&self, column: &str) -> Option<&'a str> {
        let col = self.headers.iter().position(|h| h == column)?;
        self.values.get(col).map(String::as_str)
    }

    /// Cell value, or empty when the column is absent.
    pub fn value(&self, column: &str) -> &'a str {
        self.get(column).unwrap_or("")
    }

    pub fn to_record(&self) -> Record {
        self.headers
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }

    /// Identity of this row for a download attempt.
    pub fn to_context(&self) -> RowContext {
        RowContext::new(
            self.value("row_id").trim(),
            self.index,
            self.value("type"),
            self.value("name"),
            self.value("email"),
        )
    }
}
