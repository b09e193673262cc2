use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{StoreError, StoreResult};

/// Reserved record key carrying the originating row index.
pub const ROW_KEY: &str = "__row";

/// Row index of the header row.
pub const HEADER_ROW: usize = 1;

/// Row index of the first data row.
pub const FIRST_DATA_ROW: usize = 2;

/// The census sheet as an ordered grid of string cells.
///
/// Rows are addressed by their 1-based physical position, the header being
/// row 1. Rows are ragged: trailing empty cells are not stored, so a short row
/// simply has no value for the columns past its end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    rows: Vec<Vec<String>>,
}

impl Table {
    /// A table holding only a header row.
    pub fn new<S: Into<String>>(header: impl IntoIterator<Item = S>) -> Self {
        Self {
            rows: vec![header.into_iter().map(Into::into).collect()],
        }
    }

    /// Build a table from physical rows, the first being the header.
    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        let rows = rows.into_iter().map(trim_trailing_empty).collect();
        Self { rows }
    }

    /// Header cells as stored (display form, may carry stray whitespace).
    pub fn header(&self) -> &[String] {
        self.rows.first().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Trimmed header names, in column order.
    pub fn columns(&self) -> Vec<String> {
        self.header().iter().map(|h| h.trim().to_string()).collect()
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Data rows paired with their row index.
    pub fn data_rows(&self) -> impl Iterator<Item = (usize, &[String])> + '_ {
        self.rows
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, row)| (i + 1, row.as_slice()))
    }

    /// Number of physical rows, header included.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn data_row_count(&self) -> usize {
        self.rows.len().saturating_sub(1)
    }

    /// Row index an append would land on.
    pub fn next_row_index(&self) -> usize {
        self.len() + 1
    }

    pub fn row(&self, row_index: usize) -> Option<&[String]> {
        row_index
            .checked_sub(1)
            .and_then(|i| self.rows.get(i))
            .map(Vec::as_slice)
    }

    /// Value at (row, column); empty when the cell is past the end of its row.
    pub fn cell(&self, row_index: usize, col: usize) -> Option<&str> {
        self.row(row_index)
            .map(|row| row.get(col).map(String::as_str).unwrap_or(""))
    }

    /// Write one cell, growing the table and the row as needed.
    pub fn set_cell(&mut self, row_index: usize, col: usize, value: impl Into<String>) {
        let Some(i) = row_index.checked_sub(1) else {
            return;
        };
        if self.rows.len() <= i {
            self.rows.resize_with(i + 1, Vec::new);
        }
        let row = &mut self.rows[i];
        if row.len() <= col {
            row.resize(col + 1, String::new());
        }
        row[col] = value.into();
        if row.last().is_some_and(String::is_empty) {
            let trimmed = trim_trailing_empty(std::mem::take(row));
            *row = trimmed;
        }
    }

    /// Remove a data row; every following row moves up by one index.
    pub fn remove_row(&mut self, row_index: usize) -> StoreResult<Vec<String>> {
        if row_index < FIRST_DATA_ROW || row_index > self.len() {
            return Err(StoreError::InvalidRequest(format!(
                "row {} is not a data row (table has rows {}..={})",
                row_index,
                FIRST_DATA_ROW,
                self.len()
            )));
        }
        Ok(self.rows.remove(row_index - 1))
    }

    /// The data row at `row_index` joined against the header.
    pub fn record_at(&self, row_index: usize) -> Option<Record> {
        if row_index < FIRST_DATA_ROW {
            return None;
        }
        self.row(row_index)
            .map(|cells| Record::from_row(self.header(), cells, Some(row_index)))
    }
}

fn trim_trailing_empty(mut row: Vec<String>) -> Vec<String> {
    while row.last().is_some_and(String::is_empty) {
        row.pop();
    }
    row
}

/// A flat, string-keyed view of one row.
///
/// On the wire the row index travels under [`ROW_KEY`] as a string. Incoming
/// tags that do not parse as an integer are dropped, which turns the record
/// into an append.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, Value>",
    into = "BTreeMap<String, String>"
)]
pub struct Record {
    pub row: Option<usize>,
    pub fields: BTreeMap<String, String>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_row(mut self, row: usize) -> Self {
        self.row = Some(row);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Join a row with the header: every trimmed header becomes a key, cells
    /// past the end of the row become empty strings.
    pub fn from_row<S: AsRef<str>>(header: &[S], cells: &[String], row: Option<usize>) -> Self {
        let fields = header
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let value = cells.get(i).cloned().unwrap_or_default();
                (h.as_ref().trim().to_string(), value)
            })
            .collect();
        Self { row, fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// Decimal integer, saturating when it has more digits than fit.
fn parse_int(text: &str) -> Option<i128> {
    let text = text.trim();
    if let Ok(n) = text.parse() {
        return Some(n);
    }
    let (negative, digits) = match text.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let is_number = !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit());
    is_number.then_some(if negative { i128::MIN } else { i128::MAX })
}

/// Integer tags are kept even when they name no data row: negatives read as 0
/// and oversized values as `usize::MAX`, so the upsert bounds check rejects
/// them instead of turning the record into an append.
fn parse_row_tag(value: &Value) -> Option<usize> {
    let tag: i128 = match value {
        Value::String(s) => parse_int(s)?,
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))?,
        _ => return None,
    };
    Some(usize::try_from(tag.max(0)).unwrap_or(usize::MAX))
}

fn value_to_cell(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl From<BTreeMap<String, Value>> for Record {
    fn from(mut map: BTreeMap<String, Value>) -> Self {
        let row = map.remove(ROW_KEY).as_ref().and_then(parse_row_tag);
        let fields = map
            .into_iter()
            .map(|(k, v)| (k, value_to_cell(v)))
            .collect();
        Self { row, fields }
    }
}

impl From<Record> for BTreeMap<String, String> {
    fn from(record: Record) -> Self {
        let mut map = record.fields;
        if let Some(row) = record.row {
            map.insert(ROW_KEY.to_string(), row.to_string());
        }
        map
    }
}
