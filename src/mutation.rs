//! In-memory mutations of a loaded [`Table`].
//!
//! None of these functions persist anything; the store saves the whole table
//! once after a batch has been applied.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::header::{canonical_index, normalize, trimmed_index};
use crate::table::{Record, Table, FIRST_DATA_ROW};

/// Row indices touched by an upsert batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub updated: Vec<usize>,
    pub appended: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportOutcome {
    /// Row indices of the imported records, in input order.
    pub imported: Vec<usize>,
    /// Incoming field names that matched no column, sorted.
    pub unmatched: Vec<String>,
}

/// Write the fields of `record` that name a header column into `row_index`.
fn write_fields(table: &mut Table, columns: &BTreeMap<String, usize>, row_index: usize, record: &Record) {
    for (name, &col) in columns {
        if let Some(value) = record.fields.get(name) {
            table.set_cell(row_index, col, value.clone());
        }
    }
}

fn trimmed_columns(table: &Table) -> BTreeMap<String, usize> {
    trimmed_index(table.header()).into_iter().collect()
}

/// Update tagged records in place and append untagged ones.
///
/// Appends take consecutive indices starting at `table.next_row_index()`.
/// A tag must name an existing data row; any other tag rejects the whole
/// batch before anything is written.
pub fn apply_upsert(table: &mut Table, batch: &[Record]) -> StoreResult<UpsertOutcome> {
    let last_row = table.len();
    if let Some(row) = batch
        .iter()
        .filter_map(|r| r.row)
        .find(|row| !(FIRST_DATA_ROW..=last_row).contains(row))
    {
        return Err(StoreError::InvalidRequest(format!(
            "row {row} cannot be updated; data rows are {FIRST_DATA_ROW}..={last_row}"
        )));
    }

    let columns = trimmed_columns(table);
    let mut next_row = table.next_row_index();
    let mut outcome = UpsertOutcome::default();
    for record in batch {
        match record.row {
            Some(row) => {
                debug!(row, "updating record");
                write_fields(table, &columns, row, record);
                outcome.updated.push(row);
            }
            None => {
                debug!(row = next_row, "appending record");
                write_fields(table, &columns, next_row, record);
                outcome.appended.push(next_row);
                next_row += 1;
            }
        }
    }
    Ok(outcome)
}

/// Append every record, matching field names to columns by their canonical
/// key. Fields that match nothing are skipped and reported.
pub fn apply_import(table: &mut Table, batch: &[BTreeMap<String, String>]) -> ImportOutcome {
    let columns = canonical_index(table.header());
    let mut next_row = table.next_row_index();
    let mut unmatched = BTreeSet::new();
    let mut imported = Vec::with_capacity(batch.len());

    for fields in batch {
        for (name, value) in fields {
            let key = normalize(name);
            match columns.get(&key) {
                Some(&col) => table.set_cell(next_row, col, value.clone()),
                None => {
                    if unmatched.insert(name.clone()) {
                        warn!(field = %name, canonical = %key, "imported field matches no column; ignored");
                    }
                }
            }
        }
        imported.push(next_row);
        next_row += 1;
    }

    ImportOutcome {
        imported,
        unmatched: unmatched.into_iter().collect(),
    }
}

/// Append every record regardless of any row tag. Returns the new row indices.
pub fn apply_append(table: &mut Table, batch: &[Record]) -> Vec<usize> {
    let columns = trimmed_columns(table);
    let mut next_row = table.next_row_index();
    let mut appended = Vec::with_capacity(batch.len());
    for record in batch {
        write_fields(table, &columns, next_row, record);
        appended.push(next_row);
        next_row += 1;
    }
    appended
}

/// Remove one data row. Every row after it moves up by one, so row indices
/// held by clients are stale afterwards.
pub fn apply_delete(table: &mut Table, row_index: usize) -> StoreResult<Record> {
    let record = table
        .record_at(row_index)
        .ok_or_else(|| StoreError::InvalidRequest(format!("row {row_index} does not exist")))?;
    table.remove_row(row_index)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table::from_rows(vec![
            vec![" Nombre completo ".into(), "Edad".into(), "Torre".into()],
            vec!["Ana".into(), "30".into(), "1".into()],
            vec!["Luis".into(), "41".into()],
        ])
    }

    #[test]
    fn test_upsert_updates_only_present_columns() {
        let mut t = table();
        let batch = [Record::new().with_row(2).with_field("Edad", "31")];
        let outcome = apply_upsert(&mut t, &batch).unwrap();
        assert_eq!(outcome.updated, vec![2]);
        assert_eq!(t.row(2).unwrap(), &["Ana", "31", "1"]);
    }

    #[test]
    fn test_upsert_appends_with_running_counter() {
        let mut t = table();
        let batch = [
            Record::new().with_field("Nombre completo", "Eva"),
            Record::new().with_row(3).with_field("Torre", "2"),
            Record::new().with_field("Nombre completo", "Juan").with_field("Apodo", "J"),
        ];
        let outcome = apply_upsert(&mut t, &batch).unwrap();
        assert_eq!(outcome.appended, vec![4, 5]);
        assert_eq!(outcome.updated, vec![3]);
        assert_eq!(t.cell(4, 0), Some("Eva"));
        assert_eq!(t.cell(5, 0), Some("Juan"));
        assert_eq!(t.cell(3, 2), Some("2"));
        assert_eq!(t.header().len(), 3);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut once = table();
        let batch = [Record::new().with_row(3).with_field("Edad", "42")];
        apply_upsert(&mut once, &batch).unwrap();
        let mut twice = once.clone();
        apply_upsert(&mut twice, &batch).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_upsert_rejects_header_tag() {
        let mut t = table();
        let before = t.clone();
        let batch = [
            Record::new().with_field("Nombre completo", "Eva"),
            Record::new().with_row(1).with_field("Edad", "x"),
        ];
        let err = apply_upsert(&mut t, &batch).unwrap_err();
        assert_eq!(err.code(), "invalid_request");
        assert_eq!(t, before);
    }

    #[test]
    fn test_upsert_rejects_tag_past_last_row() {
        let mut t = table();
        let before = t.clone();
        for row in [4, 3_000_000, usize::MAX] {
            let batch = [
                Record::new().with_row(2).with_field("Edad", "99"),
                Record::new().with_row(row).with_field("Edad", "1"),
            ];
            let err = apply_upsert(&mut t, &batch).unwrap_err();
            assert_eq!(err.code(), "invalid_request", "row {row}");
            assert_eq!(t, before);
        }
    }

    #[test]
    fn test_import_maps_canonical_names() {
        let mut t = table();
        let mut person = BTreeMap::new();
        person.insert("NOMBRE_COMPLETO".to_string(), "Rosa".to_string());
        person.insert("edad ".to_string(), "22".to_string());
        person.insert("Telefono".to_string(), "555".to_string());
        let outcome = apply_import(&mut t, &[person.clone(), person]);
        assert_eq!(outcome.imported, vec![4, 5]);
        assert_eq!(outcome.unmatched, vec!["Telefono".to_string()]);
        assert_eq!(t.row(4).unwrap(), &["Rosa", "22"]);
        assert_eq!(t.row(5).unwrap(), &["Rosa", "22"]);
    }

    #[test]
    fn test_append_ignores_row_tag() {
        let mut t = table();
        let rows = apply_append(&mut t, &[Record::new().with_row(2).with_field("Torre", "9")]);
        assert_eq!(rows, vec![4]);
        assert_eq!(t.cell(2, 2), Some("1"));
        assert_eq!(t.cell(4, 2), Some("9"));
    }

    #[test]
    fn test_delete_shifts_rows() {
        let mut t = table();
        let removed = apply_delete(&mut t, 2).unwrap();
        assert_eq!(removed.get("Nombre completo"), Some("Ana"));
        assert_eq!(t.cell(2, 0), Some("Luis"));
        assert!(apply_delete(&mut t, 1).is_err());
        assert!(apply_delete(&mut t, 7).is_err());
    }
}
