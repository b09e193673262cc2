//! Natural-key and household lookups.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::StoreResult;
use crate::header::{resolve_canonical, resolve_column};
use crate::hierarchy::{HierarchyColumns, HierarchyKey, ResolvedColumns};
use crate::table::{Record, Table};

/// Columns projected for each occupant of a household.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupantColumns {
    pub relationship: Vec<String>,
    pub full_name: Vec<String>,
    pub document: Vec<String>,
}

impl Default for OccupantColumns {
    fn default() -> Self {
        Self {
            relationship: vec!["parentesco".to_string()],
            full_name: vec!["nombre completo".to_string()],
            document: vec!["cedula de identidad".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Occupant {
    #[serde(rename = "parentesco")]
    pub relationship: String,
    #[serde(rename = "nombres")]
    pub full_name: String,
    #[serde(rename = "documento")]
    pub document: String,
}

/// Candidates already present in the key column, in candidate order.
pub fn existing_values<S: AsRef<str>>(table: &Table, key_column: &str, candidates: &[S]) -> StoreResult<Vec<String>> {
    let col = resolve_canonical(table.header(), key_column)?;
    let present: HashSet<&str> = table
        .data_rows()
        .filter_map(|(_, row)| row.get(col).map(String::as_str))
        .collect();
    Ok(candidates
        .iter()
        .map(|c| c.as_ref())
        .filter(|c| present.contains(c))
        .map(str::to_string)
        .collect())
}

/// First record whose key column equals `value` exactly.
pub fn find_by_key(table: &Table, key_column: &str, value: &str) -> StoreResult<Option<Record>> {
    let col = resolve_canonical(table.header(), key_column)?;
    Ok(table
        .data_rows()
        .find(|(_, row)| row.get(col).is_some_and(|cell| cell == value))
        .and_then(|(idx, _)| table.record_at(idx)))
}

/// Whether a row's hierarchy cells equal `key` exactly, without trimming.
fn in_household(row: &[String], cols: &ResolvedColumns, key: &HierarchyKey) -> bool {
    let cell = |idx: usize| row.get(idx).map(String::as_str);
    cell(cols.community) == Some(key.community.as_str())
        && cell(cols.tower) == Some(key.tower.as_str())
        && cell(cols.unit) == Some(key.unit.as_str())
}

/// Every record of one household, tagged with its row index.
pub fn records_for_key(table: &Table, columns: &HierarchyColumns, key: &HierarchyKey) -> StoreResult<Vec<Record>> {
    let cols = columns.resolve(table.header())?;
    Ok(table
        .data_rows()
        .filter(|(_, row)| in_household(row, &cols, key))
        .filter_map(|(idx, _)| table.record_at(idx))
        .collect())
}

/// The people living in one household.
pub fn occupants(
    table: &Table,
    columns: &HierarchyColumns,
    occupant_columns: &OccupantColumns,
    key: &HierarchyKey,
) -> StoreResult<Vec<Occupant>> {
    let header = table.header();
    let cols = columns.resolve(header)?;
    let relationship = resolve_column(header, &occupant_columns.relationship)?;
    let full_name = resolve_column(header, &occupant_columns.full_name)?;
    let document = resolve_column(header, &occupant_columns.document)?;

    let cell = |row: &[String], idx: usize| row.get(idx).cloned().unwrap_or_default();
    Ok(table
        .data_rows()
        .filter(|(_, row)| in_household(row, &cols, key))
        .map(|(_, row)| Occupant {
            relationship: cell(row, relationship),
            full_name: cell(row, full_name),
            document: cell(row, document),
        })
        .collect())
}
