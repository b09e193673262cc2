#![allow(dead_code)]

use censo::{AccessPolicy, CensusSchema, CensusStore, MemoryBackend, Role, Table, TableBackend, XlsxBackend};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub const HEADER: [&str; 8] = [
    "Comunidad",
    "Torre",
    "Casa o Apto",
    "Parentesco",
    "Nombre completo",
    "Cedula de identidad",
    "Edad",
    "Genero",
];

pub fn table_from(rows: &[&[&str]]) -> Table {
    Table::from_rows(
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect(),
    )
}

/// Two communities; "A"/"1"/"1" holds two people.
pub fn census_table() -> Table {
    table_from(&[
        &HEADER,
        &["A", "1", "1", "Jefa", "Ana Pérez", "V-100", "34", "F"],
        &["A", "1", "1", "Hijo", "Luis Pérez", "V-101", "12", "M"],
        &["A", "2", "4", "Jefe", "Pedro Ruiz", "V-200", "51", "M"],
        &["B", "1", "7", "Jefa", "Rosa Díaz", "V-300", "45", "F"],
    ])
}

pub fn memory_store(role: Role) -> (Arc<MemoryBackend>, CensusStore) {
    let backend = Arc::new(MemoryBackend::new(census_table()));
    let store = CensusStore::new(backend.clone(), CensusSchema::default(), AccessPolicy::open(role));
    (backend, store)
}

/// Writes `table` to a fresh workbook and returns its location.
pub fn census_workbook(table: &Table) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("CENSO GENERAL NUEVO.xlsx");
    XlsxBackend::new(&path, Some("CENSO".to_string()))
        .save(table)
        .expect("Failed to write workbook");
    (dir, path)
}

pub fn xlsx_store(table: &Table, policy: AccessPolicy) -> (TempDir, PathBuf, CensusStore) {
    let (dir, path) = census_workbook(table);
    let backend = XlsxBackend::new(&path, Some("CENSO".to_string()));
    let store = CensusStore::new(Arc::new(backend), CensusSchema::default(), policy);
    (dir, path, store)
}
