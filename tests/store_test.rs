mod common;

use censo::{AccessPolicy, Caller, HierarchyKey, QueryParams, Record, Role, TableBackend};
use common::{census_table, memory_store, xlsx_store};
use std::collections::{BTreeMap, HashMap};

#[test]
fn test_failed_save_leaves_backing_table_unchanged() {
    let (backend, store) = memory_store(Role::Admin);
    let caller = Caller::new("admin@example.org", Role::Admin);
    let before = backend.snapshot();

    backend.fail_saves(true);
    let err = store
        .upsert(
            &caller,
            &[
                Record::new().with_row(2).with_field("Edad", "99"),
                Record::new().with_field("Nombre completo", "Nuevo"),
            ],
        )
        .unwrap_err();
    assert_eq!(err.code(), "persist_failure");
    assert_eq!(backend.snapshot(), before);
    assert!(store.history().is_empty());

    backend.fail_saves(false);
    store
        .upsert(&caller, &[Record::new().with_row(2).with_field("Edad", "99")])
        .unwrap();
    assert_eq!(backend.snapshot().cell(2, 6), Some("99"));
}

#[test]
fn test_role_capabilities_through_store() {
    let (backend, store) = memory_store(Role::Viewer);
    let viewer = Caller::anonymous(Role::Viewer);
    let operator = Caller::new("op@example.org", Role::Operator);
    let admin = Caller::new("admin@example.org", Role::Admin);

    // Everyone reads
    assert_eq!(store.columns().unwrap().len(), 8);

    let batch = [Record::new().with_field("Nombre completo", "Eva")];
    assert_eq!(store.upsert(&viewer, &batch).unwrap_err().code(), "forbidden");
    assert_eq!(store.add_household(&viewer, &batch).unwrap_err().code(), "forbidden");
    assert_eq!(store.import(&viewer, &[BTreeMap::new()]).unwrap_err().code(), "forbidden");

    store.upsert(&operator, &batch).unwrap();
    assert_eq!(store.delete_row(&operator, 2).unwrap_err().code(), "forbidden");
    assert_eq!(backend.snapshot().len(), 6);

    store.delete_row(&admin, 6).unwrap();
    assert_eq!(backend.snapshot().len(), 5);
}

#[test]
fn test_history_records_successful_mutations() {
    let (_backend, store) = memory_store(Role::Operator);
    store.record_startup();
    let caller = Caller::new("op@example.org", Role::Operator);
    store
        .add_household(&caller, &[Record::new().with_field("Comunidad", "C")])
        .unwrap();

    let history = store.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].message, "Sistema iniciado");
    assert_eq!(history[1].actor, "op@example.org");
    assert!(history[1].message.contains("household"));
}

#[test]
fn test_lookups_through_store() {
    let (_backend, store) = memory_store(Role::Viewer);

    let existing = store
        .existing_keys(&["V-404".to_string(), "V-300".to_string(), "V-100".to_string()])
        .unwrap();
    assert_eq!(existing, vec!["V-300", "V-100"]);

    let person = store.find_by_key("V-200").unwrap().unwrap();
    assert_eq!(person.get("Nombre completo"), Some("Pedro Ruiz"));
    assert!(store.find_by_key("V-404").unwrap().is_none());

    let key = HierarchyKey::new("A", "1", "1");
    let household = store.household(&key).unwrap();
    assert_eq!(household.len(), 2);
    let people = store.occupants(&key).unwrap();
    assert_eq!(people[0].relationship, "Jefa");
    assert_eq!(people[1].document, "V-101");
}

#[test]
fn test_report_uses_matching_rows() {
    let (_backend, store) = memory_store(Role::Viewer);
    let params = QueryParams::default().with_filter("Comunidad", "a");
    let report = store.printable_report(&params).unwrap();
    assert_eq!(report.row_count(), 3);
    assert_eq!(
        report.columns,
        vec!["Nombre completo", "Cedula de identidad", "Edad", "Genero"]
    );
    let bytes = store.export_workbook(&params).unwrap();
    assert!(!bytes.is_empty());
}

#[test]
fn test_concurrent_appends_lose_nothing() {
    let (_dir, _path, store) = xlsx_store(&census_table(), AccessPolicy::open(Role::Operator));
    let writers = 4;
    let per_writer = 5;

    std::thread::scope(|scope| {
        for w in 0..writers {
            let store = &store;
            scope.spawn(move || {
                let caller = Caller::new(format!("writer{w}@example.org"), Role::Operator);
                for i in 0..per_writer {
                    let record = Record::new()
                        .with_field("Nombre completo", format!("w{w}-{i}"))
                        .with_field("Cedula de identidad", format!("X-{w}-{i}"));
                    store.upsert(&caller, &[record]).expect("append");
                }
            });
        }
    });

    let table = store.backend().load().unwrap();
    assert_eq!(table.data_row_count(), 4 + writers * per_writer);
    let mut seen: HashMap<String, usize> = HashMap::new();
    for (_, row) in table.data_rows() {
        *seen.entry(row[5].clone()).or_default() += 1;
    }
    for w in 0..writers {
        for i in 0..per_writer {
            assert_eq!(seen.get(&format!("X-{w}-{i}")), Some(&1));
        }
    }
    assert_eq!(store.history().len(), writers * per_writer);
}

#[test]
fn test_unavailable_workbook() {
    let (dir, path, store) = xlsx_store(&census_table(), AccessPolicy::open(Role::Admin));
    std::fs::remove_file(&path).unwrap();
    assert_eq!(store.columns().unwrap_err().code(), "backing_store_unavailable");
    drop(dir);
}

#[test]
fn test_update_outside_table_is_rejected() {
    let (backend, store) = memory_store(Role::Operator);
    let caller = Caller::new("op@example.org", Role::Operator);
    let before = backend.snapshot();

    for row in [6, 3_000_000, usize::MAX] {
        let err = store
            .upsert(&caller, &[Record::new().with_row(row).with_field("Edad", "1")])
            .unwrap_err();
        assert_eq!(err.code(), "invalid_request", "row {row}");
    }
    assert_eq!(backend.snapshot(), before);
    assert!(store.history().is_empty());
}
