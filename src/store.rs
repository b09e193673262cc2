//! The census store: one backing table plus everything needed to serve it.
//!
//! Reads load the table fresh and never block on writers. Mutations are
//! serialized by an in-process gate and by the backend's exclusive lock, and
//! the table is saved exactly once per mutation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::access::{AccessPolicy, Action, Caller};
use crate::backend::TableBackend;
use crate::error::StoreResult;
use crate::export::{self, PrintableReport};
use crate::hierarchy::{self, HierarchyColumns, HierarchyKey, TreeNode};
use crate::history::{ActivityLog, HistoryEntry, DEFAULT_HISTORY_LIMIT};
use crate::lookup::{self, Occupant, OccupantColumns};
use crate::mutation::{self, ImportOutcome, UpsertOutcome};
use crate::query::{self, ColumnMatchPolicy, QueryPage, QueryParams};
use crate::table::{Record, Table};

pub const SYSTEM_ACTOR: &str = "system";

/// Which columns carry meaning for the census operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CensusSchema {
    pub match_policy: ColumnMatchPolicy,
    /// Natural key column, matched by canonical name.
    pub natural_key: String,
    pub hierarchy: HierarchyColumns,
    pub occupants: OccupantColumns,
    pub report_columns: Vec<String>,
    pub report_title: String,
}

impl Default for CensusSchema {
    fn default() -> Self {
        Self {
            match_policy: ColumnMatchPolicy::new(["Nombre completo", "Cedula de identidad"]),
            natural_key: "Cedula de identidad".to_string(),
            hierarchy: HierarchyColumns::default(),
            occupants: OccupantColumns::default(),
            report_columns: ["Nombre completo", "Cedula de identidad", "Edad", "Genero"]
                .into_iter()
                .map(String::from)
                .collect(),
            report_title: "Reporte de Habitantes".to_string(),
        }
    }
}

pub struct CensusStore {
    backend: Arc<dyn TableBackend>,
    schema: CensusSchema,
    access: AccessPolicy,
    writer: Mutex<()>,
    history: ActivityLog,
}

impl std::fmt::Debug for CensusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CensusStore")
            .field("backend", &self.backend.describe())
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl CensusStore {
    pub fn new(backend: Arc<dyn TableBackend>, schema: CensusSchema, access: AccessPolicy) -> Self {
        Self {
            backend,
            schema,
            access,
            writer: Mutex::new(()),
            history: ActivityLog::new(DEFAULT_HISTORY_LIMIT),
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history = ActivityLog::new(limit);
        self
    }

    pub fn schema(&self) -> &CensusSchema {
        &self.schema
    }

    pub fn access(&self) -> &AccessPolicy {
        &self.access
    }

    pub fn backend(&self) -> &dyn TableBackend {
        self.backend.as_ref()
    }

    fn load(&self) -> StoreResult<Table> {
        self.backend.load()
    }

    /// Run one mutation under the writer gate and save the result.
    ///
    /// Nothing is saved when `apply` fails, and the history entry is only
    /// recorded after a successful save.
    fn mutate<T>(
        &self,
        caller: &Caller,
        action: Action,
        apply: impl FnOnce(&mut Table) -> StoreResult<T>,
        describe: impl FnOnce(&T) -> String,
    ) -> StoreResult<T> {
        if let Err(e) = caller.authorize(action) {
            warn!(caller = caller.display_name(), role = %caller.role, %action, "denied");
            return Err(e);
        }

        let _gate = match self.writer.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _lock = self.backend.lock_exclusive()?;

        let mut table = self.load()?;
        let outcome = apply(&mut table)?;
        self.backend.save(&table)?;

        let message = describe(&outcome);
        info!(caller = caller.display_name(), "{}", message);
        self.history.record(caller.display_name(), message);
        Ok(outcome)
    }

    /// Record the startup entry in the activity history.
    pub fn record_startup(&self) {
        self.history.record(SYSTEM_ACTOR, "Sistema iniciado");
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.entries()
    }

    /// Trimmed header names.
    pub fn columns(&self) -> StoreResult<Vec<String>> {
        Ok(self.load()?.columns())
    }

    pub fn query(&self, params: &QueryParams) -> StoreResult<QueryPage> {
        let table = self.load()?;
        Ok(query::query(&table, params, &self.schema.match_policy))
    }

    pub fn upsert(&self, caller: &Caller, batch: &[Record]) -> StoreResult<UpsertOutcome> {
        self.mutate(
            caller,
            Action::Write,
            |table| mutation::apply_upsert(table, batch),
            |o| {
                format!(
                    "updated {} and added {} census records",
                    o.updated.len(),
                    o.appended.len()
                )
            },
        )
    }

    pub fn import(&self, caller: &Caller, batch: &[BTreeMap<String, String>]) -> StoreResult<ImportOutcome> {
        self.mutate(
            caller,
            Action::Write,
            |table| Ok(mutation::apply_import(table, batch)),
            |o| format!("imported {} census records", o.imported.len()),
        )
    }

    pub fn add_household(&self, caller: &Caller, batch: &[Record]) -> StoreResult<Vec<usize>> {
        self.mutate(
            caller,
            Action::Write,
            |table| Ok(mutation::apply_append(table, batch)),
            |rows| format!("added a household of {} people", rows.len()),
        )
    }

    pub fn delete_row(&self, caller: &Caller, row_index: usize) -> StoreResult<Record> {
        self.mutate(
            caller,
            Action::Delete,
            |table| mutation::apply_delete(table, row_index),
            |_| format!("deleted row {row_index}"),
        )
    }

    /// Candidates already present under the natural key.
    pub fn existing_keys(&self, candidates: &[String]) -> StoreResult<Vec<String>> {
        let table = self.load()?;
        lookup::existing_values(&table, &self.schema.natural_key, candidates)
    }

    pub fn find_by_key(&self, value: &str) -> StoreResult<Option<Record>> {
        let table = self.load()?;
        lookup::find_by_key(&table, &self.schema.natural_key, value)
    }

    pub fn tree(&self) -> StoreResult<Vec<TreeNode>> {
        let table = self.load()?;
        hierarchy::build_tree(&table, &self.schema.hierarchy)
    }

    pub fn household(&self, key: &HierarchyKey) -> StoreResult<Vec<Record>> {
        let table = self.load()?;
        lookup::records_for_key(&table, &self.schema.hierarchy, key)
    }

    pub fn occupants(&self, key: &HierarchyKey) -> StoreResult<Vec<Occupant>> {
        let table = self.load()?;
        lookup::occupants(&table, &self.schema.hierarchy, &self.schema.occupants, key)
    }

    /// xlsx workbook of every record matching `params`, pagination ignored.
    pub fn export_workbook(&self, params: &QueryParams) -> StoreResult<Vec<u8>> {
        let table = self.load()?;
        let rows = query::matching_rows(&table, params, &self.schema.match_policy);
        export::export_rows(&table, &rows)
    }

    pub fn printable_report(&self, params: &QueryParams) -> StoreResult<PrintableReport> {
        let table = self.load()?;
        let rows = query::matching_rows(&table, params, &self.schema.match_policy);
        Ok(PrintableReport::build(
            &table,
            &rows,
            &self.schema.report_columns,
            &self.schema.report_title,
            params,
        ))
    }
}
