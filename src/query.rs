//! Global search, single-column filter and pagination over the census table.
//!
//! The parameter names and the response shape follow the DataTables
//! server-side protocol, which is what the web client speaks.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::table::{Record, Table};

/// How the column filter compares a cell with the filter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Contains,
    Exact,
}

/// Columns whose filter uses substring matching; all others match exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMatchPolicy {
    contains: HashSet<String>,
}

impl ColumnMatchPolicy {
    pub fn new<S: AsRef<str>>(contains_columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            contains: contains_columns
                .into_iter()
                .map(|c| c.as_ref().trim().to_string())
                .collect(),
        }
    }

    pub fn mode_for(&self, column: &str) -> MatchMode {
        if self.contains.contains(column) {
            MatchMode::Contains
        } else {
            MatchMode::Exact
        }
    }
}

/// One query request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pub search: String,
    pub filter_column: String,
    pub filter_value: String,
    pub offset: i64,
    pub limit: i64,
    /// Opaque counter echoed back to the client.
    pub draw: i64,
}

fn lenient_int(value: Option<&String>) -> i64 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}

impl QueryParams {
    /// Read DataTables query parameters. Numbers that do not parse read as 0.
    pub fn from_wire(params: &HashMap<String, String>) -> Self {
        let search = params
            .get("search[value]")
            .or_else(|| params.get("search"))
            .cloned()
            .unwrap_or_default();
        Self {
            search,
            filter_column: params.get("filterColumn").cloned().unwrap_or_default(),
            filter_value: params.get("filterValue").cloned().unwrap_or_default(),
            offset: lenient_int(params.get("start")),
            limit: lenient_int(params.get("length")),
            draw: lenient_int(params.get("draw")),
        }
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self
    }

    pub fn with_filter(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter_column = column.into();
        self.filter_value = value.into();
        self
    }

    pub fn with_page(mut self, offset: i64, limit: i64) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }
}

/// Compiled predicate for one request against one header row.
#[derive(Debug, Clone)]
pub struct RowFilter {
    search: String,
    column: Option<(usize, String, MatchMode)>,
}

impl RowFilter {
    pub fn new(header: &[String], params: &QueryParams, policy: &ColumnMatchPolicy) -> Self {
        let value = params.filter_value.to_lowercase();
        let column = if value.is_empty() || params.filter_column.is_empty() {
            None
        } else {
            header
                .iter()
                .position(|h| h.trim() == params.filter_column)
                .map(|idx| (idx, value, policy.mode_for(&params.filter_column)))
        };
        Self {
            search: params.search.to_lowercase(),
            column,
        }
    }

    fn global_match(&self, row: &[String]) -> bool {
        self.search.is_empty()
            || row
                .iter()
                .any(|cell| cell.to_lowercase().contains(&self.search))
    }

    fn column_match(&self, row: &[String]) -> bool {
        let Some((idx, value, mode)) = &self.column else {
            return true;
        };
        let Some(cell) = row.get(*idx) else {
            return false;
        };
        let cell = cell.trim().to_lowercase();
        match mode {
            MatchMode::Contains => cell.contains(value.as_str()),
            MatchMode::Exact => cell == *value,
        }
    }

    pub fn matches(&self, row: &[String]) -> bool {
        self.global_match(row) && self.column_match(row)
    }
}

/// One page of matching records plus the counts the client paginates with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryPage {
    pub draw: i64,
    #[serde(rename = "recordsTotal")]
    pub total_rows: usize,
    #[serde(rename = "recordsFiltered")]
    pub filtered_rows: usize,
    #[serde(rename = "data")]
    pub records: Vec<Record>,
}

/// Row indices of every data row passing both filters, in table order.
pub fn matching_rows(table: &Table, params: &QueryParams, policy: &ColumnMatchPolicy) -> Vec<usize> {
    let filter = RowFilter::new(table.header(), params, policy);
    table
        .data_rows()
        .filter(|(_, row)| filter.matches(row))
        .map(|(idx, _)| idx)
        .collect()
}

pub fn query(table: &Table, params: &QueryParams, policy: &ColumnMatchPolicy) -> QueryPage {
    let included = matching_rows(table, params, policy);

    let records = if params.limit <= 0 {
        Vec::new()
    } else {
        let offset = usize::try_from(params.offset.max(0)).unwrap_or(usize::MAX);
        let limit = usize::try_from(params.limit).unwrap_or(usize::MAX);
        included
            .iter()
            .skip(offset)
            .take(limit)
            .filter_map(|&idx| table.record_at(idx))
            .collect()
    };

    QueryPage {
        draw: params.draw,
        total_rows: table.data_row_count(),
        filtered_rows: included.len(),
        records,
    }
}
