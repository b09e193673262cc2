//! Header canonicalization and column resolution.
//!
//! Real-world census sheets spell their headers loosely ("Cédula de
//! Identidad ", "CEDULA DE IDENTIDAD"), so columns are matched either by a
//! canonical key or by a small alias set instead of by position.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::{StoreError, StoreResult};

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^a-z0-9]+").expect("static pattern compiles"));

/// Canonical form of a header: lower-cased, everything outside `[a-z0-9]` removed.
pub fn normalize(header: &str) -> String {
    NON_ALNUM
        .replace_all(&header.to_lowercase(), "")
        .into_owned()
}

/// Canonical key → column index. The first header wins when two canonicalize
/// to the same key.
pub fn canonical_index<S: AsRef<str>>(header_row: &[S]) -> HashMap<String, usize> {
    let mut index = HashMap::with_capacity(header_row.len());
    for (i, header) in header_row.iter().enumerate() {
        index.entry(normalize(header.as_ref())).or_insert(i);
    }
    index
}

/// Trimmed display name → column index, first occurrence wins.
pub fn trimmed_index<S: AsRef<str>>(header_row: &[S]) -> HashMap<String, usize> {
    let mut index = HashMap::with_capacity(header_row.len());
    for (i, header) in header_row.iter().enumerate() {
        index.entry(header.as_ref().trim().to_string()).or_insert(i);
    }
    index
}

/// First column whose trimmed, case-folded name equals one of `aliases`.
pub fn find_column<S: AsRef<str>, A: AsRef<str>>(header_row: &[S], aliases: &[A]) -> Option<usize> {
    let aliases: Vec<String> = aliases
        .iter()
        .map(|a| a.as_ref().trim().to_lowercase())
        .collect();
    header_row.iter().position(|header| {
        let header = header.as_ref().trim().to_lowercase();
        aliases.iter().any(|alias| *alias == header)
    })
}

/// Like [`find_column`], but a missing column is a [`StoreError::SchemaMismatch`].
pub fn resolve_column<S: AsRef<str>, A: AsRef<str>>(header_row: &[S], aliases: &[A]) -> StoreResult<usize> {
    find_column(header_row, aliases).ok_or_else(|| {
        let names: Vec<&str> = aliases.iter().map(|a| a.as_ref()).collect();
        StoreError::SchemaMismatch(names.join(" | "))
    })
}

/// Resolve a column through its canonical key.
pub fn resolve_canonical<S: AsRef<str>>(header_row: &[S], name: &str) -> StoreResult<usize> {
    let wanted = normalize(name);
    header_row
        .iter()
        .position(|h| normalize(h.as_ref()) == wanted)
        .ok_or_else(|| StoreError::SchemaMismatch(name.to_string()))
}
