use std::path::PathBuf;
use thiserror::Error;

use crate::access::{Action, Role};

/// Failures surfaced by the record store.
///
/// Each variant maps to one response class at the HTTP edge; see
/// [`StoreError::code`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing file is missing, unreadable, or not a workbook.
    #[error("backing store unavailable at {}: {reason}", path.display())]
    BackingStoreUnavailable { path: PathBuf, reason: String },

    /// A column the operation needs is not in the header row.
    #[error("required column not found: {0}")]
    SchemaMismatch(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Mutations were applied in memory but the table could not be written back.
    #[error("failed to persist table: {0}")]
    PersistFailure(String),

    #[error("{role} may not {action}")]
    Forbidden { role: Role, action: Action },
}

impl StoreError {
    pub fn unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::BackingStoreUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Stable machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BackingStoreUnavailable { .. } => "backing_store_unavailable",
            Self::SchemaMismatch(_) => "schema_mismatch",
            Self::InvalidRequest(_) => "invalid_request",
            Self::PersistFailure(_) => "persist_failure",
            Self::Forbidden { .. } => "forbidden",
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
