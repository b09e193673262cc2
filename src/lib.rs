use color_eyre::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

pub mod access;
pub mod backend;
pub mod config;
pub mod error;
pub mod export;
pub mod header;
pub mod hierarchy;
pub mod history;
pub mod lookup;
pub mod mutation;
pub mod query;
pub mod server;
pub mod store;
pub mod table;

pub use access::{AccessPolicy, Action, Caller, Role};
pub use backend::{MemoryBackend, TableBackend, XlsxBackend};
pub use censo_cli::{Args, LogFormat};
pub use config::{AppConfig, ConfigManager, ServeOptions};
pub use error::{StoreError, StoreResult};
pub use hierarchy::{HierarchyColumns, HierarchyKey, TreeNode};
pub use query::{ColumnMatchPolicy, QueryPage, QueryParams};
pub use server::{build_router, AppState};
pub use store::{CensusSchema, CensusStore};
pub use table::{Record, Table, ROW_KEY};

/// Application name used for the config directory and other app-specific paths
pub const APP_NAME: &str = "censo";

/// Install the global tracing subscriber. `RUST_LOG` wins over `filter`.
pub fn init_tracing(filter: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let builder = fmt::Subscriber::builder().with_env_filter(filter);
    let result = match format {
        LogFormat::Full => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
    // A subscriber installed earlier (tests, embedding) stays in place.
    let _ = result;
}

/// Build the xlsx-backed store described by `options` and `config`.
pub fn open_store(options: &ServeOptions, config: &AppConfig) -> Result<CensusStore> {
    if options.create_if_missing
        && backend::create_if_missing(&options.path, options.sheet.clone(), &config.columns.initial_header)?
    {
        info!(path = %options.path.display(), "created empty census workbook");
    }

    let mut backend = XlsxBackend::new(&options.path, options.sheet.clone());
    if let Some(lock_file) = &options.lock_file {
        backend = backend.with_lock_path(lock_file);
    }
    let store = CensusStore::new(Arc::new(backend), config.schema(), config.access_policy()?)
        .with_history_limit(config.history.limit);
    Ok(store)
}
