//! Storage backends for the census table.
//!
//! A backend loads the whole sheet into a [`Table`] and writes it back as a
//! whole. The xlsx backend replaces the file atomically, so a reader never
//! observes a half-written workbook.

use calamine::{open_workbook_auto, Data, Reader};
use fs2::FileExt;
use rust_xlsxwriter::Workbook;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::table::Table;

/// Sheet name used when writing a workbook whose sheet was not configured.
pub const DEFAULT_SHEET: &str = "CENSO";

pub trait TableBackend: Send + Sync {
    /// Read the full table. Every call sees the last saved state.
    fn load(&self) -> StoreResult<Table>;

    /// Replace the stored table with `table`.
    fn save(&self, table: &Table) -> StoreResult<()>;

    /// Exclusive write lock shared with other processes. Released on drop.
    fn lock_exclusive(&self) -> StoreResult<BackendLock>;

    /// Human readable location, for logs.
    fn describe(&self) -> String;
}

/// Guard for a backend write lock.
#[derive(Debug)]
pub struct BackendLock {
    file: Option<File>,
}

impl BackendLock {
    pub fn none() -> Self {
        Self { file: None }
    }

    fn file(file: File) -> Self {
        Self { file: Some(file) }
    }
}

impl Drop for BackendLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
    }
}

/// Workbook on disk: xls/xlsx/xlsm/xlsb are readable, writes always produce xlsx.
#[derive(Debug, Clone)]
pub struct XlsxBackend {
    path: PathBuf,
    sheet: Option<String>,
    lock_path: PathBuf,
}

impl XlsxBackend {
    /// `sheet` selects the worksheet by name; `None` reads the first sheet.
    pub fn new(path: impl Into<PathBuf>, sheet: Option<String>) -> Self {
        let path = path.into();
        let lock_path = default_lock_path(&path);
        Self {
            path,
            sheet,
            lock_path,
        }
    }

    pub fn with_lock_path(mut self, lock_path: impl Into<PathBuf>) -> Self {
        self.lock_path = lock_path.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    fn sheet_name(&self) -> &str {
        self.sheet.as_deref().unwrap_or(DEFAULT_SHEET)
    }

    fn unavailable(&self, reason: impl ToString) -> StoreError {
        StoreError::unavailable(&self.path, reason)
    }
}

/// `<file>.lock` next to the workbook.
pub fn default_lock_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

/// Sheets other than the one being served. A save writes a fresh workbook
/// holding only the census sheet, so these are not carried over.
fn sheets_lost_on_save(names: &[String], sheet: Option<&str>) -> Vec<String> {
    let kept = sheet.or_else(|| names.first().map(String::as_str));
    names
        .iter()
        .filter(|name| Some(name.as_str()) != kept)
        .cloned()
        .collect()
}

fn cell_text(cell: &Data) -> String {
    calamine::DataType::as_string(cell).unwrap_or_else(|| cell.to_string())
}

impl TableBackend for XlsxBackend {
    fn load(&self) -> StoreResult<Table> {
        let mut workbook = open_workbook_auto(&self.path).map_err(|e| self.unavailable(e))?;
        let dropped = sheets_lost_on_save(&workbook.sheet_names(), self.sheet.as_deref());
        if !dropped.is_empty() {
            warn!(
                path = %self.path.display(),
                sheets = ?dropped,
                "workbook has other sheets; saving keeps only the census sheet"
            );
        }
        let range = match &self.sheet {
            Some(name) => workbook
                .worksheet_range(name)
                .map_err(|e| self.unavailable(format!("sheet {name}: {e}")))?,
            None => workbook
                .worksheet_range_at(0)
                .ok_or_else(|| self.unavailable("workbook has no worksheets"))?
                .map_err(|e| self.unavailable(e))?,
        };

        // calamine starts the range at the first used cell; pad back to A1 so
        // row indices match the sheet.
        let (row_offset, col_offset) = range
            .start()
            .map(|(r, c)| (r as usize, c as usize))
            .unwrap_or((0, 0));
        let mut rows: Vec<Vec<String>> = vec![Vec::new(); row_offset];
        for cells in range.rows() {
            let mut row = vec![String::new(); col_offset];
            row.extend(cells.iter().map(cell_text));
            rows.push(row);
        }
        let table = Table::from_rows(rows);
        debug!(path = %self.path.display(), rows = table.len(), "loaded workbook");
        Ok(table)
    }

    fn save(&self, table: &Table) -> StoreResult<()> {
        let persist = |e: &dyn std::fmt::Display| {
            StoreError::PersistFailure(format!("{}: {}", self.path.display(), e))
        };

        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(self.sheet_name()).map_err(|e| persist(&e))?;
        for (r, row) in table.rows().iter().enumerate() {
            let r = u32::try_from(r).map_err(|e| persist(&e))?;
            for (c, value) in row.iter().enumerate() {
                if value.is_empty() {
                    continue;
                }
                let c = u16::try_from(c).map_err(|e| persist(&e))?;
                worksheet
                    .write_string(r, c, value.as_str())
                    .map_err(|e| persist(&e))?;
            }
        }
        let bytes = workbook.save_to_buffer().map_err(|e| persist(&e))?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| persist(&e))?;
        tmp.write_all(&bytes).map_err(|e| persist(&e))?;
        tmp.as_file().sync_all().map_err(|e| persist(&e))?;
        tmp.persist(&self.path).map_err(|e| persist(&e.error))?;
        debug!(path = %self.path.display(), rows = table.len(), "saved workbook");
        Ok(())
    }

    fn lock_exclusive(&self) -> StoreResult<BackendLock> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| StoreError::unavailable(&self.lock_path, e))?;
        file.lock_exclusive()
            .map_err(|e| StoreError::unavailable(&self.lock_path, e))?;
        Ok(BackendLock::file(file))
    }

    fn describe(&self) -> String {
        format!("{} [{}]", self.path.display(), self.sheet_name())
    }
}

/// In-memory table, used by tests and for serving a fixed snapshot.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    table: Mutex<Table>,
    fail_saves: AtomicBool,
}

impl MemoryBackend {
    pub fn new(table: Table) -> Self {
        Self {
            table: Mutex::new(table),
            fail_saves: AtomicBool::new(false),
        }
    }

    /// Make every following `save` fail with a persist error.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> Table {
        match self.table.lock() {
            Ok(t) => t.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl TableBackend for MemoryBackend {
    fn load(&self) -> StoreResult<Table> {
        Ok(self.snapshot())
    }

    fn save(&self, table: &Table) -> StoreResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::PersistFailure("memory backend refused save".into()));
        }
        let mut guard = match self.table.lock() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = table.clone();
        Ok(())
    }

    fn lock_exclusive(&self) -> StoreResult<BackendLock> {
        Ok(BackendLock::none())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Create an empty workbook holding only `header`, unless `path` already exists.
pub fn create_if_missing<S: AsRef<str>>(
    path: &Path,
    sheet: Option<String>,
    header: &[S],
) -> StoreResult<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StoreError::PersistFailure(e.to_string()))?;
    }
    let table = Table::new(header.iter().map(|h| h.as_ref().to_string()));
    XlsxBackend::new(path, sheet).save(&table)?;
    Ok(true)
}
