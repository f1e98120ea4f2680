use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::errors::Result;
use crate::models::Record;

pub const SYNTHETIC_ID_PREFIX: &str = "ID";
pub const SYNTHETIC_ID_WIDTH: usize = 16;

/// Cache handle shared by the job and the file endpoint.
pub type SharedCsvCache = Arc<Mutex<CsvRecordCache>>;

/// Rows of one CSV file, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Record>,
}

impl CsvTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();

        let mut rows = Vec::new();
        for result in reader.records() {
            let row = result?;
            let record: Record = headers
                .iter()
                .cloned()
                .zip(row.iter().map(str::to_string))
                .collect();
            rows.push(record);
        }
        Ok(Self { headers, rows })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(
                self.headers
                    .iter()
                    .map(|header| row.get(header).map(String::as_str).unwrap_or("")),
            )?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|header| header == column)
    }

    /// Appends `column` to the headers. Returns `true` if it was missing.
    pub fn ensure_column(&mut self, column: &str) -> bool {
        if self.has_column(column) {
            return false;
        }
        self.headers.push(column.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Run-scoped cache of CSV files keyed by path.
///
/// Once a path is loaded the cached rows are authoritative; nothing re-reads
/// the file until the cache has been flushed.
#[derive(Debug)]
pub struct CsvRecordCache {
    tables: HashMap<PathBuf, CsvTable>,
    dirty: BTreeSet<PathBuf>,
    next_id: u64,
}

impl Default for CsvRecordCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvRecordCache {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
            dirty: BTreeSet::new(),
            next_id: 1,
        }
    }

    pub fn shared() -> SharedCsvCache {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Returns the cached table, reading it on first access. A missing file
    /// yields an empty table.
    pub fn load(&mut self, path: &Path) -> Result<&mut CsvTable> {
        if !self.tables.contains_key(path) {
            let table = if path.exists() {
                CsvTable::read(path)?
            } else {
                log::debug!("{} does not exist, caching an empty table", path.display());
                CsvTable::default()
            };
            self.tables.insert(path.to_path_buf(), table);
        }
        Ok(self
            .tables
            .entry(path.to_path_buf())
            .or_default())
    }

    pub fn get(&self, path: &Path) -> Option<&CsvTable> {
        self.tables.get(path)
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut CsvTable> {
        self.tables.get_mut(path)
    }

    pub fn mark_dirty(&mut self, path: &Path) {
        self.dirty.insert(path.to_path_buf());
    }

    pub fn is_dirty(&self, path: &Path) -> bool {
        self.dirty.contains(path)
    }

    /// Next run-unique placeholder id, e.g. `ID0000000000000001`.
    pub fn next_synthetic_id(&mut self) -> String {
        let id = format!(
            "{SYNTHETIC_ID_PREFIX}{:0width$}",
            self.next_id,
            width = SYNTHETIC_ID_WIDTH
        );
        self.next_id += 1;
        id
    }

    /// Writes every dirty table back to disk and clears the dirty set.
    /// Returns the written paths in path order.
    pub fn flush(&mut self) -> Result<Vec<PathBuf>> {
        let dirty = std::mem::take(&mut self.dirty);
        let mut written = Vec::with_capacity(dirty.len());
        for path in dirty {
            if let Some(table) = self.tables.get(&path) {
                table.write(&path)?;
                log::info!("Wrote {} rows to {}", table.len(), path.display());
                written.push(path);
            }
        }
        Ok(written)
    }

    /// Writes one table if it is dirty. Other dirty tables are left alone.
    pub fn flush_path(&mut self, path: &Path) -> Result<bool> {
        if !self.dirty.remove(path) {
            return Ok(false);
        }
        match self.tables.get(path) {
            Some(table) => {
                table.write(path)?;
                log::debug!("Wrote {} rows to {}", table.len(), path.display());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drops every cached table at the end of a run. The id counter keeps counting.
    pub fn clear(&mut self) {
        self.tables.clear();
        self.dirty.clear();
    }
}
