use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use fmigrate::csv_cache::{CsvTable, SharedCsvCache};
use fmigrate::errors::Result as MigrationResult;
use fmigrate::executor::{QueryContext, RecordExecutor};
use fmigrate::models::{EntityDescriptor, Operation, Record, Side, ID_FIELD};
use fmigrate::JobConfig;

use crate::error::{CsvFetcherError, Result};

/// Reads source rows from the job's snapshot files and writes target rows to
/// `<base>/target/<Entity>_<operation>.csv`, all through the shared cache.
pub struct CsvEndpoint {
    config: JobConfig,
    cache: SharedCsvCache,
    /// Output files already started by this endpoint; older content is dropped
    /// on first write.
    started: Mutex<HashSet<PathBuf>>,
}

impl CsvEndpoint {
    pub const NAME: &'static str = "csvfetcher";

    /// `cache` must be the instance the job was created with.
    pub fn new(config: JobConfig, cache: SharedCsvCache) -> Self {
        Self {
            config,
            cache,
            started: Mutex::new(HashSet::new()),
        }
    }

    pub fn output_file(&self, entity: &str, operation: Operation) -> PathBuf {
        self.config
            .target_dir()
            .join(format!("{entity}_{operation}.csv"))
    }

    async fn read_source(&self, context: &QueryContext) -> Result<Vec<Record>> {
        // Every row of a file is returned by the first query; later passes
        // cannot discover more.
        if !context.is_initial() {
            return Ok(Vec::new());
        }
        let path = self.config.source_file(&context.entity.name);
        let mut cache = self.cache.lock().await;
        let table = cache.load(&path)?;
        log::debug!("Read {} '{}' rows from {}", table.len(), context.entity.name, path.display());
        Ok(table.rows.clone())
    }

    async fn write_output(
        &self,
        operation: Operation,
        entity: &EntityDescriptor,
        records: Vec<Record>,
    ) -> Result<Vec<Record>> {
        let path = self.output_file(&entity.name, operation);
        let first_write = self
            .started
            .lock()
            .map(|mut started| started.insert(path.clone()))
            .unwrap_or(true);

        let mut cache = self.cache.lock().await;
        let mut written = Vec::with_capacity(records.len());
        for (row, mut record) in records.into_iter().enumerate() {
            let has_id = record.get(ID_FIELD).map_or(false, |id| !id.is_empty());
            match operation {
                Operation::Insert if !has_id => {
                    record.insert(ID_FIELD.to_string(), cache.next_synthetic_id());
                }
                Operation::Update if !has_id => {
                    return Err(CsvFetcherError::MissingId {
                        entity: entity.name.clone(),
                        row,
                    });
                }
                _ => {}
            }
            written.push(record);
        }

        let table = cache.load(&path)?;
        if first_write {
            *table = CsvTable::new(vec![ID_FIELD.to_string()]);
        }
        for record in &written {
            for field in record.keys() {
                table.ensure_column(field);
            }
        }
        table.rows.extend(written.iter().cloned());
        cache.mark_dirty(&path);
        cache.flush_path(&path)?;

        log::info!(
            "Wrote {} '{}' rows to {}",
            written.len(),
            entity.name,
            path.display()
        );
        Ok(written)
    }
}

#[async_trait]
impl RecordExecutor for CsvEndpoint {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn query(&self, side: Side, context: &QueryContext) -> MigrationResult<Vec<Record>> {
        match side {
            Side::Source => Ok(self.read_source(context).await?),
            // Output files are rewritten on every run, so nothing exists yet.
            Side::Target => Ok(Vec::new()),
        }
    }

    async fn write(
        &self,
        side: Side,
        operation: Operation,
        entity: &EntityDescriptor,
        records: Vec<Record>,
    ) -> MigrationResult<Vec<Record>> {
        if side == Side::Source {
            return Err(CsvFetcherError::ReadOnlySide(side).into());
        }
        Ok(self.write_output(operation, entity, records).await?)
    }
}
