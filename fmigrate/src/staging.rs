use crate::config::{JobConfig, PairedFiles};
use crate::csv_cache::CsvTable;
use crate::errors::Result;

/// Prepares the working copies of file-backed source data under the base path.
pub struct Staging {
    config: JobConfig,
}

impl Staging {
    pub async fn new(config: JobConfig) -> Result<Self> {
        // Ensure the working directories exist
        tokio::fs::create_dir_all(config.source_dir()).await?;
        tokio::fs::create_dir_all(config.target_dir()).await?;
        Ok(Self { config })
    }

    /// Writes the union of both files into the combined file when both exist.
    /// Headers keep first-seen order; the first file's rows come first.
    pub async fn merge_paired(&self, pair: &PairedFiles) -> Result<bool> {
        let first = self.config.entity_file(&pair.first);
        let second = self.config.entity_file(&pair.second);
        if !tokio::fs::try_exists(&first).await? || !tokio::fs::try_exists(&second).await? {
            return Ok(false);
        }

        let first = CsvTable::read(&first)?;
        let second = CsvTable::read(&second)?;
        let mut combined = CsvTable::new(first.headers.clone());
        for header in &second.headers {
            combined.ensure_column(header);
        }
        combined.rows.extend(first.rows);
        combined.rows.extend(second.rows);

        let path = self.config.entity_file(&pair.combined);
        combined.write(&path)?;
        log::info!(
            "Merged {} and {} into {} ({} rows)",
            pair.first,
            pair.second,
            path.display(),
            combined.len()
        );
        Ok(true)
    }

    /// Copies `<base>/<Entity>.csv` into the source directory. Returns `false`
    /// when the entity has no file.
    pub async fn snapshot(&self, entity: &str) -> Result<bool> {
        let original = self.config.entity_file(entity);
        if !tokio::fs::try_exists(&original).await? {
            log::debug!("No file for '{}' at {}", entity, original.display());
            return Ok(false);
        }
        tokio::fs::copy(&original, self.config.source_file(entity)).await?;
        Ok(true)
    }
}
