use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::errors::{MigrationError, Result};
use crate::models::{DescriptorSet, EntityDescriptor, Endpoint};
use crate::retrieval::RetrievalMode;

pub const JOB_FILE: &str = "migration.json";

pub const SOURCE_SUBDIR: &str = "source";
pub const TARGET_SUBDIR: &str = "target";
pub const VALUE_MAPPING_FILE: &str = "ValueMapping.csv";
pub const ISSUES_REPORT_FILE: &str = "CsvIssuesReport.csv";
pub const MISSING_LOOKUPS_REPORT_FILE: &str = "MissingParentRecordsReport.csv";

/// Two entity files that share identity and are migrated as one combined file.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PairedFiles {
    pub first: String,
    pub second: String,
    pub combined: String,
}

impl Default for PairedFiles {
    fn default() -> Self {
        Self {
            first: "User".to_string(),
            second: "Group".to_string(),
            combined: "UserAndGroup".to_string(),
        }
    }
}

fn default_paired_files() -> Vec<PairedFiles> {
    vec![PairedFiles::default()]
}

#[derive(Deserialize, Debug, Clone)]
pub struct JobConfig {
    /// Relative paths in a job file are resolved against the file's directory.
    #[serde(default)]
    pub base_path: PathBuf,
    #[serde(default)]
    pub source: Endpoint,
    #[serde(default)]
    pub target: Endpoint,
    #[serde(default)]
    pub validate_only: bool,
    #[serde(default)]
    pub skip_validation: bool,
    #[serde(default)]
    pub retrieval_mode: RetrievalMode,
    #[serde(default = "default_paired_files")]
    pub paired_files: Vec<PairedFiles>,
}

impl JobConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            source: Endpoint::File,
            target: Endpoint::File,
            validate_only: false,
            skip_validation: false,
            retrieval_mode: RetrievalMode::default(),
            paired_files: default_paired_files(),
        }
    }

    pub fn with_endpoints(mut self, source: Endpoint, target: Endpoint) -> Self {
        self.source = source;
        self.target = target;
        self
    }

    pub fn uses_files(&self) -> bool {
        self.source.is_file() || self.target.is_file()
    }

    pub fn source_dir(&self) -> PathBuf {
        self.base_path.join(SOURCE_SUBDIR)
    }

    pub fn target_dir(&self) -> PathBuf {
        self.base_path.join(TARGET_SUBDIR)
    }

    /// The user-supplied file for an entity, never modified by the job.
    pub fn entity_file(&self, entity: &str) -> PathBuf {
        csv_path(&self.base_path, entity)
    }

    /// The snapshot copy the CSV cache works on.
    pub fn source_file(&self, entity: &str) -> PathBuf {
        csv_path(&self.source_dir(), entity)
    }

    pub fn value_mapping_file(&self) -> PathBuf {
        self.base_path.join(VALUE_MAPPING_FILE)
    }

    pub fn issues_report_file(&self) -> PathBuf {
        self.base_path.join(ISSUES_REPORT_FILE)
    }

    pub fn missing_lookups_report_file(&self) -> PathBuf {
        self.base_path.join(MISSING_LOOKUPS_REPORT_FILE)
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self::new(PathBuf::new())
    }
}

pub fn csv_path(dir: &Path, entity: &str) -> PathBuf {
    dir.join(format!("{entity}.csv"))
}

/// Contents of `<base>/migration.json`.
#[derive(Deserialize, Debug, Clone)]
pub struct JobFile {
    #[serde(default)]
    pub config: JobConfig,
    pub entities: Vec<EntityDescriptor>,
}

impl JobFile {
    pub async fn load(base_path: &Path) -> Result<Self> {
        let path = base_path.join(JOB_FILE);
        let content = tokio::fs::read_to_string(&path).await.map_err(|err| {
            MigrationError::Config(format!("cannot read {}: {}", path.display(), err))
        })?;
        let mut file: JobFile = serde_json::from_str(&content)?;
        file.config.base_path = if file.config.base_path.as_os_str().is_empty() {
            base_path.to_path_buf()
        } else {
            base_path.join(&file.config.base_path)
        };
        Ok(file)
    }

    pub fn descriptors(&self) -> Result<DescriptorSet> {
        DescriptorSet::new(self.entities.clone())
    }
}
