use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

use crate::config::JobConfig;
use crate::errors::Result;

/// A structural or referential problem found in a source CSV file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CsvIssue {
    #[serde(rename = "Date")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "Child value")]
    pub child_value: String,
    #[serde(rename = "Child entity")]
    pub child_entity: String,
    #[serde(rename = "Child field")]
    pub child_field: String,
    #[serde(rename = "Parent value")]
    pub parent_value: String,
    #[serde(rename = "Parent entity")]
    pub parent_entity: String,
    #[serde(rename = "Parent field")]
    pub parent_field: String,
    #[serde(rename = "Error")]
    pub error: String,
}

impl CsvIssue {
    /// An issue about one entity file that involves no parent.
    pub fn structural(entity: &str, field: &str, value: &str, error: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            child_value: value.to_string(),
            child_entity: entity.to_string(),
            child_field: field.to_string(),
            parent_value: String::new(),
            parent_entity: String::new(),
            parent_field: String::new(),
            error: error.into(),
        }
    }
}

/// A lookup value that resolved to no known parent record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingLookup {
    #[serde(rename = "Date")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "Child entity")]
    pub child_entity: String,
    #[serde(rename = "Child field")]
    pub child_field: String,
    #[serde(rename = "Child external id field")]
    pub child_external_id_field: String,
    #[serde(rename = "Parent entity")]
    pub parent_entity: String,
    #[serde(rename = "Parent external id field")]
    pub parent_external_id_field: String,
    #[serde(rename = "Missing value")]
    pub missing_value: String,
}

/// Recoverable problems collected over one run, written once at its end.
#[derive(Debug, Default)]
pub struct JobReports {
    pub issues: Vec<CsvIssue>,
    pub missing_lookups: Vec<MissingLookup>,
}

impl JobReports {
    pub fn persist(&self, config: &JobConfig) -> Result<()> {
        write_report(&self.issues, &config.issues_report_file())?;
        write_report(&self.missing_lookups, &config.missing_lookups_report_file())?;
        Ok(())
    }
}

/// Saves rows in CSV format. Nothing is written for an empty report.
pub fn write_report<T: Serialize>(rows: &[T], path: &Path) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    log::info!("Wrote {} report rows to {}", rows.len(), path.display());
    Ok(())
}
