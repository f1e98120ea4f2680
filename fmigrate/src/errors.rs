use thiserror::Error;

use crate::prompt::PromptReason;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV read/write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport failed: {0}")]
    Transport(String),

    #[error("Job aborted by user: {0}")]
    Aborted(PromptReason),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MigrationError {
    pub fn is_abort(&self) -> bool {
        matches!(self, MigrationError::Aborted(_))
    }
}

pub type Result<T> = std::result::Result<T, MigrationError>;
