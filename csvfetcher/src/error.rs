use fmigrate::errors::MigrationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CsvFetcherError {
    #[error("the {0} side of a file endpoint is read-only")]
    ReadOnlySide(fmigrate::models::Side),

    #[error("row {row} of '{entity}' has no id")]
    MissingId { entity: String, row: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

pub type Result<T> = std::result::Result<T, CsvFetcherError>;

impl From<CsvFetcherError> for MigrationError {
    fn from(err: CsvFetcherError) -> Self {
        match err {
            CsvFetcherError::Migration(inner) => inner,
            CsvFetcherError::Io(inner) => MigrationError::Io(inner),
            CsvFetcherError::Csv(inner) => MigrationError::Csv(inner),
            other => MigrationError::Transport(other.to_string()),
        }
    }
}
