pub mod endpoint;
pub mod error;

pub use crate::endpoint::CsvEndpoint;
pub use crate::error::{CsvFetcherError, Result};
