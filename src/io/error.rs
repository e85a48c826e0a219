use std::io;
use thiserror::Error;

use crate::domain::DomainError;

/// IO-level errors for CSV parsing and outcome reporting
#[derive(Error, Debug)]
pub enum IoError {
    #[error("CSV parsing error: {0}")]
    CsvAsync(#[from] csv_async::Error),

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid entry kind: {0}")]
    InvalidEntryKind(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid amount format: {0}")]
    InvalidAmount(String),

    #[error("Invalid event: {0}")]
    Domain(#[from] DomainError),
}
