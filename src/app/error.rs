use std::io;
use thiserror::Error;

use crate::domain::DomainError;
use crate::engine::EngineError;
use crate::io::IoError;
use crate::storage::StorageError;

/// Top-level application errors unifying all layer errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV IO error: {0}")]
    CsvIo(#[from] IoError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid event: {0}")]
    Domain(#[from] DomainError),

    #[error("Replay aborted after {processed} events")]
    ReplayAborted { processed: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RetryReason;

    #[test]
    fn error_display_formats_correctly() {
        assert_eq!(
            AppError::ReplayAborted { processed: 3 }.to_string(),
            "Replay aborted after 3 events"
        );
        assert_eq!(
            AppError::from(DomainError::ZeroAmount).to_string(),
            "Invalid event: Amount must be greater than zero"
        );
    }

    #[test]
    fn io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let app_err = AppError::from(io_err);

        match app_err {
            AppError::Io(_) => {}
            _ => panic!("Expected Io error variant"),
        }
    }

    #[test]
    fn engine_error_conversion() {
        let app_err = AppError::from(EngineError::RetryLater(RetryReason::StatementTimeout));

        match app_err {
            AppError::Engine(EngineError::RetryLater(RetryReason::StatementTimeout)) => {}
            _ => panic!("Expected Engine error variant"),
        }
    }

    #[test]
    fn storage_error_conversion() {
        let app_err = AppError::from(StorageError::Connection("refused".to_string()));
        assert!(matches!(app_err, AppError::Storage(StorageError::Connection(_))));
    }
}
