use thiserror::Error;

use crate::domain::{AccountId, Amount};
use crate::storage::{FailureClass, RetryReason, StorageError, classify};

/// Engine-level errors for event processing.
///
/// Every variant leaves the store exactly as it was before the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Insufficient funds on account {account_id} for {required}")]
    InsufficientFunds {
        account_id: AccountId,
        required: Amount,
    },

    #[error("Retry later: {0}")]
    RetryLater(RetryReason),

    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl EngineError {
    /// Whether resubmitting the same event may succeed without any state change
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RetryLater(_))
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match classify(&err) {
            FailureClass::Retryable(reason) => Self::RetryLater(reason),
            // Duplicates are reported as an insert outcome; reaching here means
            // a constraint fired somewhere it should not
            FailureClass::Conflict => Self::Fatal(format!("unexpected conflict: {err}")),
            FailureClass::Fatal => Self::Fatal(err.to_string()),
        }
    }
}
