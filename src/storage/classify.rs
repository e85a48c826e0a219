//! Mapping from storage failures to what the caller should do about them.
//!
//! This is the only place that knows which SQLSTATE codes are transient.

use std::fmt;

use serde::Serialize;

use super::error::StorageError;

/// PostgreSQL error codes the ledger cares about
///
/// See <https://www.postgresql.org/docs/current/errcodes-appendix.html>
pub mod sqlstate {
    pub const UNIQUE_VIOLATION: &str = "23505";
    pub const FOREIGN_KEY_VIOLATION: &str = "23503";
    pub const CHECK_VIOLATION: &str = "23514";
    pub const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";
    pub const DEADLOCK_DETECTED: &str = "40P01";
    /// Raised when `lock_timeout` expires
    pub const LOCK_NOT_AVAILABLE: &str = "55P03";
    /// Raised when `statement_timeout` expires
    pub const QUERY_CANCELED: &str = "57014";
}

/// Why a failure is safe to resubmit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryReason {
    Deadlock,
    LockTimeout,
    StatementTimeout,
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Deadlock => "deadlock detected",
            Self::LockTimeout => "lock timeout",
            Self::StatementTimeout => "statement timeout",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The idempotency key already exists
    Conflict,
    /// Transient; nothing was persisted and the caller may resubmit
    Retryable(RetryReason),
    /// Anything else
    Fatal,
}

pub fn classify(error: &StorageError) -> FailureClass {
    match error.sqlstate() {
        Some(sqlstate::UNIQUE_VIOLATION) => FailureClass::Conflict,
        Some(sqlstate::DEADLOCK_DETECTED) => FailureClass::Retryable(RetryReason::Deadlock),
        Some(sqlstate::LOCK_NOT_AVAILABLE) => FailureClass::Retryable(RetryReason::LockTimeout),
        Some(sqlstate::QUERY_CANCELED) => FailureClass::Retryable(RetryReason::StatementTimeout),
        _ => FailureClass::Fatal,
    }
}
