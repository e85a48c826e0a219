use thiserror::Error;

/// Domain-level errors representing malformed input or business rule violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Invalid amount")]
    InvalidAmount,

    #[error("Amount cannot be negative")]
    NegativeAmount,

    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Amount has more than two fractional digits")]
    TooManyFractionDigits,

    #[error("Arithmetic overflow")]
    Overflow,

    #[error("Account id must be positive, got {0}")]
    InvalidAccountId(i64),

    #[error("Missing required field: {0}")]
    EmptyField(&'static str),

    #[error("Field {field} exceeds {max} characters")]
    FieldTooLong { field: &'static str, max: usize },

    #[error("Unknown entry kind: {0}")]
    UnknownEntryKind(String),
}
