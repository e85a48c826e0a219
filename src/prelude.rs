//! Prelude module for convenient imports
//!
//! Import everything you need with: `use ledger::prelude::*;`

// Domain types
pub use crate::domain::{
    Account, AccountId, Amount, DomainError, EntryKind, IdempotencyKey, LedgerEntry,
    NewLedgerEntry, SignedDelta, TransactionId, WebhookEvent,
};

// Storage types
pub use crate::storage::{
    AccountStore, DeltaOutcome, FailureClass, FaultPoint, InMemoryLedger, InsertOutcome,
    LedgerBackend, LedgerStore, PgLedgerBackend, PoolConfig, RetryReason, StorageError,
    TimeoutConfig, UnitOfWork, classify,
};

// Engine types
pub use crate::engine::{ALREADY_PROCESSED_NOTE, EngineError, ProcessOutcome, TransactionCoordinator};

// IO types
pub use crate::io::{CsvEventStream, IoError, OutcomeRecord, OutcomeStatus, OutcomeWriter};

// Streaming types
pub use crate::streaming::{
    AbortOnError, ErrorPolicy, ReplayProcessor, ReplaySummary, SilentSkip, SkipErrors,
};

// App types
pub use crate::app::{AppError, Cli, CliApp, Command, init_tracing};
