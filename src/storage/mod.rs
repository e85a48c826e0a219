pub mod classify;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod traits;

// Re-export commonly used types
pub use classify::{FailureClass, RetryReason, classify, sqlstate};
pub use error::StorageError;
pub use memory::{FaultPoint, InMemoryLedger, InMemoryUnitOfWork};
pub use postgres::{PgLedgerBackend, PgUnitOfWork, PoolConfig};
pub use traits::{
    AccountStore, DeltaOutcome, InsertOutcome, LedgerBackend, LedgerStore, TimeoutConfig,
    UnitOfWork,
};
