use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::error::StorageError;
use crate::domain::{Account, AccountId, Amount, LedgerEntry, NewLedgerEntry, SignedDelta};

/// Per-transaction ceilings on lock waits and statement execution.
///
/// A zero duration disables the corresponding ceiling, matching PostgreSQL's
/// `lock_timeout = 0` / `statement_timeout = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    pub statement_timeout: Duration,
    pub lock_timeout: Duration,
}

impl TimeoutConfig {
    pub const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 200;
    pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 100;

    pub fn from_millis(statement_timeout_ms: u64, lock_timeout_ms: u64) -> Self {
        Self {
            statement_timeout: Duration::from_millis(statement_timeout_ms),
            lock_timeout: Duration::from_millis(lock_timeout_ms),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self::from_millis(
            Self::DEFAULT_STATEMENT_TIMEOUT_MS,
            Self::DEFAULT_LOCK_TIMEOUT_MS,
        )
    }
}

/// Result of inserting a ledger entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(LedgerEntry),
    /// The (provider_id, external_id) pair is already recorded
    Conflict,
}

/// Result of the predicate-guarded balance update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    Applied { new_balance: Amount },
    /// The update matched no row: the balance would have gone negative
    Rejected,
}

/// Account operations available inside an open transaction
#[async_trait]
pub trait AccountStore: Send {
    /// Exclusive row lock on the account, held until the transaction ends
    async fn lock_for_update(
        &mut self,
        account_id: AccountId,
    ) -> Result<Option<Account>, StorageError>;

    /// Add `delta` to the balance in one statement, only if the result stays >= 0
    async fn apply_delta(
        &mut self,
        account_id: AccountId,
        delta: SignedDelta,
    ) -> Result<DeltaOutcome, StorageError>;
}

/// Ledger operations available inside an open transaction
#[async_trait]
pub trait LedgerStore: Send {
    /// Insert an entry, reporting a taken idempotency key as [`InsertOutcome::Conflict`]
    async fn insert(&mut self, entry: &NewLedgerEntry) -> Result<InsertOutcome, StorageError>;
}

/// One storage transaction. Dropping it without commit discards its writes.
#[async_trait]
pub trait UnitOfWork: AccountStore + LedgerStore + Sized {
    async fn commit(self) -> Result<(), StorageError>;

    async fn rollback(self) -> Result<(), StorageError>;
}

/// Entry point to a ledger store: opens transactions and serves the
/// unlocked reads used outside of them.
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    type Tx: UnitOfWork + 'static;

    /// Open a read-committed transaction with the given ceilings
    async fn begin(&self, timeouts: TimeoutConfig) -> Result<Self::Tx, StorageError>;

    /// Unlocked read of the latest committed account state
    async fn find_account(&self, account_id: AccountId) -> Result<Option<Account>, StorageError>;

    /// Committed entry for an idempotency key
    async fn find_entry(
        &self,
        provider_id: &str,
        external_id: &str,
    ) -> Result<Option<LedgerEntry>, StorageError>;

    /// Provision an account with an opening balance
    async fn create_account(
        &self,
        name: &str,
        opening_balance: Amount,
    ) -> Result<Account, StorageError>;
}

// Allows a single backend to be shared between coordinators and tasks
#[async_trait]
impl<B: LedgerBackend> LedgerBackend for Arc<B> {
    type Tx = B::Tx;

    async fn begin(&self, timeouts: TimeoutConfig) -> Result<Self::Tx, StorageError> {
        (**self).begin(timeouts).await
    }

    async fn find_account(&self, account_id: AccountId) -> Result<Option<Account>, StorageError> {
        (**self).find_account(account_id).await
    }

    async fn find_entry(
        &self,
        provider_id: &str,
        external_id: &str,
    ) -> Result<Option<LedgerEntry>, StorageError> {
        (**self).find_entry(provider_id, external_id).await
    }

    async fn create_account(
        &self,
        name: &str,
        opening_balance: Amount,
    ) -> Result<Account, StorageError> {
        (**self).create_account(name, opening_balance).await
    }
}
