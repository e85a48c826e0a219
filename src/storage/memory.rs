use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use super::classify::sqlstate;
use super::error::StorageError;
use super::traits::{
    AccountStore, DeltaOutcome, InsertOutcome, LedgerBackend, LedgerStore, TimeoutConfig,
    UnitOfWork,
};
use crate::domain::{
    Account, AccountId, Amount, DomainError, IdempotencyKey, LedgerEntry, NewLedgerEntry,
    SignedDelta, TransactionId,
};

/// Operation at which an injected failure fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Lock,
    Insert,
    ApplyDelta,
    Commit,
}

type RowLock = Arc<Mutex<()>>;

#[derive(Default)]
struct Inner {
    accounts: DashMap<AccountId, Account>,
    entries: DashMap<IdempotencyKey, LedgerEntry>,
    row_locks: DashMap<AccountId, RowLock>,
    key_locks: DashMap<IdempotencyKey, RowLock>,
    faults: DashMap<FaultPoint, String>,
    next_account_id: AtomicI64,
}

/// Concurrent in-memory ledger using DashMap.
///
/// Behaves like the PostgreSQL schema under read committed:
/// - every account row and every idempotency key has an exclusive lock that
///   a transaction holds until it commits or is dropped
/// - lock waits are bounded by the transaction's ceilings and fail with
///   `55P03` (lock timeout) or `57014` (statement timeout)
/// - writes are staged per transaction and published only on commit
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    inner: Arc<Inner>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next operation at `point` fail with the given SQLSTATE
    pub fn inject_fault(&self, point: FaultPoint, code: &str) {
        self.inner.faults.insert(point, code.to_string());
    }

    /// Number of committed ledger entries
    pub fn entry_count(&self) -> usize {
        self.inner.entries.len()
    }

    /// Committed entries for one account, oldest first
    pub fn entries_for(&self, account_id: AccountId) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self
            .inner
            .entries
            .iter()
            .filter(|e| e.value().account_id() == account_id)
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by_key(|e| e.created_at());
        entries
    }
}

/// Open transaction against an [`InMemoryLedger`]
pub struct InMemoryUnitOfWork {
    inner: Arc<Inner>,
    timeouts: TimeoutConfig,
    row_guards: HashMap<AccountId, OwnedMutexGuard<()>>,
    key_guards: HashMap<IdempotencyKey, OwnedMutexGuard<()>>,
    staged_balances: HashMap<AccountId, Amount>,
    staged_entries: Vec<LedgerEntry>,
}

impl InMemoryUnitOfWork {
    fn take_fault(&self, point: FaultPoint) -> Result<(), StorageError> {
        match self.inner.faults.remove(&point) {
            Some((_, code)) => Err(StorageError::database(
                &code,
                format!("injected failure at {point:?}"),
            )),
            None => Ok(()),
        }
    }

    async fn acquire(&self, lock: RowLock, what: &str) -> Result<OwnedMutexGuard<()>, StorageError> {
        match wait_ceiling(self.timeouts) {
            None => Ok(lock.lock_owned().await),
            Some((limit, code)) => tokio::time::timeout(limit, lock.lock_owned())
                .await
                .map_err(|_| {
                    StorageError::database(code, format!("canceled waiting for lock on {what}"))
                }),
        }
    }

    async fn lock_row(&mut self, account_id: AccountId) -> Result<(), StorageError> {
        if self.row_guards.contains_key(&account_id) {
            return Ok(());
        }

        let lock = self.inner.row_locks.entry(account_id).or_default().value().clone();
        let guard = self.acquire(lock, &format!("account {account_id}")).await?;
        self.row_guards.insert(account_id, guard);
        Ok(())
    }

    async fn lock_key(&mut self, key: &IdempotencyKey) -> Result<(), StorageError> {
        if self.key_guards.contains_key(key) {
            return Ok(());
        }

        let lock = self.inner.key_locks.entry(key.clone()).or_default().value().clone();
        let guard = self.acquire(lock, &format!("key {key}")).await?;
        self.key_guards.insert(key.clone(), guard);
        Ok(())
    }

    /// Committed row overlaid with this transaction's own staged balance
    fn visible_account(&self, account_id: AccountId) -> Option<Account> {
        let mut account = self
            .inner
            .accounts
            .get(&account_id)
            .map(|r| r.value().clone())?;
        if let Some(balance) = self.staged_balances.get(&account_id) {
            let updated_at = account.updated_at();
            account.set_balance(*balance, updated_at);
        }
        Some(account)
    }
}

/// Effective bound on a lock wait and the SQLSTATE reported when it expires.
/// Whichever ceiling is shorter fires first, as in PostgreSQL.
fn wait_ceiling(timeouts: TimeoutConfig) -> Option<(Duration, &'static str)> {
    let lock = Some(timeouts.lock_timeout).filter(|d| !d.is_zero());
    let statement = Some(timeouts.statement_timeout).filter(|d| !d.is_zero());

    match (lock, statement) {
        (None, None) => None,
        (Some(l), None) => Some((l, sqlstate::LOCK_NOT_AVAILABLE)),
        (None, Some(s)) => Some((s, sqlstate::QUERY_CANCELED)),
        (Some(l), Some(s)) if l <= s => Some((l, sqlstate::LOCK_NOT_AVAILABLE)),
        (Some(_), Some(s)) => Some((s, sqlstate::QUERY_CANCELED)),
    }
}

#[async_trait]
impl AccountStore for InMemoryUnitOfWork {
    async fn lock_for_update(
        &mut self,
        account_id: AccountId,
    ) -> Result<Option<Account>, StorageError> {
        self.take_fault(FaultPoint::Lock)?;

        if !self.inner.accounts.contains_key(&account_id) {
            return Ok(None);
        }

        self.lock_row(account_id).await?;
        Ok(self.visible_account(account_id))
    }

    async fn apply_delta(
        &mut self,
        account_id: AccountId,
        delta: SignedDelta,
    ) -> Result<DeltaOutcome, StorageError> {
        self.take_fault(FaultPoint::ApplyDelta)?;

        if !self.inner.accounts.contains_key(&account_id) {
            return Ok(DeltaOutcome::Rejected);
        }

        // An UPDATE takes the row lock itself if the caller did not
        self.lock_row(account_id).await?;

        let Some(account) = self.visible_account(account_id) else {
            return Ok(DeltaOutcome::Rejected);
        };

        match account.balance().checked_apply(delta) {
            Ok(new_balance) => {
                self.staged_balances.insert(account_id, new_balance);
                Ok(DeltaOutcome::Applied { new_balance })
            }
            Err(DomainError::InsufficientFunds) => Ok(DeltaOutcome::Rejected),
            Err(err) => Err(StorageError::database(
                sqlstate::NUMERIC_VALUE_OUT_OF_RANGE,
                err.to_string(),
            )),
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryUnitOfWork {
    async fn insert(&mut self, entry: &NewLedgerEntry) -> Result<InsertOutcome, StorageError> {
        self.take_fault(FaultPoint::Insert)?;

        if !self.inner.accounts.contains_key(&entry.account_id) {
            return Err(StorageError::database(
                sqlstate::FOREIGN_KEY_VIOLATION,
                format!("account {} does not exist", entry.account_id),
            ));
        }

        // Waits behind any open transaction that inserted the same key
        self.lock_key(&entry.key).await?;

        let staged = self.staged_entries.iter().any(|e| e.key() == entry.key);
        if staged || self.inner.entries.contains_key(&entry.key) {
            return Ok(InsertOutcome::Conflict);
        }

        let now = Utc::now();
        let row = LedgerEntry::new(TransactionId::new_v4(), entry.clone(), now, now);
        self.staged_entries.push(row.clone());
        Ok(InsertOutcome::Inserted(row))
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn commit(mut self) -> Result<(), StorageError> {
        self.take_fault(FaultPoint::Commit)?;

        let now = Utc::now();
        for entry in self.staged_entries.drain(..) {
            self.inner.entries.insert(entry.key(), entry);
        }
        for (account_id, balance) in self.staged_balances.drain() {
            if let Some(mut account) = self.inner.accounts.get_mut(&account_id) {
                account.set_balance(balance, now);
            }
        }

        trace!(
            rows_locked = self.row_guards.len(),
            "in-memory transaction committed"
        );
        Ok(())
    }

    async fn rollback(self) -> Result<(), StorageError> {
        trace!(
            staged_entries = self.staged_entries.len(),
            "in-memory transaction rolled back"
        );
        Ok(())
    }
}

#[async_trait]
impl LedgerBackend for InMemoryLedger {
    type Tx = InMemoryUnitOfWork;

    async fn begin(&self, timeouts: TimeoutConfig) -> Result<Self::Tx, StorageError> {
        Ok(InMemoryUnitOfWork {
            inner: Arc::clone(&self.inner),
            timeouts,
            row_guards: HashMap::new(),
            key_guards: HashMap::new(),
            staged_balances: HashMap::new(),
            staged_entries: Vec::new(),
        })
    }

    async fn find_account(&self, account_id: AccountId) -> Result<Option<Account>, StorageError> {
        Ok(self
            .inner
            .accounts
            .get(&account_id)
            .map(|r| r.value().clone()))
    }

    async fn find_entry(
        &self,
        provider_id: &str,
        external_id: &str,
    ) -> Result<Option<LedgerEntry>, StorageError> {
        let key = IdempotencyKey::new(provider_id, external_id);
        Ok(self.inner.entries.get(&key).map(|r| r.value().clone()))
    }

    async fn create_account(
        &self,
        name: &str,
        opening_balance: Amount,
    ) -> Result<Account, StorageError> {
        let id = self.inner.next_account_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let account = Account::new(AccountId::from_row(id), name, opening_balance, now, now);
        self.inner.accounts.insert(account.id(), account.clone());
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntryKind;

    fn generous() -> TimeoutConfig {
        TimeoutConfig::from_millis(5_000, 5_000)
    }

    fn new_entry(account_id: AccountId, external_id: &str, cents: i64) -> NewLedgerEntry {
        NewLedgerEntry {
            account_id,
            key: IdempotencyKey::new("provider", external_id),
            kind: EntryKind::Credit,
            amount: Amount::try_from_cents(cents).unwrap(),
        }
    }

    #[tokio::test]
    async fn create_account_assigns_sequential_ids() {
        let ledger = InMemoryLedger::new();
        let a = ledger.create_account("a", Amount::zero()).await.unwrap();
        let b = ledger.create_account("b", Amount::from_cents(100)).await.unwrap();

        assert_eq!(a.id().get(), 1);
        assert_eq!(b.id().get(), 2);
        assert_eq!(
            ledger.find_account(b.id()).await.unwrap().unwrap().balance(),
            Amount::from_cents(100)
        );
    }

    #[tokio::test]
    async fn lock_for_update_missing_account_is_none() {
        let ledger = InMemoryLedger::new();
        let mut tx = ledger.begin(generous()).await.unwrap();

        let missing = AccountId::new(99).unwrap();
        assert!(tx.lock_for_update(missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn staged_writes_are_invisible_until_commit() {
        let ledger = InMemoryLedger::new();
        let account = ledger.create_account("a", Amount::zero()).await.unwrap();

        let mut tx = ledger.begin(generous()).await.unwrap();
        tx.lock_for_update(account.id()).await.unwrap();
        tx.insert(&new_entry(account.id(), "e1", 5_000)).await.unwrap();
        let outcome = tx
            .apply_delta(account.id(), SignedDelta::credit(Amount::from_cents(5_000)))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DeltaOutcome::Applied {
                new_balance: Amount::from_cents(5_000)
            }
        );

        // Not yet visible outside the transaction
        assert_eq!(
            ledger.find_account(account.id()).await.unwrap().unwrap().balance(),
            Amount::zero()
        );
        assert!(ledger.find_entry("provider", "e1").await.unwrap().is_none());

        tx.commit().await.unwrap();

        assert_eq!(
            ledger.find_account(account.id()).await.unwrap().unwrap().balance(),
            Amount::from_cents(5_000)
        );
        assert!(ledger.find_entry("provider", "e1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rollback_and_drop_discard_writes() {
        let ledger = InMemoryLedger::new();
        let account = ledger.create_account("a", Amount::zero()).await.unwrap();

        let mut tx = ledger.begin(generous()).await.unwrap();
        tx.insert(&new_entry(account.id(), "e1", 100)).await.unwrap();
        tx.rollback().await.unwrap();

        {
            let mut tx = ledger.begin(generous()).await.unwrap();
            tx.insert(&new_entry(account.id(), "e2", 100)).await.unwrap();
        }

        assert_eq!(ledger.entry_count(), 0);

        // Keys are free again
        let mut tx = ledger.begin(generous()).await.unwrap();
        assert!(matches!(
            tx.insert(&new_entry(account.id(), "e1", 100)).await.unwrap(),
            InsertOutcome::Inserted(_)
        ));
    }

    #[tokio::test]
    async fn apply_delta_rejects_negative_balance() {
        let ledger = InMemoryLedger::new();
        let account = ledger
            .create_account("a", Amount::from_cents(2_000))
            .await
            .unwrap();

        let mut tx = ledger.begin(generous()).await.unwrap();
        let outcome = tx
            .apply_delta(account.id(), SignedDelta::debit(Amount::from_cents(3_000)))
            .await
            .unwrap();
        assert_eq!(outcome, DeltaOutcome::Rejected);
    }

    #[tokio::test]
    async fn apply_delta_overflow_is_a_database_error() {
        let ledger = InMemoryLedger::new();
        let account = ledger
            .create_account("a", Amount::try_from_cents(i64::MAX).unwrap())
            .await
            .unwrap();

        let mut tx = ledger.begin(generous()).await.unwrap();
        let err = tx
            .apply_delta(account.id(), SignedDelta::credit(Amount::from_cents(1)))
            .await
            .unwrap_err();
        assert_eq!(err.sqlstate(), Some(sqlstate::NUMERIC_VALUE_OUT_OF_RANGE));
    }

    #[tokio::test]
    async fn insert_reports_conflict_for_committed_and_staged_keys() {
        let ledger = InMemoryLedger::new();
        let account = ledger.create_account("a", Amount::zero()).await.unwrap();

        let mut tx = ledger.begin(generous()).await.unwrap();
        assert!(matches!(
            tx.insert(&new_entry(account.id(), "e1", 100)).await.unwrap(),
            InsertOutcome::Inserted(_)
        ));
        assert_eq!(
            tx.insert(&new_entry(account.id(), "e1", 100)).await.unwrap(),
            InsertOutcome::Conflict
        );
        tx.commit().await.unwrap();

        let mut tx = ledger.begin(generous()).await.unwrap();
        assert_eq!(
            tx.insert(&new_entry(account.id(), "e1", 999)).await.unwrap(),
            InsertOutcome::Conflict
        );
    }

    #[tokio::test]
    async fn insert_for_missing_account_violates_foreign_key() {
        let ledger = InMemoryLedger::new();
        let mut tx = ledger.begin(generous()).await.unwrap();

        let err = tx
            .insert(&new_entry(AccountId::new(5).unwrap(), "e1", 100))
            .await
            .unwrap_err();
        assert_eq!(err.sqlstate(), Some(sqlstate::FOREIGN_KEY_VIOLATION));
    }

    #[tokio::test]
    async fn lock_wait_times_out_with_lock_not_available() {
        let ledger = InMemoryLedger::new();
        let account = ledger.create_account("a", Amount::zero()).await.unwrap();

        let mut holder = ledger.begin(generous()).await.unwrap();
        holder.lock_for_update(account.id()).await.unwrap();

        let mut waiter = ledger
            .begin(TimeoutConfig::from_millis(1_000, 20))
            .await
            .unwrap();
        let err = waiter.lock_for_update(account.id()).await.unwrap_err();
        assert_eq!(err.sqlstate(), Some(sqlstate::LOCK_NOT_AVAILABLE));
    }

    #[tokio::test]
    async fn shorter_statement_timeout_cancels_the_wait() {
        let ledger = InMemoryLedger::new();
        let account = ledger.create_account("a", Amount::zero()).await.unwrap();

        let mut holder = ledger.begin(generous()).await.unwrap();
        holder.lock_for_update(account.id()).await.unwrap();

        let mut waiter = ledger
            .begin(TimeoutConfig::from_millis(20, 1_000))
            .await
            .unwrap();
        let err = waiter.lock_for_update(account.id()).await.unwrap_err();
        assert_eq!(err.sqlstate(), Some(sqlstate::QUERY_CANCELED));
    }

    #[tokio::test]
    async fn waiter_sees_committed_balance_after_lock_release() {
        let ledger = InMemoryLedger::new();
        let account = ledger
            .create_account("a", Amount::from_cents(10_000))
            .await
            .unwrap();
        let id = account.id();

        let mut holder = ledger.begin(generous()).await.unwrap();
        holder.lock_for_update(id).await.unwrap();
        holder
            .apply_delta(id, SignedDelta::debit(Amount::from_cents(6_000)))
            .await
            .unwrap();

        let waiter_ledger = ledger.clone();
        let waiter = tokio::spawn(async move {
            let mut tx = waiter_ledger.begin(generous()).await.unwrap();
            let locked = tx.lock_for_update(id).await.unwrap().unwrap();
            locked.balance()
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        holder.commit().await.unwrap();

        assert_eq!(waiter.await.unwrap(), Amount::from_cents(4_000));
    }

    #[tokio::test]
    async fn same_key_on_another_account_waits_for_first_inserter() {
        let ledger = InMemoryLedger::new();
        let a = ledger.create_account("a", Amount::zero()).await.unwrap();
        let b = ledger.create_account("b", Amount::zero()).await.unwrap();

        let mut first = ledger.begin(generous()).await.unwrap();
        first.insert(&new_entry(a.id(), "shared", 100)).await.unwrap();

        let second_ledger = ledger.clone();
        let second = tokio::spawn(async move {
            let mut tx = second_ledger.begin(generous()).await.unwrap();
            tx.insert(&new_entry(b.id(), "shared", 100)).await.unwrap()
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        first.commit().await.unwrap();

        assert_eq!(second.await.unwrap(), InsertOutcome::Conflict);
        assert_eq!(ledger.entry_count(), 1);
    }

    #[tokio::test]
    async fn injected_fault_fires_once() {
        let ledger = InMemoryLedger::new();
        let account = ledger.create_account("a", Amount::zero()).await.unwrap();
        ledger.inject_fault(FaultPoint::Commit, sqlstate::DEADLOCK_DETECTED);

        let mut tx = ledger.begin(generous()).await.unwrap();
        tx.insert(&new_entry(account.id(), "e1", 100)).await.unwrap();
        let err = tx.commit().await.unwrap_err();
        assert_eq!(err.sqlstate(), Some(sqlstate::DEADLOCK_DETECTED));
        assert_eq!(ledger.entry_count(), 0);

        let mut tx = ledger.begin(generous()).await.unwrap();
        tx.insert(&new_entry(account.id(), "e1", 100)).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(ledger.entry_count(), 1);
    }

    #[test]
    fn wait_ceiling_picks_the_shorter_bound() {
        assert_eq!(
            wait_ceiling(TimeoutConfig::from_millis(200, 100)),
            Some((Duration::from_millis(100), sqlstate::LOCK_NOT_AVAILABLE))
        );
        assert_eq!(
            wait_ceiling(TimeoutConfig::from_millis(50, 100)),
            Some((Duration::from_millis(50), sqlstate::QUERY_CANCELED))
        );
        assert_eq!(
            wait_ceiling(TimeoutConfig::from_millis(0, 100)),
            Some((Duration::from_millis(100), sqlstate::LOCK_NOT_AVAILABLE))
        );
        assert_eq!(wait_ceiling(TimeoutConfig::from_millis(0, 0)), None);
    }
}
