//! PostgreSQL-backed ledger store.
//!
//! Every write runs inside a read-committed transaction with per-transaction
//! ceilings applied via `set_config(..., is_local => true)`, the functional
//! form of `SET LOCAL`. Amounts cross the wire as whole cents and are scaled
//! to `NUMERIC(19,2)` inside SQL so no floating point is involved.
//!
//! ## Error mapping
//!
//! | SQLx error | StorageError |
//! |------------|--------------|
//! | `Database` | `Database { code: SQLSTATE, message }` |
//! | `PoolTimedOut`, `PoolClosed`, `Io`, `Tls` | `Connection` |
//! | `RowNotFound`, `ColumnNotFound`, decode failures | `Decode` |
//! | anything else | `Database { code: None, .. }` |

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::classify::sqlstate;
use super::error::StorageError;
use super::traits::{
    AccountStore, DeltaOutcome, InsertOutcome, LedgerBackend, LedgerStore, TimeoutConfig,
    UnitOfWork,
};
use crate::domain::{
    Account, AccountId, Amount, EntryKind, IdempotencyKey, LedgerEntry, NewLedgerEntry,
    SignedDelta, TransactionId,
};

const SCHEMA: &str = include_str!("../../migrations/0001_create_accounts_and_ledger_entries.sql");

/// Connection pool settings
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub database_url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl PoolConfig {
    pub const DEFAULT_MIN_CONNECTIONS: u32 = 2;
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 20;

    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            min_connections: Self::DEFAULT_MIN_CONNECTIONS,
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Ledger backend over a PostgreSQL connection pool.
///
/// `Clone` shares the underlying pool.
#[derive(Debug, Clone)]
pub struct PgLedgerBackend {
    pool: PgPool,
}

impl PgLedgerBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(
        skip(config),
        fields(
            min_connections = config.min_connections,
            max_connections = config.max_connections
        ),
        err
    )]
    pub async fn connect(config: &PoolConfig) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self::new(pool))
    }

    /// Create the enum, tables and indexes if they do not exist yet
    #[instrument(skip(self), err)]
    pub async fn install_schema(&self) -> Result<(), StorageError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("install_schema", e))?;

        debug!("schema installed");
        Ok(())
    }
}

/// Open transaction on one pooled connection.
///
/// Dropping it without [`UnitOfWork::commit`] rolls back.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl AccountStore for PgUnitOfWork {
    #[instrument(skip(self), fields(account_id = %account_id), err)]
    async fn lock_for_update(
        &mut self,
        account_id: AccountId,
    ) -> Result<Option<Account>, StorageError> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, name, (balance * 100)::BIGINT AS balance_cents, created_at, updated_at
            FROM accounts
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(account_id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_for_update", e))?;

        row.map(AccountRow::into_account).transpose()
    }

    #[instrument(skip(self), fields(account_id = %account_id, delta = %delta), err)]
    async fn apply_delta(
        &mut self,
        account_id: AccountId,
        delta: SignedDelta,
    ) -> Result<DeltaOutcome, StorageError> {
        // The predicate and the write are one statement; a row that would go
        // negative is simply not matched
        let row = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = balance + ($2::BIGINT::NUMERIC / 100),
                updated_at = NOW()
            WHERE id = $1
              AND balance + ($2::BIGINT::NUMERIC / 100) >= 0
            RETURNING (balance * 100)::BIGINT AS balance_cents
            "#,
        )
        .bind(account_id.get())
        .bind(delta.cents())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("apply_delta", e))?;

        match row {
            Some(row) => {
                let cents: i64 = row
                    .try_get("balance_cents")
                    .map_err(|e| map_sqlx_error("apply_delta", e))?;
                let new_balance = decode_amount(cents)?;
                Ok(DeltaOutcome::Applied { new_balance })
            }
            None => Ok(DeltaOutcome::Rejected),
        }
    }
}

#[async_trait]
impl LedgerStore for PgUnitOfWork {
    #[instrument(
        skip(self, entry),
        fields(
            account_id = %entry.account_id,
            key = %entry.key,
            kind = %entry.kind
        ),
        err
    )]
    async fn insert(&mut self, entry: &NewLedgerEntry) -> Result<InsertOutcome, StorageError> {
        let result = sqlx::query_as::<_, LedgerEntryRow>(
            r#"
            INSERT INTO ledger_entries (account_id, provider_id, external_id, kind, amount)
            VALUES ($1, $2, $3, $4::entry_kind, $5::BIGINT::NUMERIC / 100)
            ON CONFLICT (provider_id, external_id) DO NOTHING
            RETURNING
                transaction_id,
                account_id,
                provider_id,
                external_id,
                kind::TEXT AS kind,
                (amount * 100)::BIGINT AS amount_cents,
                created_at,
                updated_at
            "#,
        )
        .bind(entry.account_id.get())
        .bind(&entry.key.provider_id)
        .bind(&entry.key.external_id)
        .bind(entry.kind.as_str())
        .bind(entry.amount.cents())
        .fetch_optional(&mut *self.tx)
        .await;

        match result {
            Ok(Some(row)) => Ok(InsertOutcome::Inserted(row.into_entry()?)),
            Ok(None) => Ok(InsertOutcome::Conflict),
            Err(e) if is_unique_violation(&e) => Ok(InsertOutcome::Conflict),
            Err(e) => Err(map_sqlx_error("insert", e)),
        }
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(self) -> Result<(), StorageError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self) -> Result<(), StorageError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

#[async_trait]
impl LedgerBackend for PgLedgerBackend {
    type Tx = PgUnitOfWork;

    #[instrument(
        skip(self),
        fields(
            statement_timeout_ms = timeouts.statement_timeout.as_millis() as u64,
            lock_timeout_ms = timeouts.lock_timeout.as_millis() as u64
        ),
        err
    )]
    async fn begin(&self, timeouts: TimeoutConfig) -> Result<Self::Tx, StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        sqlx::query(
            "SELECT set_config('statement_timeout', $1, true), set_config('lock_timeout', $2, true)",
        )
        .bind(pg_duration(timeouts.statement_timeout))
        .bind(pg_duration(timeouts.lock_timeout))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("begin", e))?;

        Ok(PgUnitOfWork { tx })
    }

    #[instrument(skip(self), fields(account_id = %account_id), err)]
    async fn find_account(&self, account_id: AccountId) -> Result<Option<Account>, StorageError> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, name, (balance * 100)::BIGINT AS balance_cents, created_at, updated_at
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(account_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_account", e))?;

        row.map(AccountRow::into_account).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_entry(
        &self,
        provider_id: &str,
        external_id: &str,
    ) -> Result<Option<LedgerEntry>, StorageError> {
        let row = sqlx::query_as::<_, LedgerEntryRow>(
            r#"
            SELECT
                transaction_id,
                account_id,
                provider_id,
                external_id,
                kind::TEXT AS kind,
                (amount * 100)::BIGINT AS amount_cents,
                created_at,
                updated_at
            FROM ledger_entries
            WHERE provider_id = $1 AND external_id = $2
            "#,
        )
        .bind(provider_id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_entry", e))?;

        row.map(LedgerEntryRow::into_entry).transpose()
    }

    #[instrument(skip(self), fields(opening_balance = %opening_balance), err)]
    async fn create_account(
        &self,
        name: &str,
        opening_balance: Amount,
    ) -> Result<Account, StorageError> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            INSERT INTO accounts (name, balance)
            VALUES ($1, $2::BIGINT::NUMERIC / 100)
            RETURNING id, name, (balance * 100)::BIGINT AS balance_cents, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(opening_balance.cents())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_account", e))?;

        row.into_account()
    }
}

/// `SET LOCAL`-style duration literal; zero disables the ceiling
fn pg_duration(duration: Duration) -> String {
    format!("{}ms", duration.as_millis())
}

fn decode_amount(cents: i64) -> Result<Amount, StorageError> {
    Amount::try_from_cents(cents)
        .map_err(|e| StorageError::Decode(format!("stored amount {cents}: {e}")))
}

/// Map a sqlx error to a storage error, keeping the SQLSTATE intact
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::Database(db_err) => StorageError::Database {
            code: db_err.code().map(|c| c.into_owned()),
            message: format!("{operation}: {}", db_err.message()),
        },
        sqlx::Error::PoolTimedOut => {
            StorageError::Connection(format!("{operation}: timed out acquiring a connection"))
        }
        sqlx::Error::PoolClosed => {
            StorageError::Connection(format!("{operation}: connection pool closed"))
        }
        sqlx::Error::Io(e) => StorageError::Connection(format!("{operation}: {e}")),
        sqlx::Error::Tls(e) => StorageError::Connection(format!("{operation}: {e}")),
        sqlx::Error::RowNotFound => {
            StorageError::Decode(format!("{operation}: unexpected empty result"))
        }
        err @ (sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)) => StorageError::Decode(format!("{operation}: {err}")),
        other => StorageError::Database {
            code: None,
            message: format!("{operation}: {other}"),
        },
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some(sqlstate::UNIQUE_VIOLATION)
        }
        _ => false,
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        map_sqlx_error("query", err)
    }
}

struct AccountRow {
    id: i64,
    name: String,
    balance_cents: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for AccountRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AccountRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            balance_cents: row.try_get("balance_cents")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl AccountRow {
    fn into_account(self) -> Result<Account, StorageError> {
        Ok(Account::new(
            AccountId::from_row(self.id),
            self.name,
            decode_amount(self.balance_cents)?,
            self.created_at,
            self.updated_at,
        ))
    }
}

struct LedgerEntryRow {
    transaction_id: Uuid,
    account_id: i64,
    provider_id: String,
    external_id: String,
    kind: String,
    amount_cents: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for LedgerEntryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LedgerEntryRow {
            transaction_id: row.try_get("transaction_id")?,
            account_id: row.try_get("account_id")?,
            provider_id: row.try_get("provider_id")?,
            external_id: row.try_get("external_id")?,
            kind: row.try_get("kind")?,
            amount_cents: row.try_get("amount_cents")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl LedgerEntryRow {
    fn into_entry(self) -> Result<LedgerEntry, StorageError> {
        let kind: EntryKind = self
            .kind
            .parse()
            .map_err(|e| StorageError::Decode(format!("ledger entry kind: {e}")))?;

        let entry = NewLedgerEntry {
            account_id: AccountId::from_row(self.account_id),
            key: IdempotencyKey::new(self.provider_id, self.external_id),
            kind,
            amount: decode_amount(self.amount_cents)?,
        };

        Ok(LedgerEntry::new(
            TransactionId::from_uuid(self.transaction_id),
            entry,
            self.created_at,
            self.updated_at,
        ))
    }
}
