use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::account::AccountId;
use super::amount::{Amount, SignedDelta};
use super::error::DomainError;

/// Direction of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Credit,
    Debit,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
        }
    }

    /// Signed balance change for an entry of this kind
    pub fn delta(&self, amount: Amount) -> SignedDelta {
        match self {
            Self::Credit => SignedDelta::credit(amount),
            Self::Debit => SignedDelta::debit(amount),
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "credit" => Ok(Self::Credit),
            "debit" => Ok(Self::Debit),
            _ => Err(DomainError::UnknownEntryKind(s.to_string())),
        }
    }
}

/// Server-generated identifier of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Provider-scoped idempotency key: (provider_id, external_id)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub provider_id: String,
    pub external_id: String,
}

impl IdempotencyKey {
    pub fn new(provider_id: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            external_id: external_id.into(),
        }
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider_id, self.external_id)
    }
}

/// Insert payload for a ledger entry (no server-generated fields yet)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    pub account_id: AccountId,
    pub key: IdempotencyKey,
    pub kind: EntryKind,
    pub amount: Amount,
}

/// Immutable record of one applied event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    transaction_id: TransactionId,
    account_id: AccountId,
    external_id: String,
    provider_id: String,
    kind: EntryKind,
    amount: Amount,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Materialize a committed row
    pub fn new(
        transaction_id: TransactionId,
        entry: NewLedgerEntry,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            transaction_id,
            account_id: entry.account_id,
            external_id: entry.key.external_id,
            provider_id: entry.key.provider_id,
            kind: entry.kind,
            amount: entry.amount,
            created_at,
            updated_at,
        }
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn key(&self) -> IdempotencyKey {
        IdempotencyKey::new(&self.provider_id, &self.external_id)
    }
}
