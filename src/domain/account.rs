use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::amount::Amount;
use super::error::DomainError;

/// Identifier of an account row
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct AccountId(i64);

impl AccountId {
    /// Create a validated account id (must be positive)
    pub fn new(id: i64) -> Result<Self, DomainError> {
        if id <= 0 {
            return Err(DomainError::InvalidAccountId(id));
        }
        Ok(Self(id))
    }

    pub(crate) fn from_row(id: i64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account holding a single balance.
///
/// Fields are private; the balance only changes through a store's atomic
/// delta operation, never by writing back a value computed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    id: AccountId,
    name: String,
    balance: Amount,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        id: AccountId,
        name: impl Into<String>,
        balance: Amount,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            balance,
            created_at,
            updated_at,
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    // Used by the in-memory store when publishing a committed delta
    pub(crate) fn set_balance(&mut self, balance: Amount, at: DateTime<Utc>) {
        self.balance = balance;
        self.updated_at = at;
    }
}
