use serde::Serialize;

use crate::domain::{AccountId, Amount, TransactionId};

/// Note attached to a redelivered event
pub const ALREADY_PROCESSED_NOTE: &str = "already processed";

/// Successful result of processing one webhook event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// The entry was recorded and the balance changed in this call
    Applied {
        transaction_id: TransactionId,
        account_id: AccountId,
        balance: Amount,
    },

    /// The idempotency key was already recorded; nothing changed.
    ///
    /// `balance` is read after the fact and may not yet include the delta of
    /// a concurrent call that is still committing.
    AlreadyProcessed {
        transaction_id: TransactionId,
        account_id: AccountId,
        balance: Amount,
    },
}

impl ProcessOutcome {
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            Self::Applied { transaction_id, .. } | Self::AlreadyProcessed { transaction_id, .. } => {
                *transaction_id
            }
        }
    }

    pub fn account_id(&self) -> AccountId {
        match self {
            Self::Applied { account_id, .. } | Self::AlreadyProcessed { account_id, .. } => {
                *account_id
            }
        }
    }

    pub fn balance(&self) -> Amount {
        match self {
            Self::Applied { balance, .. } | Self::AlreadyProcessed { balance, .. } => *balance,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    pub fn note(&self) -> Option<&'static str> {
        match self {
            Self::Applied { .. } => None,
            Self::AlreadyProcessed { .. } => Some(ALREADY_PROCESSED_NOTE),
        }
    }
}
