use super::account::AccountId;
use super::amount::Amount;
use super::entry::{EntryKind, IdempotencyKey, NewLedgerEntry};
use super::error::DomainError;

/// Column width of `external_id` / `provider_id`
pub const MAX_ID_LEN: usize = 255;

/// A provider's assertion that an account was credited or debited.
///
/// Constructed only through [`WebhookEvent::new`], so every instance has a
/// positive account id, non-empty ids and a positive amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    account_id: AccountId,
    key: IdempotencyKey,
    kind: EntryKind,
    amount: Amount,
}

impl WebhookEvent {
    pub fn new(
        account_id: i64,
        provider_id: impl Into<String>,
        external_id: impl Into<String>,
        kind: EntryKind,
        amount: Amount,
    ) -> Result<Self, DomainError> {
        let account_id = AccountId::new(account_id)?;
        let provider_id = validate_id("provider_id", provider_id.into())?;
        let external_id = validate_id("external_id", external_id.into())?;

        if amount.is_zero() {
            return Err(DomainError::ZeroAmount);
        }

        Ok(Self {
            account_id,
            key: IdempotencyKey::new(provider_id, external_id),
            kind,
            amount,
        })
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn provider_id(&self) -> &str {
        &self.key.provider_id
    }

    pub fn external_id(&self) -> &str {
        &self.key.external_id
    }

    pub fn key(&self) -> &IdempotencyKey {
        &self.key
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    /// Ledger row this event would produce
    pub fn to_new_entry(&self) -> NewLedgerEntry {
        NewLedgerEntry {
            account_id: self.account_id,
            key: self.key.clone(),
            kind: self.kind,
            amount: self.amount,
        }
    }
}

fn validate_id(field: &'static str, value: String) -> Result<String, DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::EmptyField(field));
    }
    if trimmed.chars().count() > MAX_ID_LEN {
        return Err(DomainError::FieldTooLong {
            field,
            max: MAX_ID_LEN,
        });
    }
    Ok(trimmed.to_string())
}
