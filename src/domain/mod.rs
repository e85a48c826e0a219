pub mod account;
pub mod amount;
pub mod entry;
pub mod error;
pub mod event;

// Re-export commonly used types
pub use account::{Account, AccountId};
pub use amount::{Amount, SignedDelta};
pub use entry::{EntryKind, IdempotencyKey, LedgerEntry, NewLedgerEntry, TransactionId};
pub use error::DomainError;
pub use event::WebhookEvent;
