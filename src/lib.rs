//! Idempotent ledger write path for payment-provider webhooks.
//!
//! Each event is applied in one storage transaction: lock the account row,
//! insert the ledger entry keyed by `(provider_id, external_id)`, then apply a
//! balance delta guarded by `balance + delta >= 0`. Redeliveries resolve to
//! the entry already recorded.

pub mod app;
pub mod domain;
pub mod engine;
pub mod io;
pub mod prelude;
pub mod storage;
pub mod streaming;
