use tracing::{debug, error, instrument, warn};

use super::error::EngineError;
use super::outcome::ProcessOutcome;
use crate::domain::WebhookEvent;
use crate::storage::{
    AccountStore, DeltaOutcome, InsertOutcome, LedgerBackend, LedgerStore, TimeoutConfig,
    UnitOfWork,
};

/// What the transactional part of a call decided
enum Step {
    Commit(ProcessOutcome),
    Duplicate,
}

/// Applies webhook events to the ledger, one storage transaction per event.
///
/// Within the transaction the order is fixed: lock the account row, insert
/// the ledger entry, then apply the balance delta. A concurrent redelivery
/// therefore queues on the row lock instead of racing the balance update,
/// and a rejected debit rolls back its own ledger row.
///
/// Nothing is retried here. Transient failures surface as
/// [`EngineError::RetryLater`] for the provider to resubmit.
pub struct TransactionCoordinator<B: LedgerBackend> {
    backend: B,
    timeouts: TimeoutConfig,
}

impl<B: LedgerBackend> TransactionCoordinator<B> {
    pub fn new(backend: B, timeouts: TimeoutConfig) -> Self {
        Self { backend, timeouts }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Process one event end-to-end
    #[instrument(
        skip(self, event),
        fields(
            account_id = %event.account_id(),
            key = %event.key(),
            kind = %event.kind(),
            amount = %event.amount()
        )
    )]
    pub async fn process(&self, event: &WebhookEvent) -> Result<ProcessOutcome, EngineError> {
        let result = self.process_inner(event).await;

        match &result {
            Ok(outcome) if outcome.is_applied() => {
                debug!(
                    transaction_id = %outcome.transaction_id(),
                    balance = %outcome.balance(),
                    "Event applied"
                );
            }
            Ok(outcome) => {
                debug!(
                    transaction_id = %outcome.transaction_id(),
                    balance = %outcome.balance(),
                    "Event already processed"
                );
            }
            Err(err @ (EngineError::AccountNotFound(_) | EngineError::InsufficientFunds { .. })) => {
                debug!(error = %err, "Event rejected");
            }
            Err(EngineError::RetryLater(reason)) => {
                warn!(%reason, "Transient storage failure, event rolled back");
            }
            Err(EngineError::Fatal(detail)) => {
                error!(%detail, "Event processing failed");
            }
        }

        result
    }

    async fn process_inner(&self, event: &WebhookEvent) -> Result<ProcessOutcome, EngineError> {
        let mut tx = self.backend.begin(self.timeouts).await?;

        match run_steps(&mut tx, event).await {
            Ok(Step::Commit(outcome)) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Ok(Step::Duplicate) => {
                discard(tx).await;
                self.recover_duplicate(event).await
            }
            Err(err) => {
                discard(tx).await;
                Err(err)
            }
        }
    }

    /// Report the committed entry for a redelivered event.
    ///
    /// Runs outside any transaction. The balance is whatever is committed
    /// right now, which can lag a sibling call that has recorded the entry but
    /// not yet committed its delta.
    async fn recover_duplicate(&self, event: &WebhookEvent) -> Result<ProcessOutcome, EngineError> {
        let existing = self
            .backend
            .find_entry(event.provider_id(), event.external_id())
            .await?
            .ok_or_else(|| {
                EngineError::Fatal(format!(
                    "ledger entry {} reported as duplicate but not found",
                    event.key()
                ))
            })?;

        if existing.account_id() != event.account_id() {
            warn!(
                recorded_account_id = %existing.account_id(),
                transaction_id = %existing.transaction_id(),
                "Idempotency key reused for a different account"
            );
        }

        let account = self
            .backend
            .find_account(event.account_id())
            .await?
            .ok_or(EngineError::AccountNotFound(event.account_id()))?;

        Ok(ProcessOutcome::AlreadyProcessed {
            transaction_id: existing.transaction_id(),
            account_id: event.account_id(),
            balance: account.balance(),
        })
    }
}

async fn run_steps<T: UnitOfWork>(tx: &mut T, event: &WebhookEvent) -> Result<Step, EngineError> {
    let account_id = event.account_id();

    if tx.lock_for_update(account_id).await?.is_none() {
        return Err(EngineError::AccountNotFound(account_id));
    }

    let entry = match tx.insert(&event.to_new_entry()).await? {
        InsertOutcome::Inserted(entry) => entry,
        InsertOutcome::Conflict => return Ok(Step::Duplicate),
    };

    match tx.apply_delta(account_id, event.kind().delta(event.amount())).await? {
        DeltaOutcome::Applied { new_balance } => Ok(Step::Commit(ProcessOutcome::Applied {
            transaction_id: entry.transaction_id(),
            account_id,
            balance: new_balance,
        })),
        DeltaOutcome::Rejected => Err(EngineError::InsufficientFunds {
            account_id,
            required: event.amount(),
        }),
    }
}

/// Roll back, logging rather than propagating a failed rollback: the
/// transaction is discarded either way once the connection is released
async fn discard<T: UnitOfWork>(tx: T) {
    if let Err(err) = tx.rollback().await {
        warn!(error = %err, "Rollback failed");
    }
}
