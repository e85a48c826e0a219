use csv_async::{AsyncSerializer, AsyncWriterBuilder};
use serde::Serialize;
use tokio::io::AsyncWrite;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use super::error::IoError;
use crate::domain::{AccountId, Amount, TransactionId, WebhookEvent};
use crate::engine::{EngineError, ProcessOutcome};

/// Final state of one processed event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Applied,
    AlreadyProcessed,
    AccountNotFound,
    InsufficientFunds,
    RetryLater,
    Fatal,
}

/// One output row, also used as the JSON body of the `process` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeRecord {
    pub provider_id: String,
    pub external_id: String,
    pub account_id: AccountId,
    pub status: OutcomeStatus,
    pub applied: bool,
    pub transaction_id: Option<TransactionId>,
    pub balance: Option<Amount>,
    pub detail: Option<String>,
}

impl OutcomeRecord {
    pub fn new(event: &WebhookEvent, result: &Result<ProcessOutcome, EngineError>) -> Self {
        let (status, transaction_id, balance, detail) = match result {
            Ok(outcome @ ProcessOutcome::Applied { .. }) => (
                OutcomeStatus::Applied,
                Some(outcome.transaction_id()),
                Some(outcome.balance()),
                None,
            ),
            Ok(outcome @ ProcessOutcome::AlreadyProcessed { .. }) => (
                OutcomeStatus::AlreadyProcessed,
                Some(outcome.transaction_id()),
                Some(outcome.balance()),
                outcome.note().map(str::to_string),
            ),
            Err(err) => {
                let status = match err {
                    EngineError::AccountNotFound(_) => OutcomeStatus::AccountNotFound,
                    EngineError::InsufficientFunds { .. } => OutcomeStatus::InsufficientFunds,
                    EngineError::RetryLater(_) => OutcomeStatus::RetryLater,
                    EngineError::Fatal(_) => OutcomeStatus::Fatal,
                };
                (status, None, None, Some(err.to_string()))
            }
        };

        Self {
            provider_id: event.provider_id().to_string(),
            external_id: event.external_id().to_string(),
            account_id: event.account_id(),
            status,
            applied: status == OutcomeStatus::Applied,
            transaction_id,
            balance,
            detail,
        }
    }
}

/// CSV writer for outcome records; the header is written with the first row
pub struct OutcomeWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    serializer: AsyncSerializer<Compat<W>>,
}

impl<W> OutcomeWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            serializer: AsyncWriterBuilder::new().create_serializer(writer.compat_write()),
        }
    }

    pub async fn write(&mut self, record: &OutcomeRecord) -> Result<(), IoError> {
        self.serializer.serialize(record).await?;
        Ok(())
    }

    /// Flush buffered rows to the underlying writer
    pub async fn finish(mut self) -> Result<(), IoError> {
        self.serializer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntryKind;
    use crate::storage::RetryReason;

    fn event() -> WebhookEvent {
        WebhookEvent::new(
            1,
            "stripe",
            "evt_1",
            EntryKind::Credit,
            Amount::from_cents(5_000),
        )
        .unwrap()
    }

    #[test]
    fn applied_record() {
        let tx = TransactionId::new_v4();
        let result = Ok(ProcessOutcome::Applied {
            transaction_id: tx,
            account_id: AccountId::new(1).unwrap(),
            balance: Amount::from_cents(5_000),
        });

        let record = OutcomeRecord::new(&event(), &result);
        assert_eq!(record.status, OutcomeStatus::Applied);
        assert!(record.applied);
        assert_eq!(record.transaction_id, Some(tx));
        assert_eq!(record.detail, None);
    }

    #[test]
    fn duplicate_record_carries_note() {
        let result = Ok(ProcessOutcome::AlreadyProcessed {
            transaction_id: TransactionId::new_v4(),
            account_id: AccountId::new(1).unwrap(),
            balance: Amount::from_cents(5_000),
        });

        let record = OutcomeRecord::new(&event(), &result);
        assert_eq!(record.status, OutcomeStatus::AlreadyProcessed);
        assert!(!record.applied);
        assert_eq!(record.detail.as_deref(), Some("already processed"));
    }

    #[test]
    fn error_record_has_no_transaction() {
        let result = Err(EngineError::RetryLater(RetryReason::LockTimeout));

        let record = OutcomeRecord::new(&event(), &result);
        assert_eq!(record.status, OutcomeStatus::RetryLater);
        assert_eq!(record.transaction_id, None);
        assert_eq!(record.balance, None);
        assert_eq!(record.detail.as_deref(), Some("Retry later: lock timeout"));
    }

    #[tokio::test]
    async fn writes_header_and_rows() {
        let mut output = Vec::new();
        let mut writer = OutcomeWriter::new(&mut output);

        let result = Err(EngineError::InsufficientFunds {
            account_id: AccountId::new(1).unwrap(),
            required: Amount::from_cents(5_000),
        });
        writer
            .write(&OutcomeRecord::new(&event(), &result))
            .await
            .unwrap();
        writer.finish().await.unwrap();

        let text = String::from_utf8(output).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("provider_id,external_id,account_id,status,applied,transaction_id,balance,detail")
        );
        assert_eq!(
            lines.next(),
            Some("stripe,evt_1,1,insufficient_funds,false,,,Insufficient funds on account 1 for 50.00")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn json_shape() {
        let result = Ok(ProcessOutcome::Applied {
            transaction_id: TransactionId::new_v4(),
            account_id: AccountId::new(1).unwrap(),
            balance: Amount::from_cents(5_000),
        });
        let json = serde_json::to_value(OutcomeRecord::new(&event(), &result)).unwrap();

        assert_eq!(json["status"], "applied");
        assert_eq!(json["balance"], "50.00");
        assert_eq!(json["account_id"], 1);
        assert!(json["detail"].is_null());
    }
}
