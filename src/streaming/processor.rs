use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{Stream, StreamExt, future};
use tokio::io::AsyncWrite;
use tracing::{debug, info};

use super::error::ErrorPolicy;
use crate::domain::WebhookEvent;
use crate::engine::{EngineError, ProcessOutcome, TransactionCoordinator};
use crate::io::{IoError, OutcomeRecord, OutcomeWriter};
use crate::storage::LedgerBackend;

/// Replays a stream of webhook deliveries through a coordinator.
///
/// Up to `workers` events are in flight at once, each in its own tokio task
/// and its own storage transaction. Outcomes are written in input order.
/// When the error policy aborts, events already in flight still finish and
/// are written and counted before `process` returns.
pub struct ReplayProcessor<B, P>
where
    B: LedgerBackend + 'static,
    P: ErrorPolicy,
{
    coordinator: Arc<TransactionCoordinator<B>>,
    error_policy: P,
    workers: usize,
}

impl<B, P> ReplayProcessor<B, P>
where
    B: LedgerBackend + 'static,
    P: ErrorPolicy,
{
    pub fn new(coordinator: Arc<TransactionCoordinator<B>>, error_policy: P) -> Self {
        Self {
            coordinator,
            error_policy,
            workers: 1,
        }
    }

    /// Set the number of concurrently processed events (defaults to 1)
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn coordinator(&self) -> &TransactionCoordinator<B> {
        &self.coordinator
    }

    /// Process every event in `stream`, writing one outcome row per event
    pub async fn process<S, W>(
        &self,
        stream: S,
        writer: &mut OutcomeWriter<W>,
    ) -> Result<ReplaySummary, IoError>
    where
        S: Stream<Item = Result<WebhookEvent, IoError>> + Send,
        W: AsyncWrite + Unpin + Send,
    {
        // Set on abort: no further input is pulled, but events already
        // spawned are awaited and reported
        let stop = Arc::new(AtomicBool::new(false));
        let input_open = Arc::clone(&stop);
        let coordinator = Arc::clone(&self.coordinator);
        let results = stream
            .take_while(move |_| future::ready(!input_open.load(Ordering::Acquire)))
            .map(move |item| {
                let coordinator = Arc::clone(&coordinator);
                async move {
                    let event = item?;
                    let task_event = event.clone();
                    let result = tokio::spawn(async move { coordinator.process(&task_event).await })
                        .await
                        .unwrap_or_else(|e| {
                            Err(EngineError::Fatal(format!("worker task failed: {e}")))
                        });
                    Ok::<_, IoError>((event, result))
                }
            })
            .buffered(self.workers);
        let mut results = pin!(results);

        let mut summary = ReplaySummary::default();
        while let Some(item) = results.next().await {
            match item {
                Ok((event, result)) => {
                    writer.write(&OutcomeRecord::new(&event, &result)).await?;
                    summary.record(&result);

                    if let Err(err) = &result
                        && !summary.aborted
                        && !self.error_policy.handle_engine_error(&event, err)
                    {
                        summary.aborted = true;
                        stop.store(true, Ordering::Release);
                    }
                }
                Err(err) => {
                    summary.io_errors += 1;
                    if !summary.aborted && !self.error_policy.handle_io_error(err) {
                        summary.aborted = true;
                        stop.store(true, Ordering::Release);
                    }
                }
            }
        }

        info!(
            applied = summary.applied,
            duplicates = summary.duplicates,
            rejected = summary.rejected,
            retryable = summary.retryable,
            fatal = summary.fatal,
            io_errors = summary.io_errors,
            aborted = summary.aborted,
            "Replay finished"
        );
        Ok(summary)
    }
}

/// Counts of replay outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub applied: usize,
    pub duplicates: usize,
    /// Account missing or insufficient funds
    pub rejected: usize,
    pub retryable: usize,
    pub fatal: usize,
    pub io_errors: usize,
    pub aborted: bool,
}

impl ReplaySummary {
    fn record(&mut self, result: &Result<ProcessOutcome, EngineError>) {
        match result {
            Ok(outcome) if outcome.is_applied() => self.applied += 1,
            Ok(_) => self.duplicates += 1,
            Err(EngineError::AccountNotFound(_) | EngineError::InsufficientFunds { .. }) => {
                self.rejected += 1
            }
            Err(EngineError::RetryLater(_)) => self.retryable += 1,
            Err(EngineError::Fatal(_)) => self.fatal += 1,
        }
        debug!(?result, "Recorded replay outcome");
    }

    /// Events that reached the coordinator
    pub fn processed(&self) -> usize {
        self.applied + self.duplicates + self.rejected + self.retryable + self.fatal
    }

    /// True when every delivery should be resubmitted or investigated
    pub fn needs_attention(&self) -> bool {
        self.retryable > 0 || self.fatal > 0 || self.io_errors > 0 || self.aborted
    }
}
