use tracing::{debug, warn};

use crate::domain::WebhookEvent;
use crate::engine::EngineError;
use crate::io::IoError;

/// Decides whether a replay keeps going after a record fails.
///
/// Returning `false` stops the replay after the current row has been written.
pub trait ErrorPolicy: Send + Sync {
    /// A record that could not be read or validated
    fn handle_io_error(&self, error: IoError) -> bool;

    /// An event the coordinator did not apply
    fn handle_engine_error(&self, event: &WebhookEvent, error: &EngineError) -> bool;
}

/// Whether the failure is a verdict on the event rather than on the store
fn is_rejection(error: &EngineError) -> bool {
    matches!(
        error,
        EngineError::AccountNotFound(_) | EngineError::InsufficientFunds { .. }
    )
}

/// Log every failure and keep replaying
#[derive(Debug, Clone, Copy)]
pub struct SkipErrors;

impl ErrorPolicy for SkipErrors {
    fn handle_io_error(&self, error: IoError) -> bool {
        warn!(%error, "Skipping unreadable record");
        true
    }

    fn handle_engine_error(&self, event: &WebhookEvent, error: &EngineError) -> bool {
        if is_rejection(error) {
            debug!(key = %event.key(), %error, "Event rejected, continuing");
        } else {
            warn!(
                key = %event.key(),
                %error,
                retryable = error.is_retryable(),
                "Event not applied, continuing"
            );
        }
        true
    }
}

/// Stop at the first unreadable record or storage failure.
///
/// Rejections (unknown account, insufficient funds) are ordinary outcomes
/// and do not stop the replay.
#[derive(Debug, Clone, Copy)]
pub struct AbortOnError;

impl ErrorPolicy for AbortOnError {
    fn handle_io_error(&self, error: IoError) -> bool {
        warn!(%error, "Unreadable record, aborting replay");
        false
    }

    fn handle_engine_error(&self, event: &WebhookEvent, error: &EngineError) -> bool {
        if is_rejection(error) {
            return true;
        }
        warn!(key = %event.key(), %error, "Storage failure, aborting replay");
        false
    }
}

/// Continue without logging
#[derive(Debug, Clone, Copy)]
pub struct SilentSkip;

impl ErrorPolicy for SilentSkip {
    fn handle_io_error(&self, _error: IoError) -> bool {
        true
    }

    fn handle_engine_error(&self, _event: &WebhookEvent, _error: &EngineError) -> bool {
        true
    }
}
