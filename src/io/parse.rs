use serde::Deserialize;

use super::error::IoError;
use crate::domain::{Amount, EntryKind, WebhookEvent};

/// Raw CSV record as read from a webhook delivery log
#[derive(Debug, Deserialize)]
pub struct RawWebhookRecord {
    pub account_id: i64,
    pub provider_id: String,
    pub external_id: String,
    pub kind: String,
    pub amount: Option<String>,
}

impl RawWebhookRecord {
    /// Parse this raw record into a validated event
    pub fn parse(self) -> Result<WebhookEvent, IoError> {
        let kind: EntryKind = self
            .kind
            .parse()
            .map_err(|_| IoError::InvalidEntryKind(self.kind.clone()))?;

        let amount_str = self
            .amount
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| IoError::MissingField("amount".to_string()))?;
        let amount =
            Amount::from_decimal_str(&amount_str).map_err(|_| IoError::InvalidAmount(amount_str))?;

        Ok(WebhookEvent::new(
            self.account_id,
            self.provider_id,
            self.external_id,
            kind,
            amount,
        )?)
    }
}
