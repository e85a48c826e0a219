use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use csv_async::AsyncReaderBuilder;
use futures::io::AsyncRead;
use futures::{Stream, StreamExt};
use tokio::fs::File;
use tokio_util::compat::TokioAsyncReadCompatExt;

use super::error::IoError;
use super::parse::RawWebhookRecord;
use crate::domain::WebhookEvent;

/// Async stream of webhook events from CSV input.
///
/// Expected header: `account_id,provider_id,external_id,kind,amount`.
/// A malformed row yields an error item and the stream continues.
pub struct CsvEventStream {
    inner: Pin<Box<dyn Stream<Item = Result<WebhookEvent, IoError>> + Send>>,
}

impl CsvEventStream {
    /// Create a new event stream from an async reader
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let csv_reader = AsyncReaderBuilder::new()
            .trim(csv_async::Trim::All)
            .flexible(true)
            .create_deserializer(reader);

        let stream = csv_reader
            .into_deserialize::<RawWebhookRecord>()
            .map(|result| result.map_err(IoError::from).and_then(RawWebhookRecord::parse));

        Self {
            inner: Box::pin(stream),
        }
    }

    /// Open a CSV file asynchronously
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let file = File::open(path.as_ref()).await?;
        Ok(Self::new(file.compat()))
    }

    pub fn from_stdin() -> Self {
        Self::new(tokio::io::stdin().compat())
    }
}

impl Stream for CsvEventStream {
    type Item = Result<WebhookEvent, IoError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}
