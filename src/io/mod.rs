pub mod csv_reader;
pub mod csv_writer;
pub mod error;
pub mod parse;

// Re-export commonly used types
pub use csv_reader::CsvEventStream;
pub use csv_writer::{OutcomeRecord, OutcomeStatus, OutcomeWriter};
pub use error::IoError;
pub use parse::RawWebhookRecord;
