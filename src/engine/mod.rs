pub mod coordinator;
pub mod error;
pub mod outcome;

// Re-export commonly used types
pub use coordinator::TransactionCoordinator;
pub use error::EngineError;
pub use outcome::{ALREADY_PROCESSED_NOTE, ProcessOutcome};
