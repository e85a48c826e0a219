pub mod error;
pub mod processor;

// Re-export commonly used types
pub use error::{AbortOnError, ErrorPolicy, SilentSkip, SkipErrors};
pub use processor::{ReplayProcessor, ReplaySummary};
