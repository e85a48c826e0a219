use thiserror::Error;

/// Storage-level failure signal.
///
/// Database failures keep their SQLSTATE code so that
/// [`classify`](super::classify::classify) can decide what they mean; no
/// other component inspects codes or messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("database error ({}): {message}", .code.as_deref().unwrap_or("no sqlstate"))]
    Database {
        code: Option<String>,
        message: String,
    },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("row decode error: {0}")]
    Decode(String),
}

impl StorageError {
    /// Database failure carrying a SQLSTATE code
    pub fn database(code: &str, message: impl Into<String>) -> Self {
        Self::Database {
            code: Some(code.to_string()),
            message: message.into(),
        }
    }

    /// SQLSTATE code, if the failure came from the database
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Self::Database { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}
