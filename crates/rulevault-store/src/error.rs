//! Error types for the rulevault storage layer.

use rulevault_core::DslError;
use thiserror::Error;

/// Result type alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("sql error: {0}")]
    Sql(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation(_))
    }

    /// I/O, SQL, or (de)serialization failure of stored data.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_)
                | StoreError::Sql(_)
                | StoreError::Serialize(_)
                | StoreError::Deserialize(_)
        )
    }
}

impl From<DslError> for StoreError {
    fn from(e: DslError) -> Self {
        StoreError::Validation(e.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sql(e.to_string())
    }
}

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| $crate::error::StoreError::$variant(e.to_string())
    };
}

pub(crate) use map_err;
