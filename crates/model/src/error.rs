//! Error types for the model engine
//!
//! Validation failures are always attributable to a single field. Adapter
//! failures are carried unchanged so callers can inspect the native error.

use thiserror::Error;

use crate::backends::AdapterError;
use crate::cache::CacheError;

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// A validation failure for one field, safe to show to end users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Error types for model operations
#[derive(Debug, Error)]
pub enum ModelError {
    /// A field failed validation
    #[error("Validation error: {0}")]
    Validation(ValidationError),

    /// Failure reported by the database adapter, passed through untouched
    #[error(transparent)]
    Database(#[from] AdapterError),

    /// Invalid model definition or usage, raised before any I/O
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Record not found in the given table
    #[error("Record not found in table '{0}'")]
    NotFound(String),

    /// Raised from a lifecycle hook
    #[error("Hook error: {0}")]
    Hook(String),

    /// Value could not be coerced or (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Condition or statement could not be built
    #[error("Query error: {0}")]
    Query(String),

    /// Transaction state error
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Cache adapter failure
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Migration failure
    #[error("Migration error: {0}")]
    Migration(String),
}

impl ModelError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ModelError::Validation(ValidationError::new(field, message))
    }

    /// The validation failure carried by this error, if any.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            ModelError::Validation(err) => Some(err),
            _ => None,
        }
    }

    /// The adapter failure carried by this error, if any.
    pub fn as_adapter(&self) -> Option<&AdapterError> {
        match self {
            ModelError::Database(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for ModelError {
    fn from(err: ValidationError) -> Self {
        ModelError::Validation(err)
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}
