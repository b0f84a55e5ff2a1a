//! Error types for stats provider operations

use thiserror::Error;

/// Errors from stats providers.
///
/// Every variant is scoped to a single fetch; the pipeline records it
/// against the affected country and carries on with the rest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("No data for country '{slug}'")]
    NotFound { slug: String },

    #[error("Payload schema mismatch: {message}")]
    Schema { message: String },

    #[error("Transient fetch failure: {message}")]
    Retryable { message: String },

    #[error("Operation not supported by provider: {operation}")]
    Unsupported { operation: String },
}

impl ProviderError {
    pub fn not_found(slug: impl Into<String>) -> Self {
        Self::NotFound { slug: slug.into() }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
        }
    }

    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}
