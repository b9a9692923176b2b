//! Error taxonomy for the signing pipeline

use docsign_pades::PadesError;
use thiserror::Error;

use crate::model::RequestState;

#[derive(Debug, Error)]
pub enum SigningError {
    /// The request names a provider that has no configuration
    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Provider backend '{backend}' does not support {operation}")]
    ProviderCapabilityMissing {
        backend: &'static str,
        operation: &'static str,
    },

    /// Connection test failed
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider answered with a definitive error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Timeout, connection failure or 5xx; retried by the next poll
    #[error("Transient provider failure: {0}")]
    Transient(String),

    #[error(transparent)]
    Document(#[from] PadesError),

    #[error("Invalid callback token")]
    InvalidCallbackToken,

    #[error("Cannot {action} a request in state '{from}'")]
    InvalidTransition {
        from: RequestState,
        action: &'static str,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Notification failed: {0}")]
    Notification(String),
}

impl SigningError {
    /// Whether the next poll cycle may succeed where this failed
    pub fn is_transient(&self) -> bool {
        matches!(self, SigningError::Transient(_))
    }

    /// Configuration problems that need an operator, never retried
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SigningError::ProviderNotConfigured(_) | SigningError::ProviderCapabilityMissing { .. }
        )
    }
}

impl From<serde_json::Error> for SigningError {
    fn from(err: serde_json::Error) -> Self {
        SigningError::Storage(format!("Serialization failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, SigningError>;
