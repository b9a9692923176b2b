//! Error types for placeholder preparation and embedding

use thiserror::Error;

/// Errors raised while preparing or embedding a signature.
///
/// Both variants are fatal for the operation that raised them; nothing at
/// this layer is retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PadesError {
    /// Input is not a usable PDF, the field name collides with an existing
    /// field, or the reserved slot cannot be found.
    #[error("Document format error: {0}")]
    DocumentFormat(String),

    /// The signature container does not fit the reserved slot.
    #[error("Signature container of {actual} bytes does not fit the {reserved} reserved bytes")]
    SignatureSizeMismatch { reserved: usize, actual: usize },
}

impl PadesError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        PadesError::DocumentFormat(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, PadesError>;
