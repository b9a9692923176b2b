//! Error types for DocSign API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use docsign_core::SigningError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unprocessable document: {0}")]
    Document(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<SigningError> for ApiError {
    fn from(err: SigningError) -> Self {
        match err {
            SigningError::NotFound(what) => ApiError::NotFound(what),
            SigningError::InvalidCallbackToken => ApiError::InvalidToken,
            SigningError::InvalidTransition { .. } => ApiError::Conflict(err.to_string()),
            SigningError::Validation(msg) => ApiError::InvalidRequest(msg),
            SigningError::ProviderNotConfigured(_) | SigningError::ProviderCapabilityMissing { .. } => {
                ApiError::InvalidRequest(err.to_string())
            }
            SigningError::Document(e) => ApiError::Document(e.to_string()),
            SigningError::ProviderUnavailable(msg) | SigningError::Transient(msg) => {
                ApiError::Unavailable(msg)
            }
            SigningError::Provider(msg) => ApiError::Provider(msg),
            SigningError::Storage(_) | SigningError::Notification(_) => {
                ApiError::Internal(anyhow::Error::new(err))
            }
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) | ApiError::InvalidToken => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Document(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Provider(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to the client
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                "Internal error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.public_message(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

/// Webhook answers use the `{"status": "error", "message": ...}` shape
pub fn callback_error(err: ApiError) -> Response {
    let status = err.status();
    let message = match &err {
        ApiError::InvalidToken => "Invalid token".to_string(),
        ApiError::InvalidRequest(msg) => msg.clone(),
        other => other.public_message(),
    };
    (status, Json(json!({"status": "error", "message": message}))).into_response()
}
