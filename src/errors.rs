use crate::config::MissingConfig;
use crate::services::{metadata_service::MetadataError, signer::SigningError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Failures of the upload subsystem, on either side of the wire.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Credentials, endpoint or bucket absent. Never retried.
    #[error(transparent)]
    Configuration(#[from] MissingConfig),

    /// Non-2xx from the storage provider or the vault API, with its body.
    #[error("{operation} failed ({status}): {body}")]
    Protocol {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// The initiate response parsed as text but carried no `<UploadId>`.
    #[error("UploadId not found in provider response")]
    MissingUploadId { body: String },

    /// One part's PUT failed or came back without an ETag.
    #[error("part {part_number} failed: {reason}")]
    PartTransport { part_number: u32, reason: String },

    /// Completion attempted while parts are missing; rejected locally.
    #[error("{0}")]
    Precondition(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub type UploadResult<T> = Result<T, UploadError>;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 403 Forbidden
    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "Forbidden.")
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Precondition(_) | UploadError::InvalidRequest(_) => {
                AppError::bad_request(err.to_string())
            }
            UploadError::MissingUploadId { ref body } => {
                tracing::warn!("initiate response without UploadId: {}", body);
                AppError::internal(err.to_string())
            }
            other => AppError::internal(other.to_string()),
        }
    }
}

impl From<MetadataError> for AppError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(_) => AppError::not_found(err.to_string()),
            other => AppError::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        let cases = [
            (
                UploadError::Configuration(MissingConfig(vec!["VAULT_S3_BUCKET"])),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                UploadError::Precondition("part 2 has no ETag".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                UploadError::Protocol {
                    operation: "complete upload",
                    status: 400,
                    body: "<Error>InvalidPart</Error>".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn protocol_error_keeps_provider_body() {
        let err = AppError::from(UploadError::Protocol {
            operation: "create upload",
            status: 403,
            body: "<Error><Code>AccessDenied</Code></Error>".into(),
        });
        assert!(err.message.contains("<Code>AccessDenied</Code>"));
    }
}
