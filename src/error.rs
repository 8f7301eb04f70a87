//! Error taxonomy for the vault and its mapping onto HTTP responses.
//!
//! Every lower-layer failure (image decoding, HTTP fetches, task joins) is
//! converted into a [`ServiceError`] at the module that observes it. The HTTP
//! layer only ever sees these variants, each with a stable status and code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("secure random source unavailable")]
    EntropyUnavailable,

    #[error("carrier image too small: need {needed} bits, have {available}")]
    CarrierTooSmall { needed: usize, available: usize },

    #[error("no usable carrier image: {0}")]
    CarrierUnavailable(String),

    #[error("file exceeds the maximum upload size of {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("key image does not carry a valid payload: {0}")]
    CorruptPayload(String),

    #[error("file not found")]
    NotFound,

    #[error("file has expired")]
    Expired,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

impl ServiceError {
    /// Machine-readable code returned in the `error` field of a response body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EntropyUnavailable => "entropy_unavailable",
            Self::CarrierTooSmall { .. } => "carrier_too_small",
            Self::CarrierUnavailable(_) => "carrier_unavailable",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::InvalidRequest(_) => "invalid_request",
            Self::AuthenticationFailed => "authentication_failed",
            Self::CorruptPayload(_) => "corrupt_payload",
            Self::NotFound => "not_found",
            Self::Expired => "expired",
            Self::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::EntropyUnavailable | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::CarrierTooSmall { .. } | Self::CarrierUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::PayloadTooLarge { .. } | Self::InvalidRequest(_) | Self::CorruptPayload(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::AuthenticationFailed => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Expired => StatusCode::GONE,
        }
    }

    /// Message safe to hand to a client. Server-side failures keep their
    /// detail in the log only.
    fn public_message(&self) -> String {
        match self {
            Self::EntropyUnavailable | Self::Internal(_) => "internal server error".to_string(),
            Self::CarrierUnavailable(_) => "no carrier image available, try again".to_string(),
            Self::CarrierTooSmall { .. } => "carrier image too small for the key".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "request failed: {}", self);
        } else {
            tracing::debug!(code = self.code(), "request rejected: {}", self);
        }

        let body = ErrorBody {
            error: self.code(),
            message: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}
