//! API Error Responses
//!
//! Every error leaving the HTTP surface is sanitised first and rendered as
//! the wire envelope with its mapped status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use qz_common::{ErrorCode, ErrorResponse};
use serde::Serialize;
use uuid::Uuid;

use crate::sanitize::{self, SanitizedError};

/// An error ready to leave the HTTP surface.
#[derive(Debug)]
pub struct ApiError {
    sanitized: SanitizedError,
}

impl ApiError {
    /// Sanitise an arbitrary error-bearing message.
    pub fn from_message(raw: &str) -> Self {
        Self {
            sanitized: sanitize::sanitize_message(raw),
        }
    }

    /// A plain not-found rejection.
    pub fn not_found() -> Self {
        Self::from_code(ErrorCode::NotFound)
    }

    /// Build directly from a known code, skipping classification.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            sanitized: SanitizedError {
                code,
                category: code.category(),
                message: code.user_message().to_owned(),
                user_message: code.user_message().to_owned(),
                timestamp: chrono::Utc::now(),
                request_id: None,
            },
        }
    }

    pub const fn code(&self) -> ErrorCode {
        self.sanitized.code
    }
}

impl<E: std::error::Error> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self::from_message(&e.to_string())
    }
}

/// REST body wrapping the envelope.
#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.sanitized.code;
        let status = StatusCode::from_u16(code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let request_id = self
            .sanitized
            .request_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let body = ErrorBody {
            success: false,
            error: ErrorResponse {
                code,
                message: self.sanitized.user_message,
                timestamp: self.sanitized.timestamp,
                request_id,
                status_code: Some(status.as_u16()),
                category: Some(self.sanitized.category),
                path: None,
                method: None,
                session_id: None,
                participant_id: None,
                event: None,
            },
        };
        (status, Json(body)).into_response()
    }
}
