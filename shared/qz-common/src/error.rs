//! Stable Error Codes and Wire Envelope
//!
//! Every user-facing error in the quiz backend carries one of these codes.
//! Codes are stable: the same failure always maps to the same code, so
//! clients and dashboards can key on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse error category used for classification and HTTP status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Authentication,
    Authorization,
    RateLimit,
    NotFound,
    Conflict,
    Network,
    Timeout,
    Database,
    ServiceUnavailable,
    Internal,
    Unknown,
}

impl ErrorCategory {
    /// Machine-readable name for logs and the wire envelope.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::RateLimit => "rate_limit",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Database => "database",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Internal => "internal",
            Self::Unknown => "unknown",
        }
    }
}

/// Stable machine-readable error code.
///
/// Refines an [`ErrorCategory`]; several codes may share a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation
    ValidationError,
    // Authentication
    AuthFailed,
    InvalidToken,
    TokenExpired,
    SessionExpired,
    // Authorization
    Forbidden,
    // Rate limiting
    RateLimited,
    // Lookup
    NotFound,
    // Conflicts
    Conflict,
    DbDuplicateKey,
    // Infrastructure
    NetworkError,
    Timeout,
    DbConnectionFailed,
    DbTimeout,
    DbError,
    CacheError,
    ServiceUnavailable,
    // Catch-alls
    InternalError,
    UnknownError,
}

impl ErrorCode {
    /// The wire representation (`SCREAMING_SNAKE_CASE`).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::AuthFailed => "AUTH_FAILED",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::Forbidden => "FORBIDDEN",
            Self::RateLimited => "RATE_LIMITED",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::DbDuplicateKey => "DB_DUPLICATE_KEY",
            Self::NetworkError => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::DbConnectionFailed => "DB_CONNECTION_FAILED",
            Self::DbTimeout => "DB_TIMEOUT",
            Self::DbError => "DB_ERROR",
            Self::CacheError => "CACHE_ERROR",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::InternalError => "INTERNAL_ERROR",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// The category this code refines.
    pub const fn category(self) -> ErrorCategory {
        match self {
            Self::ValidationError => ErrorCategory::Validation,
            Self::AuthFailed | Self::InvalidToken | Self::TokenExpired => {
                ErrorCategory::Authentication
            }
            Self::Forbidden => ErrorCategory::Authorization,
            Self::RateLimited => ErrorCategory::RateLimit,
            Self::NotFound | Self::SessionExpired => ErrorCategory::NotFound,
            Self::Conflict | Self::DbDuplicateKey => ErrorCategory::Conflict,
            Self::NetworkError => ErrorCategory::Network,
            Self::Timeout => ErrorCategory::Timeout,
            Self::DbConnectionFailed | Self::DbTimeout | Self::DbError => ErrorCategory::Database,
            Self::CacheError | Self::ServiceUnavailable => ErrorCategory::ServiceUnavailable,
            Self::InternalError => ErrorCategory::Internal,
            Self::UnknownError => ErrorCategory::Unknown,
        }
    }

    /// HTTP status for REST responses carrying this code.
    pub const fn http_status(self) -> u16 {
        match self {
            Self::ValidationError => 400,
            Self::AuthFailed | Self::InvalidToken | Self::TokenExpired => 401,
            Self::Forbidden => 403,
            Self::NotFound | Self::SessionExpired => 404,
            Self::Conflict | Self::DbDuplicateKey => 409,
            Self::RateLimited => 429,
            Self::DbConnectionFailed | Self::CacheError | Self::ServiceUnavailable => 503,
            Self::DbTimeout => 504,
            Self::NetworkError
            | Self::Timeout
            | Self::DbError
            | Self::InternalError
            | Self::UnknownError => 500,
        }
    }

    /// Static user-facing message for this code.
    ///
    /// These are the only strings shown to quiz participants; technical
    /// detail stays in operator logs.
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::ValidationError => "Please check your input and try again.",
            Self::AuthFailed | Self::InvalidToken => {
                "Authentication failed. Please sign in again."
            }
            Self::TokenExpired => "Your login has expired. Please sign in again.",
            Self::SessionExpired => "Your session has expired. Please rejoin with the join code.",
            Self::Forbidden => "You do not have permission to do that.",
            Self::RateLimited => "Too many requests. Please slow down.",
            Self::NotFound => "We could not find what you were looking for.",
            Self::Conflict | Self::DbDuplicateKey => {
                "That change conflicts with the current state. Please try again."
            }
            Self::NetworkError => "A network error occurred. Please check your connection.",
            Self::Timeout => "The request took too long. Please try again.",
            Self::DbConnectionFailed | Self::DbError => {
                "We are having trouble saving your data. Please try again."
            }
            Self::DbTimeout => "Saving your data took too long. Please try again.",
            Self::CacheError | Self::ServiceUnavailable => {
                "The service is temporarily unavailable. Please try again shortly."
            }
            Self::InternalError => "Something went wrong on our side. Please try again.",
            Self::UnknownError => "Something went wrong. Please try again.",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire envelope for error responses.
///
/// Serialised on REST responses alongside `success: false`; the same shape
/// is pushed over the realtime transport on request failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Stable machine-readable code.
    pub code: ErrorCode,
    /// User-facing message.
    pub message: String,
    /// When the error was produced.
    pub timestamp: DateTime<Utc>,
    /// Correlation id (UUIDv4) for support and log lookup.
    pub request_id: String,
    /// HTTP status, when the error travelled over REST.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Coarse category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
    /// Request path, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Request method, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Session the error occurred in, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Participant the error occurred for, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    /// Realtime event name, when the error came from the transport.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_wire_form_is_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::DbDuplicateKey).unwrap(),
            "\"DB_DUPLICATE_KEY\""
        );
        assert_eq!(ErrorCode::SessionExpired.as_str(), "SESSION_EXPIRED");
    }

    #[test]
    fn status_mapping_matches_categories() {
        assert_eq!(ErrorCode::ValidationError.http_status(), 400);
        assert_eq!(ErrorCode::TokenExpired.http_status(), 401);
        assert_eq!(ErrorCode::Forbidden.http_status(), 403);
        assert_eq!(ErrorCode::NotFound.http_status(), 404);
        assert_eq!(ErrorCode::DbDuplicateKey.http_status(), 409);
        assert_eq!(ErrorCode::RateLimited.http_status(), 429);
        assert_eq!(ErrorCode::DbConnectionFailed.http_status(), 503);
        assert_eq!(ErrorCode::DbTimeout.http_status(), 504);
        assert_eq!(ErrorCode::UnknownError.http_status(), 500);
    }

    #[test]
    fn every_code_has_a_category_and_message() {
        let codes = [
            ErrorCode::ValidationError,
            ErrorCode::AuthFailed,
            ErrorCode::InvalidToken,
            ErrorCode::TokenExpired,
            ErrorCode::SessionExpired,
            ErrorCode::Forbidden,
            ErrorCode::RateLimited,
            ErrorCode::NotFound,
            ErrorCode::Conflict,
            ErrorCode::DbDuplicateKey,
            ErrorCode::NetworkError,
            ErrorCode::Timeout,
            ErrorCode::DbConnectionFailed,
            ErrorCode::DbTimeout,
            ErrorCode::DbError,
            ErrorCode::CacheError,
            ErrorCode::ServiceUnavailable,
            ErrorCode::InternalError,
            ErrorCode::UnknownError,
        ];
        for code in codes {
            assert!(!code.user_message().is_empty());
            assert!(!code.category().as_str().is_empty());
        }
    }

    #[test]
    fn envelope_skips_absent_fields() {
        let envelope = ErrorResponse {
            code: ErrorCode::NotFound,
            message: "not here".into(),
            timestamp: Utc::now(),
            request_id: "00000000-0000-4000-8000-000000000000".into(),
            status_code: None,
            category: None,
            path: None,
            method: None,
            session_id: None,
            participant_id: None,
            event: None,
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"code\":\"NOT_FOUND\""));
        assert!(!json.contains("statusCode"));
        assert!(!json.contains("sessionId"));
    }
}
