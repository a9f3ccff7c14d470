//! Error Classification
//!
//! Maps extracted error text onto a coarse [`ErrorCategory`] and refines it
//! into a stable [`ErrorCode`]. The category table is ordered: earlier rows
//! are more specific and win.

use lazy_static::lazy_static;
use qz_common::{ErrorCategory, ErrorCode};
use regex::Regex;

lazy_static! {
    /// Ordered (pattern, category) table. First match wins.
    static ref CATEGORY_RULES: Vec<(Regex, ErrorCategory)> = vec![
        (
            Regex::new(r"(?i)\b(token|jwt|session|credential|unauthenticated|unauthorized|login)\b")
                .unwrap(),
            ErrorCategory::Authentication,
        ),
        (
            Regex::new(r"(?i)\b(mongo|mongodb|redis|database|duplicate key|E11000|collection)\b|connection refused")
                .unwrap(),
            ErrorCategory::Database,
        ),
        (
            Regex::new(r"(?i)\b(forbidden|permission|access denied|not allowed|banned)\b").unwrap(),
            ErrorCategory::Authorization,
        ),
        (
            Regex::new(r"(?i)rate limit|too many requests|\b429\b").unwrap(),
            ErrorCategory::RateLimit,
        ),
        (
            Regex::new(r"(?i)not found|does not exist|no such|\b404\b").unwrap(),
            ErrorCategory::NotFound,
        ),
        (
            Regex::new(r"(?i)\b(conflict|already exists|duplicate)\b").unwrap(),
            ErrorCategory::Conflict,
        ),
        (
            Regex::new(r"(?i)time[d]? ?out|deadline exceeded").unwrap(),
            ErrorCategory::Timeout,
        ),
        (
            Regex::new(r"(?i)unavailable|\b503\b|circuit open|overloaded|not ready").unwrap(),
            ErrorCategory::ServiceUnavailable,
        ),
        (
            Regex::new(r"(?i)internal server error|panicked|assertion failed").unwrap(),
            ErrorCategory::Internal,
        ),
        (
            Regex::new(r"(?i)\b(validation|invalid|malformed|required field|out of range)\b").unwrap(),
            ErrorCategory::Validation,
        ),
        (
            Regex::new(r"(?i)\b(network|connection|socket|dns|unreachable|broken pipe|reset by peer)\b|ECONN|ENOTFOUND|EHOSTUNREACH|ETIMEDOUT")
                .unwrap(),
            ErrorCategory::Network,
        ),
    ];

    static ref DB_DUPLICATE: Regex = Regex::new(r"(?i)duplicate key|E11000").unwrap();
    static ref DB_TIMEOUT: Regex = Regex::new(r"(?i)time[d]? ?out|deadline").unwrap();
    static ref DB_CONNECT: Regex =
        Regex::new(r"(?i)connection refused|connect|no servers|unreachable|topology").unwrap();
    static ref AUTH_EXPIRED: Regex = Regex::new(r"(?i)expired").unwrap();
    static ref AUTH_INVALID: Regex = Regex::new(r"(?i)invalid|malformed").unwrap();

    /// Unavailability signal used by facades to decide fallback vs propagate:
    /// network-class trouble, refusals, timeouts, and not-ready states.
    static ref UNAVAILABILITY: Regex = Regex::new(
        r"(?i)\b(connection|connect|network|socket|dns|unreachable|unavailable|refused|reset|closed|broken pipe|not ready|no servers|timeout|timed out)\b|ECONN|ENOTFOUND|EHOSTUNREACH|ETIMEDOUT|EPIPE"
    )
    .unwrap();
}

/// Classify a message into its coarse category.
pub fn categorize(message: &str) -> ErrorCategory {
    for (pattern, category) in CATEGORY_RULES.iter() {
        if pattern.is_match(message) {
            return *category;
        }
    }
    ErrorCategory::Unknown
}

/// Refine a category into a stable code using the message detail.
pub fn refine(category: ErrorCategory, message: &str) -> ErrorCode {
    match category {
        ErrorCategory::Authentication => {
            if AUTH_EXPIRED.is_match(message) {
                ErrorCode::TokenExpired
            } else if AUTH_INVALID.is_match(message) {
                ErrorCode::InvalidToken
            } else {
                ErrorCode::AuthFailed
            }
        }
        ErrorCategory::Database => {
            if DB_DUPLICATE.is_match(message) {
                ErrorCode::DbDuplicateKey
            } else if DB_TIMEOUT.is_match(message) {
                ErrorCode::DbTimeout
            } else if DB_CONNECT.is_match(message) {
                ErrorCode::DbConnectionFailed
            } else {
                ErrorCode::DbError
            }
        }
        ErrorCategory::Authorization => ErrorCode::Forbidden,
        ErrorCategory::RateLimit => ErrorCode::RateLimited,
        ErrorCategory::NotFound => ErrorCode::NotFound,
        ErrorCategory::Conflict => ErrorCode::Conflict,
        ErrorCategory::Timeout => ErrorCode::Timeout,
        ErrorCategory::ServiceUnavailable => ErrorCode::ServiceUnavailable,
        ErrorCategory::Internal => ErrorCode::InternalError,
        ErrorCategory::Validation => ErrorCode::ValidationError,
        ErrorCategory::Network => ErrorCode::NetworkError,
        ErrorCategory::Unknown => ErrorCode::UnknownError,
    }
}

/// Whether a message describes the dependency being unreachable (as opposed
/// to a request-level failure). Facades fall back on these; everything else
/// propagates.
pub fn is_unavailability(message: &str) -> bool {
    UNAVAILABILITY.is_match(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn more_specific_category_wins() {
        // "mongodb" + "connection" text: Database is listed before Network.
        assert_eq!(
            categorize("mongodb connection refused"),
            ErrorCategory::Database
        );
        // "token" beats "database" by order.
        assert_eq!(
            categorize("database rejected token"),
            ErrorCategory::Authentication
        );
    }

    #[test]
    fn duplicate_key_refines_inside_database() {
        let msg = "E11000 duplicate key error collection: quiz.answers";
        assert_eq!(categorize(msg), ErrorCategory::Database);
        assert_eq!(refine(ErrorCategory::Database, msg), ErrorCode::DbDuplicateKey);
    }

    #[test]
    fn auth_expiry_refines_to_token_expired() {
        let msg = "jwt expired 2 minutes ago";
        assert_eq!(categorize(msg), ErrorCategory::Authentication);
        assert_eq!(
            refine(ErrorCategory::Authentication, msg),
            ErrorCode::TokenExpired
        );
    }

    #[test]
    fn unmatched_text_is_unknown() {
        assert_eq!(categorize("zorp"), ErrorCategory::Unknown);
        assert_eq!(refine(ErrorCategory::Unknown, "zorp"), ErrorCode::UnknownError);
    }

    #[test]
    fn unavailability_signal_matches_network_class_only() {
        assert!(is_unavailability("connection refused"));
        assert!(is_unavailability("dns lookup failed"));
        assert!(is_unavailability("operation timed out"));
        assert!(is_unavailability("LOADING Redis is loading... not ready"));
        assert!(!is_unavailability("duplicate key"));
        assert!(!is_unavailability("document failed validation"));
    }

    #[test]
    fn classification_is_stable() {
        let msg = "redis timed out talking to 10.0.0.1";
        let a = refine(categorize(msg), msg);
        let b = refine(categorize(msg), msg);
        assert_eq!(a, b);
    }
}
