//! Error Sanitisation
//!
//! Everything shown to a user or written to a log first passes through this
//! module: arbitrary error-bearing input is reduced to a message string,
//! classified into a stable code, scrubbed of sensitive substrings, and
//! paired with a static user-facing message.

mod classify;
mod patterns;

pub use classify::{categorize, is_unavailability, refine};
pub use patterns::{contains_sensitive, redact};

use chrono::{DateTime, Utc};
use qz_common::{ErrorCategory, ErrorCode};
use serde::Serialize;
use serde_json::Value;

/// Maximum length for a validation message to pass through to users.
const VALIDATION_PASSTHROUGH_MAX: usize = 200;

/// Depth bound when stringifying nested error values.
const MAX_EXTRACTION_DEPTH: usize = 8;

/// The sanitised form of an arbitrary error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizedError {
    /// Stable machine-readable code.
    pub code: ErrorCode,
    /// Coarse category the code refines.
    pub category: ErrorCategory,
    /// Redacted technical message, safe for operator logs.
    pub message: String,
    /// Static (or passthrough-validated) user-facing message.
    pub user_message: String,
    pub timestamp: DateTime<Utc>,
    /// Correlation id, when the caller attached one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl SanitizedError {
    /// Attach a correlation id for wire envelopes and log joins.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Sanitise a raw message string.
pub fn sanitize_message(raw: &str) -> SanitizedError {
    let extracted = if raw.trim().is_empty() {
        None
    } else {
        Some(raw.to_owned())
    };
    build(extracted)
}

/// Sanitise a structured error, folding in its source chain.
pub fn sanitize_error(err: &(dyn std::error::Error + 'static)) -> SanitizedError {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    let mut depth = 0;
    while let Some(cause) = source {
        if depth >= MAX_EXTRACTION_DEPTH {
            break;
        }
        parts.push(cause.to_string());
        source = cause.source();
        depth += 1;
    }
    build(Some(parts.join(": ")))
}

/// Sanitise an arbitrary JSON-shaped value (transport payloads, foreign
/// error objects). `null` and empty values synthesise "Unknown error".
pub fn sanitize_value(value: &Value) -> SanitizedError {
    build(extract_message(value, 0))
}

/// Variant for log sinks: returns the user-facing record plus the fuller
/// (still redacted) technical text for operators.
pub fn sanitize_for_logging(raw: &str) -> (SanitizedError, String) {
    let sanitized = sanitize_message(raw);
    let full = redact(raw);
    (sanitized, full)
}

/// Pull a human-meaningful message out of a nested value.
///
/// Prefers `message`/`error` fields at each level; otherwise stringifies
/// with a depth bound so pathological nesting cannot run away.
fn extract_message(value: &Value, depth: usize) -> Option<String> {
    if depth >= MAX_EXTRACTION_DEPTH {
        return Some("[nested error]".to_owned());
    }
    match value {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_owned())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => {
            for key in ["message", "error", "errmsg", "reason", "cause"] {
                if let Some(inner) = map.get(key) {
                    if let Some(found) = extract_message(inner, depth + 1) {
                        return Some(found);
                    }
                }
            }
            (!map.is_empty()).then(|| stringify_bounded(value, depth))
        }
        Value::Array(items) => items.iter().find_map(|item| extract_message(item, depth + 1)),
    }
}

/// Depth-limited stringification for objects without a message field.
fn stringify_bounded(value: &Value, depth: usize) -> String {
    if depth >= MAX_EXTRACTION_DEPTH {
        return "...".to_owned();
    }
    match value {
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .take(16)
                .map(|(k, v)| format!("{k}: {}", stringify_bounded(v, depth + 1)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
        Value::Array(items) => {
            let inner: Vec<String> = items
                .iter()
                .take(16)
                .map(|v| stringify_bounded(v, depth + 1))
                .collect();
            format!("[{}]", inner.join(", "))
        }
        other => other.to_string(),
    }
}

fn build(extracted: Option<String>) -> SanitizedError {
    let Some(raw) = extracted else {
        return SanitizedError {
            code: ErrorCode::UnknownError,
            category: ErrorCategory::Unknown,
            message: "Unknown error".to_owned(),
            user_message: ErrorCode::UnknownError.user_message().to_owned(),
            timestamp: Utc::now(),
            request_id: None,
        };
    };

    let category = categorize(&raw);
    let code = refine(category, &raw);
    let message = redact(&raw);
    let user_message = choose_user_message(code, category, &message);

    SanitizedError {
        code,
        category,
        message,
        user_message,
        timestamp: Utc::now(),
        request_id: None,
    }
}

/// Validation messages are often written for end users; pass them through
/// when they are short, fully scrubbed, and free of technical vocabulary.
fn choose_user_message(code: ErrorCode, category: ErrorCategory, redacted: &str) -> String {
    if category == ErrorCategory::Validation
        && redacted.len() <= VALIDATION_PASSTHROUGH_MAX
        && !contains_sensitive(redacted)
        && !patterns::TECHNICAL_TERMS.is_match(redacted)
    {
        return redacted.to_owned();
    }
    code.user_message().to_owned()
}
