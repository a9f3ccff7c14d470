//! Quizdeck Common Library
//!
//! Shared types, error codes, and protocol structures used across the quiz
//! backend core.

pub mod error;
pub mod protocol;
pub mod types;

pub use error::{ErrorCategory, ErrorCode, ErrorResponse};
pub use types::*;
