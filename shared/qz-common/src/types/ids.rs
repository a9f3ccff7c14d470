//! Opaque Identifier Newtypes
//!
//! All ids travel as plain strings on the wire; the newtypes keep them from
//! being mixed up in signatures.

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap an existing string id.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the underlying string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id! {
    /// Identifies one live quiz session.
    SessionId
}

string_id! {
    /// Identifies one quiz-taker within a session.
    ParticipantId
}

string_id! {
    /// Identifies a question inside a quiz.
    QuestionId
}

string_id! {
    /// Identifies a single submitted answer.
    AnswerId
}

string_id! {
    /// Identifies an authored quiz.
    QuizId
}

string_id! {
    /// Short human join code mapping to a session.
    JoinCode
}
