//! Cache Key Layout and TTLs
//!
//! Single source of truth for every key the backend writes into the cache.

use std::time::Duration;

use qz_common::{JoinCode, ParticipantId, QuestionId, SessionId};

pub const SESSION_STATE_TTL: Duration = Duration::from_secs(6 * 60 * 60);
pub const PARTICIPANT_TTL: Duration = Duration::from_secs(5 * 60);
pub const LEADERBOARD_TTL: Duration = Duration::from_secs(6 * 60 * 60);
pub const ANSWER_BUFFER_TTL: Duration = Duration::from_secs(60 * 60);
pub const JOIN_CODE_TTL: Duration = Duration::from_secs(6 * 60 * 60);
pub const JOIN_RATE_WINDOW: Duration = Duration::from_secs(60);
pub const ANSWER_MARKER_TTL: Duration = Duration::from_secs(5 * 60);
pub const STORE_UNAVAILABLE_TTL: Duration = Duration::from_secs(5 * 60);
pub const FALLBACK_SNAPSHOT_TTL: Duration = Duration::from_secs(60 * 60);

/// Joins allowed per source IP inside one [`JOIN_RATE_WINDOW`].
pub const JOIN_RATE_CAP: i64 = 5;

pub fn session_state(id: &SessionId) -> String {
    format!("session:{id}:state")
}

pub fn participant_session(id: &ParticipantId) -> String {
    format!("participant:{id}:session")
}

pub fn leaderboard(id: &SessionId) -> String {
    format!("session:{id}:leaderboard")
}

pub fn answers_buffer(id: &SessionId) -> String {
    format!("session:{id}:answers:buffer")
}

pub fn answers_hash(id: &SessionId) -> String {
    format!("session:{id}:answers:hash")
}

pub fn join_code(code: &JoinCode) -> String {
    format!("joincode:{code}")
}

pub fn ratelimit_join(ip: &str) -> String {
    format!("ratelimit:join:{ip}")
}

pub fn ratelimit_answer(participant: &ParticipantId, question: &QuestionId) -> String {
    format!("ratelimit:answer:{participant}:{question}")
}

pub fn store_unavailable() -> String {
    "mongodb:unavailable".to_owned()
}

pub fn pending_writes() -> String {
    "fallback:mongodb:pending".to_owned()
}

pub fn fallback_snapshot(collection: &str, document_id: &str) -> String {
    format!("fallback:mongodb:{collection}:{document_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shapes_are_stable() {
        assert_eq!(
            session_state(&SessionId::new("s1")),
            "session:s1:state"
        );
        assert_eq!(
            participant_session(&ParticipantId::new("p1")),
            "participant:p1:session"
        );
        assert_eq!(
            ratelimit_answer(&ParticipantId::new("p1"), &QuestionId::new("q1")),
            "ratelimit:answer:p1:q1"
        );
        assert_eq!(fallback_snapshot("test", "doc-1"), "fallback:mongodb:test:doc-1");
        assert_eq!(store_unavailable(), "mongodb:unavailable");
        assert_eq!(pending_writes(), "fallback:mongodb:pending");
    }
}
