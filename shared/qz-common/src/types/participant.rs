//! Participant Session Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ParticipantId, SessionId};

/// Per-participant state for one quiz session.
///
/// Cached with a short TTL that is refreshed on every write; the durable
/// store keeps the authoritative copy for reconnection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSession {
    pub participant_id: ParticipantId,
    pub session_id: SessionId,
    /// Display name, unique among live participants of the session.
    pub nickname: String,
    pub total_score: i64,
    /// Cumulative response time across scored answers, for tie-breaking.
    pub total_time_ms: u64,
    /// Consecutive correct answers.
    pub streak_count: u32,
    /// Whether a realtime transport is currently attached.
    pub is_active: bool,
    /// Eliminated participants spectate and may not answer in
    /// elimination-mode sessions.
    pub is_eliminated: bool,
    /// Banned participants may not rejoin.
    #[serde(default)]
    pub is_banned: bool,
    /// Last time a transport (re)connected for this participant.
    pub last_connected_at: DateTime<Utc>,
    /// Opaque transport handle for pushing events, when attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_id: Option<String>,
}

impl ParticipantSession {
    /// A freshly joined participant.
    pub fn new(
        participant_id: ParticipantId,
        session_id: SessionId,
        nickname: impl Into<String>,
    ) -> Self {
        Self {
            participant_id,
            session_id,
            nickname: nickname.into(),
            total_score: 0,
            total_time_ms: 0,
            streak_count: 0,
            is_active: true,
            is_eliminated: false,
            is_banned: false,
            last_connected_at: Utc::now(),
            socket_id: None,
        }
    }

    /// Whether this participant may submit answers.
    pub const fn can_answer(&self, elimination_mode: bool) -> bool {
        !(elimination_mode && self.is_eliminated)
    }
}
