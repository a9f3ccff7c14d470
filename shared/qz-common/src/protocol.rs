//! Recovery Protocol Types
//!
//! Typed results exchanged between the session-recovery service and the
//! realtime transport when a participant reconnects.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::types::{
    LeaderboardRow, ParticipantId, QuestionView, SessionId, SessionPhase,
};

/// Why a reconnection attempt was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryFailureReason {
    SessionNotFound,
    SessionEnded,
    ParticipantNotFound,
    ParticipantBanned,
    /// The participant's cached session lapsed and their durable record is
    /// past the reconnection grace period.
    SessionExpired,
}

impl RecoveryFailureReason {
    /// The stable error code surfaced to the client for this reason.
    pub const fn error_code(self) -> ErrorCode {
        match self {
            Self::SessionNotFound | Self::ParticipantNotFound => ErrorCode::NotFound,
            Self::SessionEnded | Self::SessionExpired => ErrorCode::SessionExpired,
            Self::ParticipantBanned => ErrorCode::Forbidden,
        }
    }

    /// User-facing rejection message.
    pub const fn message(self) -> &'static str {
        match self {
            Self::SessionNotFound => "That session could not be found.",
            Self::SessionEnded => "This session has already ended.",
            Self::ParticipantNotFound => "You are not part of this session.",
            Self::ParticipantBanned => "You have been removed from this session.",
            Self::SessionExpired => "Your session has expired. Please rejoin with the join code.",
        }
    }
}

/// Full view of a participant's session, returned on successful recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    pub phase: SessionPhase,
    /// The live question without answer keys; present only while the phase
    /// is `ActiveQuestion`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_question: Option<QuestionView>,
    /// Whole seconds left on the question timer, when one is running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<u32>,
    pub total_score: i64,
    pub streak_count: u32,
    /// 1-based leaderboard rank, when the participant has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    /// Top of the leaderboard, enriched for display.
    pub leaderboard: Vec<LeaderboardRow>,
    /// Eliminated participants rejoin as spectators.
    pub is_spectator: bool,
}

/// Outcome of a recovery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    Success(Box<SessionSnapshot>),
    Failure {
        reason: RecoveryFailureReason,
        code: ErrorCode,
        message: String,
    },
}

impl RecoveryOutcome {
    /// Build the failure arm with its mapped code and message.
    pub fn failure(reason: RecoveryFailureReason) -> Self {
        Self::Failure {
            reason,
            code: reason.error_code(),
            message: reason.message().to_owned(),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}
