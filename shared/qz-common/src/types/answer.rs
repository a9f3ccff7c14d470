//! Answer Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AnswerId, ParticipantId, QuestionId, SessionId};

/// One submitted answer, written append-only to the durable store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub answer_id: AnswerId,
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    pub question_id: QuestionId,
    /// Selected option ids; empty for free-text/numeric questions.
    #[serde(default)]
    pub selected_options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_answer: Option<f64>,
    pub submitted_at: DateTime<Utc>,
    /// Milliseconds between question start and submission.
    pub response_time_ms: u64,
    /// Scoring outcome; absent until the answer is scored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points_awarded: Option<i64>,
    /// Streak the participant held when this answer was scored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streak_at_scoring: Option<u32>,
}

impl Answer {
    /// An unscored submission.
    pub fn new(
        answer_id: AnswerId,
        session_id: SessionId,
        participant_id: ParticipantId,
        question_id: QuestionId,
        selected_options: Vec<String>,
        response_time_ms: u64,
    ) -> Self {
        Self {
            answer_id,
            session_id,
            participant_id,
            question_id,
            selected_options,
            text_answer: None,
            numeric_answer: None,
            submitted_at: Utc::now(),
            response_time_ms,
            is_correct: None,
            points_awarded: None,
            streak_at_scoring: None,
        }
    }
}
