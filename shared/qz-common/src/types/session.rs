//! Session State Types

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{QuestionId, QuizId, SessionId};

/// Coarse lifecycle phase of a quiz session.
///
/// Progression is monotonic: Lobby → ActiveQuestion ↔ Reveal → Ended, with
/// the ActiveQuestion/Reveal pair cycling once per question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Participants are joining; no question is live.
    Lobby,
    /// A question is live and accepting answers.
    ActiveQuestion,
    /// Answers are closed and results are shown.
    Reveal,
    /// The session is over.
    Ended,
}

impl SessionPhase {
    /// Whether moving from `self` to `next` is a legal phase transition.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Lobby, Self::ActiveQuestion)
                | (Self::ActiveQuestion, Self::Reveal)
                | (Self::Reveal, Self::ActiveQuestion)
                | (Self::Lobby | Self::ActiveQuestion | Self::Reveal, Self::Ended)
        )
    }
}

/// Cached state of one live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: SessionId,
    /// The authored quiz this session runs.
    pub quiz_id: QuizId,
    pub phase: SessionPhase,
    /// Zero-based index of the current question within the quiz.
    pub current_question_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_question_id: Option<QuestionId>,
    /// When the current question went live (millisecond epoch).
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub current_question_start: Option<DateTime<Utc>>,
    /// When the current question's timer expires (millisecond epoch).
    /// Non-null only while `phase` is `ActiveQuestion`.
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub timer_end: Option<DateTime<Utc>>,
    pub participant_count: u32,
    /// Questions voided by the host; answers to these never score.
    #[serde(default)]
    pub voided_questions: HashSet<QuestionId>,
    /// Whether this session eliminates participants on wrong answers.
    #[serde(default)]
    pub elimination_mode: bool,
}

impl SessionState {
    /// Fresh lobby state for a newly opened session.
    pub fn new_lobby(session_id: SessionId, quiz_id: QuizId) -> Self {
        Self {
            session_id,
            quiz_id,
            phase: SessionPhase::Lobby,
            current_question_index: 0,
            current_question_id: None,
            current_question_start: None,
            timer_end: None,
            participant_count: 0,
            voided_questions: HashSet::new(),
            elimination_mode: false,
        }
    }

    /// Remaining whole seconds on the question timer, if one is running.
    ///
    /// Rounds up so a participant reconnecting with 900 ms left still sees
    /// one second on the clock. Never negative.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> Option<u32> {
        if self.phase != SessionPhase::ActiveQuestion {
            return None;
        }
        let end = self.timer_end?;
        let remaining_ms = (end - now).num_milliseconds().max(0) as u64;
        Some(remaining_ms.div_ceil(1000) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn phase_progression_is_monotonic() {
        use SessionPhase::*;
        assert!(Lobby.can_transition_to(ActiveQuestion));
        assert!(ActiveQuestion.can_transition_to(Reveal));
        assert!(Reveal.can_transition_to(ActiveQuestion));
        assert!(Reveal.can_transition_to(Ended));
        assert!(Lobby.can_transition_to(Ended));

        assert!(!ActiveQuestion.can_transition_to(Lobby));
        assert!(!Reveal.can_transition_to(Lobby));
        assert!(!Ended.can_transition_to(Lobby));
        assert!(!Ended.can_transition_to(ActiveQuestion));
        assert!(!Lobby.can_transition_to(Reveal));
    }

    #[test]
    fn remaining_seconds_rounds_up_and_clamps() {
        let now = Utc::now();
        let mut state = SessionState::new_lobby(SessionId::new("s1"), QuizId::new("q1"));
        state.phase = SessionPhase::ActiveQuestion;

        state.timer_end = Some(now + Duration::milliseconds(900));
        assert_eq!(state.remaining_seconds(now), Some(1));

        state.timer_end = Some(now + Duration::milliseconds(4001));
        assert_eq!(state.remaining_seconds(now), Some(5));

        state.timer_end = Some(now - Duration::seconds(3));
        assert_eq!(state.remaining_seconds(now), Some(0));
    }

    #[test]
    fn remaining_seconds_is_none_outside_active_question() {
        let now = Utc::now();
        let mut state = SessionState::new_lobby(SessionId::new("s1"), QuizId::new("q1"));
        state.timer_end = Some(now + Duration::seconds(10));
        assert_eq!(state.remaining_seconds(now), None);
        state.phase = SessionPhase::Reveal;
        assert_eq!(state.remaining_seconds(now), None);
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = SessionState::new_lobby(SessionId::new("s1"), QuizId::new("q1"));
        state.phase = SessionPhase::ActiveQuestion;
        state.current_question_id = Some(QuestionId::new("qq1"));
        state.timer_end = Some(Utc::now());
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"phase\":\"active_question\""));
        let back: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_id, state.session_id);
        assert_eq!(back.phase, SessionPhase::ActiveQuestion);
    }
}
