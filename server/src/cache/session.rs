//! Session State Cache Operations

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use qz_common::{QuestionId, SessionId, SessionState};

use super::{keys, CacheError, CacheFacade};

/// Partial update to a cached session state.
///
/// `Option<Option<_>>` fields distinguish "leave untouched" (`None`) from
/// "clear" (`Some(None)`).
#[derive(Debug, Default, Clone)]
pub struct SessionStatePatch {
    pub phase: Option<qz_common::SessionPhase>,
    pub current_question_index: Option<u32>,
    pub current_question_id: Option<Option<QuestionId>>,
    pub current_question_start: Option<Option<DateTime<Utc>>>,
    pub timer_end: Option<Option<DateTime<Utc>>>,
    pub participant_count: Option<u32>,
    pub voided_questions: Option<HashSet<QuestionId>>,
}

impl CacheFacade {
    /// Read a session's cached state.
    pub async fn get_session_state(
        &self,
        id: &SessionId,
    ) -> Result<Option<SessionState>, CacheError> {
        let raw = self.kv_get("get_session_state", &keys::session_state(id)).await?;
        raw.map(|json| serde_json::from_str(&json).map_err(CacheError::from))
            .transpose()
    }

    /// Write a session's full state with the session TTL.
    pub async fn set_session_state(&self, state: &SessionState) -> Result<(), CacheError> {
        let json = serde_json::to_string(state)?;
        self.kv_set(
            "set_session_state",
            &keys::session_state(&state.session_id),
            &json,
            Some(keys::SESSION_STATE_TTL),
        )
        .await
    }

    /// Apply a partial update and refresh the TTL.
    ///
    /// Phase changes are validated against the monotonic progression;
    /// an illegal jump rejects the whole patch. Returns the updated state,
    /// or `None` when the session is not cached.
    pub async fn update_session_state(
        &self,
        id: &SessionId,
        patch: SessionStatePatch,
    ) -> Result<Option<SessionState>, CacheError> {
        let Some(mut state) = self.get_session_state(id).await? else {
            return Ok(None);
        };

        if let Some(next_phase) = patch.phase {
            if next_phase != state.phase && !state.phase.can_transition_to(next_phase) {
                return Err(CacheError::InvalidUpdate(format!(
                    "illegal phase transition {:?} -> {:?}",
                    state.phase, next_phase
                )));
            }
            state.phase = next_phase;
        }
        if let Some(index) = patch.current_question_index {
            state.current_question_index = index;
        }
        if let Some(question_id) = patch.current_question_id {
            state.current_question_id = question_id;
        }
        if let Some(start) = patch.current_question_start {
            state.current_question_start = start;
        }
        if let Some(timer_end) = patch.timer_end {
            state.timer_end = timer_end;
        }
        if let Some(count) = patch.participant_count {
            state.participant_count = count;
        }
        if let Some(voided) = patch.voided_questions {
            state.voided_questions = voided;
        }

        self.set_session_state(&state).await?;
        Ok(Some(state))
    }

    /// Remove a session's cached state.
    pub async fn delete_session_state(&self, id: &SessionId) -> Result<(), CacheError> {
        self.kv_del("delete_session_state", &keys::session_state(id)).await
    }
}
