//! Session Recovery
//!
//! Rehydrates a participant's view of their session after a disconnect,
//! reading from whichever of the cache and the durable store is healthy and
//! re-seeding the cache on the way. Reconnection is bounded: a participant
//! whose cache entry lapsed and whose durable record is past the grace
//! period is rejected with `SessionExpired`.

use std::sync::Arc;
use std::time::Duration;

use bson::doc;
use chrono::Utc;
use qz_common::protocol::{RecoveryFailureReason, RecoveryOutcome, SessionSnapshot};
use qz_common::{
    LeaderboardRow, ParticipantId, ParticipantSession, Question, QuestionId, QuestionView,
    SessionId, SessionPhase, SessionState,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{CacheError, CacheFacade, ParticipantPatch};
use crate::observability::PerfMonitor;
use crate::store::{StoreError, StoreFacade};

/// How long after their last connection a participant may still rejoin once
/// their cache entry has lapsed.
const RECONNECT_GRACE: Duration = Duration::from_secs(5 * 60);

/// Leaderboard rows returned with a recovery snapshot.
const LEADERBOARD_TOP_N: usize = 10;

/// Infrastructure failures during recovery. Policy rejections travel inside
/// [`RecoveryOutcome`] instead.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("malformed stored document: {0}")]
    Malformed(String),
}

/// Quiz document shape, as far as recovery needs it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuizDoc {
    #[serde(default)]
    questions: Vec<Question>,
}

/// Participant session rehydration across the cache and the durable store.
pub struct SessionRecoveryService {
    cache: Arc<CacheFacade>,
    store: Arc<StoreFacade>,
    perf: Arc<PerfMonitor>,
}

impl SessionRecoveryService {
    pub fn new(cache: Arc<CacheFacade>, store: Arc<StoreFacade>, perf: Arc<PerfMonitor>) -> Self {
        Self { cache, store, perf }
    }

    /// Full recovery: verify the session and participant, restore the
    /// active flag, and assemble the snapshot the transport replays to the
    /// client.
    #[tracing::instrument(skip(self), fields(participant = %participant_id, session = %session_id))]
    pub async fn recover_session(
        &self,
        participant_id: &ParticipantId,
        session_id: &SessionId,
        last_known_question_id: Option<&QuestionId>,
    ) -> Result<RecoveryOutcome, RecoveryError> {
        self.perf
            .measure("session_recovery.recover", async {
                self.recover_inner(participant_id, session_id, last_known_question_id)
                    .await
            })
            .await
    }

    async fn recover_inner(
        &self,
        participant_id: &ParticipantId,
        session_id: &SessionId,
        last_known_question_id: Option<&QuestionId>,
    ) -> Result<RecoveryOutcome, RecoveryError> {
        // Step 1: the session itself.
        let state = match self.load_session(session_id).await? {
            Ok(state) => state,
            Err(reason) => return Ok(RecoveryOutcome::failure(reason)),
        };

        // Step 2: the participant.
        let participant = match self.load_participant(participant_id).await? {
            Ok(participant) => participant,
            Err(reason) => return Ok(RecoveryOutcome::failure(reason)),
        };

        // Step 3: restore the active flag and refresh the cache TTL; the
        // durable copy is best-effort.
        let now = Utc::now();
        let participant = self
            .cache
            .update_participant(
                participant_id,
                ParticipantPatch {
                    is_active: Some(true),
                    last_connected_at: Some(now),
                    ..Default::default()
                },
            )
            .await?
            .unwrap_or(participant);
        if let Err(e) = self
            .store
            .update_one(
                "participants",
                doc! { "participantId": participant_id.as_str() },
                doc! { "$set": { "isActive": true, "lastConnectedAt": now.to_rfc3339() } },
                false,
            )
            .await
        {
            debug!(error = %e, "Best-effort durable active-flag update failed");
        }

        // Step 4: the live question, stripped of answer keys.
        let (current_question, remaining_seconds) =
            if state.phase == SessionPhase::ActiveQuestion {
                let question = self.load_current_question(&state).await?;
                if let (Some(question), Some(last_known)) = (&question, last_known_question_id) {
                    if &question.question_id != last_known {
                        debug!(
                            last_known = %last_known,
                            current = %question.question_id,
                            "Client reconnected on a stale question"
                        );
                    }
                }
                (question, state.remaining_seconds(Utc::now()))
            } else {
                (None, None)
            };

        // Step 5: score, rank, and the enriched leaderboard head.
        let rank = self.cache.leaderboard_rank(session_id, participant_id).await?;
        let leaderboard = self.top_rows(session_id).await?;

        Ok(RecoveryOutcome::Success(Box::new(SessionSnapshot {
            session_id: session_id.clone(),
            participant_id: participant_id.clone(),
            phase: state.phase,
            current_question,
            remaining_seconds,
            total_score: participant.total_score,
            streak_count: participant.streak_count,
            rank,
            leaderboard,
            is_spectator: participant.is_eliminated,
        })))
    }

    /// Pre-flight check: would a recovery attempt be accepted? Skips the
    /// restore and snapshot work. `None` means recovery would proceed.
    pub async fn can_recover(
        &self,
        participant_id: &ParticipantId,
        session_id: &SessionId,
    ) -> Result<Option<RecoveryFailureReason>, RecoveryError> {
        if let Err(reason) = self.load_session(session_id).await? {
            return Ok(Some(reason));
        }
        if let Err(reason) = self.load_participant(participant_id).await? {
            return Ok(Some(reason));
        }
        Ok(None)
    }

    /// Record the participant's new transport handle after a reconnect.
    pub async fn update_socket_id(
        &self,
        participant_id: &ParticipantId,
        socket_id: &str,
    ) -> Result<(), RecoveryError> {
        self.cache
            .update_participant(
                participant_id,
                ParticipantPatch {
                    socket_id: Some(Some(socket_id.to_owned())),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Session state from the cache, else the durable store (re-seeding the
    /// cache), else a rejection.
    async fn load_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Result<SessionState, RecoveryFailureReason>, RecoveryError> {
        let state = match self.cache.get_session_state(session_id).await? {
            Some(state) => state,
            None => {
                let Some(document) = self
                    .store
                    .find_one("sessions", doc! { "sessionId": session_id.as_str() })
                    .await?
                else {
                    return Ok(Err(RecoveryFailureReason::SessionNotFound));
                };
                let state: SessionState = bson::from_document(document)
                    .map_err(|e| RecoveryError::Malformed(e.to_string()))?;
                self.cache.set_session_state(&state).await?;
                state
            }
        };

        if state.phase == SessionPhase::Ended {
            return Ok(Err(RecoveryFailureReason::SessionEnded));
        }
        Ok(Ok(state))
    }

    /// Participant session from the cache, else the durable store with the
    /// grace-period check (re-seeding the cache as active).
    async fn load_participant(
        &self,
        participant_id: &ParticipantId,
    ) -> Result<Result<ParticipantSession, RecoveryFailureReason>, RecoveryError> {
        if let Some(participant) = self.cache.get_participant(participant_id).await? {
            if participant.is_banned {
                return Ok(Err(RecoveryFailureReason::ParticipantBanned));
            }
            return Ok(Ok(participant));
        }

        let Some(document) = self
            .store
            .find_one(
                "participants",
                doc! { "participantId": participant_id.as_str() },
            )
            .await?
        else {
            return Ok(Err(RecoveryFailureReason::ParticipantNotFound));
        };
        let mut participant: ParticipantSession = bson::from_document(document)
            .map_err(|e| RecoveryError::Malformed(e.to_string()))?;

        // The cache entry lapsing is the only path here; a stale durable
        // timestamp means the grace period is over.
        let age = Utc::now().signed_duration_since(participant.last_connected_at);
        if age.num_seconds() > RECONNECT_GRACE.as_secs() as i64 {
            return Ok(Err(RecoveryFailureReason::SessionExpired));
        }
        if participant.is_banned {
            return Ok(Err(RecoveryFailureReason::ParticipantBanned));
        }

        participant.is_active = true;
        self.cache.set_participant(&participant).await?;
        Ok(Ok(participant))
    }

    /// The session's current question with correctness stripped, if it can
    /// still be found.
    async fn load_current_question(
        &self,
        state: &SessionState,
    ) -> Result<Option<QuestionView>, RecoveryError> {
        let Some(question_id) = &state.current_question_id else {
            return Ok(None);
        };
        let Some(document) = self
            .store
            .find_one("quizzes", doc! { "quizId": state.quiz_id.as_str() })
            .await?
        else {
            warn!(quiz = %state.quiz_id, "Quiz document missing during recovery");
            return Ok(None);
        };
        let quiz: QuizDoc = bson::from_document(document)
            .map_err(|e| RecoveryError::Malformed(e.to_string()))?;
        Ok(quiz
            .questions
            .iter()
            .find(|q| &q.question_id == question_id)
            .map(QuestionView::from))
    }

    /// Leaderboard head enriched with nickname and totals from each
    /// participant's cache entry.
    async fn top_rows(&self, session_id: &SessionId) -> Result<Vec<LeaderboardRow>, RecoveryError> {
        let entries = self.cache.leaderboard_top(session_id, LEADERBOARD_TOP_N).await?;
        let mut rows = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let (nickname, total_score, total_time_ms) =
                match self.cache.get_participant(&entry.participant_id).await? {
                    Some(p) => (p.nickname, p.total_score, p.total_time_ms),
                    None => (entry.participant_id.to_string(), 0, 0),
                };
            rows.push(LeaderboardRow {
                rank: index as u32 + 1,
                participant_id: entry.participant_id.clone(),
                nickname,
                total_score,
                total_time_ms,
            });
        }
        Ok(rows)
    }
}
