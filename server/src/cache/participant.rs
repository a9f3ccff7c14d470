//! Participant Session Cache Operations
//!
//! Participant entries carry a short TTL refreshed on every write so that a
//! participant who vanishes without disconnecting ages out of the cache and
//! reconnection falls back to the durable store.

use chrono::{DateTime, Utc};
use qz_common::{ParticipantId, ParticipantSession};

use super::{keys, CacheError, CacheFacade};

/// Partial update to a cached participant session.
#[derive(Debug, Default, Clone)]
pub struct ParticipantPatch {
    pub total_score: Option<i64>,
    pub total_time_ms: Option<u64>,
    pub streak_count: Option<u32>,
    pub is_active: Option<bool>,
    pub is_eliminated: Option<bool>,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub socket_id: Option<Option<String>>,
}

impl CacheFacade {
    pub async fn get_participant(
        &self,
        id: &ParticipantId,
    ) -> Result<Option<ParticipantSession>, CacheError> {
        let raw = self
            .kv_get("get_participant", &keys::participant_session(id))
            .await?;
        raw.map(|json| serde_json::from_str(&json).map_err(CacheError::from))
            .transpose()
    }

    /// Write a participant session, refreshing the TTL.
    pub async fn set_participant(&self, session: &ParticipantSession) -> Result<(), CacheError> {
        let json = serde_json::to_string(session)?;
        self.kv_set(
            "set_participant",
            &keys::participant_session(&session.participant_id),
            &json,
            Some(keys::PARTICIPANT_TTL),
        )
        .await
    }

    /// Apply a partial update, refreshing the TTL. Returns the updated
    /// session, or `None` when the participant is not cached.
    pub async fn update_participant(
        &self,
        id: &ParticipantId,
        patch: ParticipantPatch,
    ) -> Result<Option<ParticipantSession>, CacheError> {
        let Some(mut session) = self.get_participant(id).await? else {
            return Ok(None);
        };

        if let Some(score) = patch.total_score {
            session.total_score = score;
        }
        if let Some(time) = patch.total_time_ms {
            session.total_time_ms = time;
        }
        if let Some(streak) = patch.streak_count {
            session.streak_count = streak;
        }
        if let Some(active) = patch.is_active {
            session.is_active = active;
        }
        if let Some(eliminated) = patch.is_eliminated {
            session.is_eliminated = eliminated;
        }
        if let Some(at) = patch.last_connected_at {
            session.last_connected_at = at;
        }
        if let Some(socket_id) = patch.socket_id {
            session.socket_id = socket_id;
        }

        self.set_participant(&session).await?;
        Ok(Some(session))
    }

    /// Re-arm the participant TTL without touching the payload.
    pub async fn refresh_participant_ttl(&self, id: &ParticipantId) -> Result<(), CacheError> {
        self.kv_expire(
            "refresh_participant_ttl",
            &keys::participant_session(id),
            keys::PARTICIPANT_TTL,
        )
        .await
    }

    pub async fn delete_participant(&self, id: &ParticipantId) -> Result<(), CacheError> {
        self.kv_del("delete_participant", &keys::participant_session(id)).await
    }

    /// Whether the participant has a transport attached right now.
    pub async fn is_participant_active(&self, id: &ParticipantId) -> Result<bool, CacheError> {
        Ok(self
            .get_participant(id)
            .await?
            .is_some_and(|session| session.is_active))
    }

    /// Remaining TTL in seconds; -2 when the entry is absent.
    pub async fn participant_ttl(&self, id: &ParticipantId) -> Result<i64, CacheError> {
        self.kv_ttl("participant_ttl", &keys::participant_session(id)).await
    }
}
