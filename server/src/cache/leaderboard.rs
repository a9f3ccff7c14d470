//! Leaderboard Cache Operations
//!
//! One sorted set per session keyed by participant id, scored with the
//! composite rank score so a single range read yields the display order.

use qz_common::{rank_score, LeaderboardEntry, ParticipantId, SessionId};

use super::{keys, CacheError, CacheFacade};

impl CacheFacade {
    /// Upsert a participant's composite score.
    pub async fn leaderboard_update(
        &self,
        session: &SessionId,
        participant: &ParticipantId,
        total_score: i64,
        total_time_ms: u64,
    ) -> Result<(), CacheError> {
        self.zset_add(
            "leaderboard_update",
            &keys::leaderboard(session),
            rank_score(total_score, total_time_ms),
            participant.as_str(),
            Some(keys::LEADERBOARD_TTL),
        )
        .await
    }

    /// Top `n` entries in descending rank order.
    pub async fn leaderboard_top(
        &self,
        session: &SessionId,
        n: usize,
    ) -> Result<Vec<LeaderboardEntry>, CacheError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let raw = self
            .zset_revrange(
                "leaderboard_top",
                &keys::leaderboard(session),
                0,
                n as i64 - 1,
            )
            .await?;
        Ok(raw
            .into_iter()
            .map(|(member, score)| LeaderboardEntry {
                participant_id: ParticipantId::new(member),
                rank_score: score,
            })
            .collect())
    }

    /// Every entry, descending.
    pub async fn leaderboard_full(
        &self,
        session: &SessionId,
    ) -> Result<Vec<LeaderboardEntry>, CacheError> {
        let raw = self
            .zset_revrange("leaderboard_full", &keys::leaderboard(session), 0, -1)
            .await?;
        Ok(raw
            .into_iter()
            .map(|(member, score)| LeaderboardEntry {
                participant_id: ParticipantId::new(member),
                rank_score: score,
            })
            .collect())
    }

    /// 1-based rank, or `None` when the participant has no entry.
    pub async fn leaderboard_rank(
        &self,
        session: &SessionId,
        participant: &ParticipantId,
    ) -> Result<Option<u32>, CacheError> {
        let rank = self
            .zset_revrank(
                "leaderboard_rank",
                &keys::leaderboard(session),
                participant.as_str(),
            )
            .await?;
        Ok(rank.map(|r| r as u32 + 1))
    }

    /// Remove one participant from the session's leaderboard.
    pub async fn leaderboard_remove(
        &self,
        session: &SessionId,
        participant: &ParticipantId,
    ) -> Result<(), CacheError> {
        self.zset_rem(
            "leaderboard_remove",
            &keys::leaderboard(session),
            participant.as_str(),
        )
        .await
    }

    /// Drop the whole leaderboard (session teardown).
    pub async fn leaderboard_delete(&self, session: &SessionId) -> Result<(), CacheError> {
        self.kv_del("leaderboard_delete", &keys::leaderboard(session)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertSink;
    use crate::cache::testutil::DownDriver;
    use std::sync::Arc;
    use std::time::Duration;

    fn degraded_facade() -> CacheFacade {
        CacheFacade::new(
            Arc::new(DownDriver),
            Arc::new(AlertSink::new()),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn higher_score_ranks_first() {
        let facade = degraded_facade();
        let session = SessionId::new("s1");
        facade
            .leaderboard_update(&session, &ParticipantId::new("alice"), 100, 4_000)
            .await
            .unwrap();
        facade
            .leaderboard_update(&session, &ParticipantId::new("bob"), 200, 9_000)
            .await
            .unwrap();

        let top = facade.leaderboard_top(&session, 10).await.unwrap();
        assert_eq!(top[0].participant_id.as_str(), "bob");
        assert_eq!(top[1].participant_id.as_str(), "alice");

        assert_eq!(
            facade
                .leaderboard_rank(&session, &ParticipantId::new("bob"))
                .await
                .unwrap(),
            Some(1)
        );
        assert_eq!(
            facade
                .leaderboard_rank(&session, &ParticipantId::new("alice"))
                .await
                .unwrap(),
            Some(2)
        );
    }

    #[tokio::test]
    async fn ties_break_toward_faster_time() {
        let facade = degraded_facade();
        let session = SessionId::new("s1");
        facade
            .leaderboard_update(&session, &ParticipantId::new("slow"), 100, 9_000)
            .await
            .unwrap();
        facade
            .leaderboard_update(&session, &ParticipantId::new("fast"), 100, 2_000)
            .await
            .unwrap();

        let top = facade.leaderboard_top(&session, 2).await.unwrap();
        assert_eq!(top[0].participant_id.as_str(), "fast");
        assert_eq!(top[1].participant_id.as_str(), "slow");
    }

    #[tokio::test]
    async fn updates_replace_previous_score() {
        let facade = degraded_facade();
        let session = SessionId::new("s1");
        let p = ParticipantId::new("alice");
        facade.leaderboard_update(&session, &p, 50, 1_000).await.unwrap();
        facade.leaderboard_update(&session, &p, 150, 3_000).await.unwrap();

        let full = facade.leaderboard_full(&session).await.unwrap();
        assert_eq!(full.len(), 1);
        assert!((full[0].rank_score - rank_score(150, 3_000)).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn absent_participant_has_no_rank() {
        let facade = degraded_facade();
        let session = SessionId::new("s1");
        assert_eq!(
            facade
                .leaderboard_rank(&session, &ParticipantId::new("ghost"))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn remove_and_delete_clear_entries() {
        let facade = degraded_facade();
        let session = SessionId::new("s1");
        facade
            .leaderboard_update(&session, &ParticipantId::new("alice"), 10, 0)
            .await
            .unwrap();
        facade
            .leaderboard_remove(&session, &ParticipantId::new("alice"))
            .await
            .unwrap();
        assert!(facade.leaderboard_full(&session).await.unwrap().is_empty());

        facade
            .leaderboard_update(&session, &ParticipantId::new("bob"), 10, 0)
            .await
            .unwrap();
        facade.leaderboard_delete(&session).await.unwrap();
        assert!(facade.leaderboard_full(&session).await.unwrap().is_empty());
    }
}
