//! Rate-Limit Cache Operations
//!
//! Two limits guard the join and answer paths: a windowed per-IP join
//! counter and a per-(participant, question) idempotency marker that makes
//! duplicate answer submissions visible before they reach scoring.

use qz_common::{ParticipantId, QuestionId};

use super::{keys, CacheError, CacheFacade};

impl CacheFacade {
    /// Count one join attempt from `ip`. Returns `true` while the attempt is
    /// within the window cap.
    pub async fn check_join_rate(&self, ip: &str) -> Result<bool, CacheError> {
        let count = self
            .kv_incr_window(
                "check_join_rate",
                &keys::ratelimit_join(ip),
                keys::JOIN_RATE_WINDOW,
            )
            .await?;
        Ok(count <= keys::JOIN_RATE_CAP)
    }

    /// First-submission check for (participant, question). Returns `true`
    /// exactly once per marker TTL; later calls see the marker and fail.
    pub async fn check_answer_once(
        &self,
        participant: &ParticipantId,
        question: &QuestionId,
    ) -> Result<bool, CacheError> {
        self.kv_set_nx(
            "check_answer_once",
            &keys::ratelimit_answer(participant, question),
            "1",
            keys::ANSWER_MARKER_TTL,
        )
        .await
    }

    /// Non-mutating probe of the idempotency marker.
    pub async fn has_answered(
        &self,
        participant: &ParticipantId,
        question: &QuestionId,
    ) -> Result<bool, CacheError> {
        self.kv_exists(
            "has_answered",
            &keys::ratelimit_answer(participant, question),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertSink;
    use crate::cache::testutil::{DownDriver, FlakyDriver};
    use std::sync::Arc;
    use std::time::Duration;

    fn degraded_facade() -> CacheFacade {
        CacheFacade::new(
            Arc::new(DownDriver),
            Arc::new(AlertSink::new()),
            Duration::from_secs(30),
        )
    }

    fn live_facade() -> CacheFacade {
        CacheFacade::new(
            Arc::new(FlakyDriver::new()),
            Arc::new(AlertSink::new()),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn join_rate_allows_five_then_blocks() {
        for facade in [live_facade(), degraded_facade()] {
            for _ in 0..5 {
                assert!(facade.check_join_rate("203.0.113.9").await.unwrap());
            }
            assert!(!facade.check_join_rate("203.0.113.9").await.unwrap());
            // A different IP has its own window.
            assert!(facade.check_join_rate("203.0.113.10").await.unwrap());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn join_window_resets_after_a_minute() {
        let facade = degraded_facade();
        for _ in 0..6 {
            facade.check_join_rate("ip").await.unwrap();
        }
        assert!(!facade.check_join_rate("ip").await.unwrap());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(facade.check_join_rate("ip").await.unwrap());
    }

    #[tokio::test]
    async fn answer_marker_fires_once() {
        for facade in [live_facade(), degraded_facade()] {
            let p = ParticipantId::new("p1");
            let q = QuestionId::new("q1");

            assert!(!facade.has_answered(&p, &q).await.unwrap());
            assert!(facade.check_answer_once(&p, &q).await.unwrap());
            assert!(!facade.check_answer_once(&p, &q).await.unwrap());
            assert!(facade.has_answered(&p, &q).await.unwrap());

            // A different question is independent.
            assert!(facade
                .check_answer_once(&p, &QuestionId::new("q2"))
                .await
                .unwrap());
        }
    }
}
