//! Answer Buffer Cache Operations
//!
//! Submitted answers are prepended to a per-session list (cheap append,
//! FIFO drain from the tail) and mirrored into a hash keyed by answer id so
//! late scoring can find one submission without scanning the list.

use qz_common::{Answer, AnswerId, SessionId};

use super::{keys, CacheError, CacheFacade};

impl CacheFacade {
    /// Buffer one answer: prepend to the list and index by answer id.
    pub async fn buffer_answer(&self, answer: &Answer) -> Result<(), CacheError> {
        let json = serde_json::to_string(answer)?;
        self.list_push(
            "buffer_answer",
            &keys::answers_buffer(&answer.session_id),
            &json,
            Some(keys::ANSWER_BUFFER_TTL),
        )
        .await?;
        self.hash_set(
            "buffer_answer",
            &keys::answers_hash(&answer.session_id),
            answer.answer_id.as_str(),
            &json,
            Some(keys::ANSWER_BUFFER_TTL),
        )
        .await
    }

    /// O(1) lookup of one buffered answer by id.
    pub async fn get_buffered_answer(
        &self,
        session: &SessionId,
        answer_id: &AnswerId,
    ) -> Result<Option<Answer>, CacheError> {
        let raw = self
            .hash_get(
                "get_buffered_answer",
                &keys::answers_hash(session),
                answer_id.as_str(),
            )
            .await?;
        raw.map(|json| serde_json::from_str(&json).map_err(CacheError::from))
            .transpose()
    }

    /// Number of answers currently buffered for a session.
    pub async fn buffered_answer_count(&self, session: &SessionId) -> Result<i64, CacheError> {
        self.list_len("buffered_answer_count", &keys::answers_buffer(session)).await
    }

    /// Return all buffered answers in submission order and clear the buffer.
    ///
    /// Undecodable entries are skipped rather than wedging the flush.
    pub async fn flush_answer_buffer(
        &self,
        session: &SessionId,
    ) -> Result<Vec<Answer>, CacheError> {
        let raw = self
            .list_range("flush_answer_buffer", &keys::answers_buffer(session), 0, -1)
            .await?;
        self.kv_del("flush_answer_buffer", &keys::answers_buffer(session)).await?;
        self.kv_del("flush_answer_buffer", &keys::answers_hash(session)).await?;

        // The list is newest-first; reverse into submission order.
        let mut answers: Vec<Answer> = raw
            .into_iter()
            .filter_map(|json| {
                serde_json::from_str(&json)
                    .map_err(|e| {
                        tracing::warn!(error = %e, "Skipping undecodable buffered answer");
                    })
                    .ok()
            })
            .collect();
        answers.reverse();
        Ok(answers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertSink;
    use crate::cache::testutil::DownDriver;
    use qz_common::{ParticipantId, QuestionId};
    use std::sync::Arc;
    use std::time::Duration;

    fn degraded_facade() -> CacheFacade {
        CacheFacade::new(
            Arc::new(DownDriver),
            Arc::new(AlertSink::new()),
            Duration::from_secs(30),
        )
    }

    fn answer(id: &str, response_time_ms: u64) -> Answer {
        Answer::new(
            AnswerId::new(id),
            SessionId::new("s1"),
            ParticipantId::new("p1"),
            QuestionId::new("q1"),
            vec!["a".into()],
            response_time_ms,
        )
    }

    #[tokio::test]
    async fn buffered_answers_flush_in_submission_order() {
        let facade = degraded_facade();
        let session = SessionId::new("s1");
        for i in 1..=3 {
            facade.buffer_answer(&answer(&format!("a{i}"), i * 100)).await.unwrap();
        }
        assert_eq!(facade.buffered_answer_count(&session).await.unwrap(), 3);

        let flushed = facade.flush_answer_buffer(&session).await.unwrap();
        let ids: Vec<&str> = flushed.iter().map(|a| a.answer_id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2", "a3"]);

        // Flush clears both the list and the hash.
        assert_eq!(facade.buffered_answer_count(&session).await.unwrap(), 0);
        assert!(facade
            .get_buffered_answer(&session, &AnswerId::new("a1"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn hash_lookup_finds_one_answer() {
        let facade = degraded_facade();
        let session = SessionId::new("s1");
        facade.buffer_answer(&answer("a1", 100)).await.unwrap();
        facade.buffer_answer(&answer("a2", 200)).await.unwrap();

        let found = facade
            .get_buffered_answer(&session, &AnswerId::new("a2"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.response_time_ms, 200);
    }

    #[tokio::test]
    async fn empty_buffer_flushes_empty() {
        let facade = degraded_facade();
        let flushed = facade
            .flush_answer_buffer(&SessionId::new("empty"))
            .await
            .unwrap();
        assert!(flushed.is_empty());
    }
}
