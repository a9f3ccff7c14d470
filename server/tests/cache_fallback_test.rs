//! Cache facade degraded-mode behaviour across the typed surfaces.

mod helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use helpers::TestStack;
use qz_common::{JoinCode, ParticipantId, QuestionId, QuizId, SessionId, SessionState};
use qz_server::alerts::Alert;

#[tokio::test]
async fn writes_issued_in_fallback_mode_are_never_lost() {
    let stack = TestStack::new();
    stack.cache_switch.store(true, Ordering::SeqCst);

    let state = SessionState::new_lobby(SessionId::new("s1"), QuizId::new("quiz-1"));
    stack.cache.set_session_state(&state).await.unwrap();
    stack
        .cache
        .set_join_code(&JoinCode::new("ABC234"), &SessionId::new("s1"))
        .await
        .unwrap();
    stack
        .cache
        .leaderboard_update(&SessionId::new("s1"), &ParticipantId::new("p1"), 100, 1_000)
        .await
        .unwrap();

    assert!(stack.cache.fallback_mode());
    assert!(stack
        .cache
        .get_session_state(&SessionId::new("s1"))
        .await
        .unwrap()
        .is_some());
    assert_eq!(
        stack
            .cache
            .get_join_code(&JoinCode::new("ABC234"))
            .await
            .unwrap(),
        Some(SessionId::new("s1"))
    );
    assert_eq!(
        stack
            .cache
            .leaderboard_rank(&SessionId::new("s1"), &ParticipantId::new("p1"))
            .await
            .unwrap(),
        Some(1)
    );
}

#[tokio::test]
async fn rate_limits_keep_holding_in_fallback_mode() {
    let stack = TestStack::new();
    stack.cache_switch.store(true, Ordering::SeqCst);

    for _ in 0..5 {
        assert!(stack.cache.check_join_rate("198.51.100.7").await.unwrap());
    }
    assert!(!stack.cache.check_join_rate("198.51.100.7").await.unwrap());

    let p = ParticipantId::new("p1");
    let q = QuestionId::new("q1");
    assert!(stack.cache.check_answer_once(&p, &q).await.unwrap());
    assert!(!stack.cache.check_answer_once(&p, &q).await.unwrap());
    assert!(stack.cache.has_answered(&p, &q).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn degraded_and_recovered_alerts_fire() {
    let stack = TestStack::new();
    let events = Arc::new(AtomicUsize::new(0));
    {
        let events = Arc::clone(&events);
        stack.alerts.subscribe(move |alert| match alert {
            Alert::CacheDegraded { .. } => {
                events.fetch_add(1, Ordering::SeqCst);
            }
            Alert::CacheRecovered { .. } => {
                events.fetch_add(100, Ordering::SeqCst);
            }
            _ => {}
        });
    }

    stack.cache_switch.store(true, Ordering::SeqCst);
    stack.cache.kv_set("t", "k", "v", None).await.unwrap();
    assert_eq!(events.load(Ordering::SeqCst), 1);

    // Heal; once the probe window elapses the next operation recovers.
    stack.cache_switch.store(false, Ordering::SeqCst);
    tokio::time::advance(Duration::from_secs(31)).await;
    stack.cache.kv_get("t", "k").await.unwrap();
    assert_eq!(events.load(Ordering::SeqCst), 101);
}

#[tokio::test(start_paused = true)]
async fn facade_recovers_after_probe_interval() {
    let stack = TestStack::new();

    stack.cache_switch.store(true, Ordering::SeqCst);
    stack.cache.kv_set("t", "k", "v", None).await.unwrap();
    assert!(stack.cache.fallback_mode());

    stack.cache_switch.store(false, Ordering::SeqCst);
    tokio::time::advance(Duration::from_secs(31)).await;
    stack.cache.kv_get("t", "k").await.unwrap();
    assert!(!stack.cache.fallback_mode());
}

#[tokio::test(start_paused = true)]
async fn expired_fallback_entries_are_not_served() {
    let stack = TestStack::new();
    stack.cache_switch.store(true, Ordering::SeqCst);

    // Participant entries carry a 5 minute TTL.
    let participant = qz_common::ParticipantSession::new(
        ParticipantId::new("p1"),
        SessionId::new("s1"),
        "Nick",
    );
    stack.cache.set_participant(&participant).await.unwrap();
    assert!(stack
        .cache
        .get_participant(&ParticipantId::new("p1"))
        .await
        .unwrap()
        .is_some());

    tokio::time::advance(Duration::from_secs(6 * 60)).await;
    assert!(stack
        .cache
        .get_participant(&ParticipantId::new("p1"))
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        stack
            .cache
            .participant_ttl(&ParticipantId::new("p1"))
            .await
            .unwrap(),
        -2
    );
}
