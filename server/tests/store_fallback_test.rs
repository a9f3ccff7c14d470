//! Durable-store facade fallback behaviour with an open circuit.

mod helpers;

use std::sync::atomic::Ordering;

use bson::doc;
use helpers::TestStack;
use qz_server::breaker::BreakerState;
use qz_server::store::StoreError;

/// Fail writes until the breaker opens.
async fn open_breaker(stack: &TestStack) {
    stack.store_switch.store(true, Ordering::SeqCst);
    for i in 0..5 {
        let result = stack
            .facade
            .insert_one("test", doc! { "n": i })
            .await;
        assert!(result.is_err(), "insert should fail while the store is down");
    }
    assert_eq!(stack.facade.breaker().state(), BreakerState::Open);
    // Give the listener task a beat to raise the marker.
    tokio::task::yield_now().await;
}

#[tokio::test]
async fn outage_insert_goes_to_snapshot_and_queue() {
    let stack = TestStack::new();
    open_breaker(&stack).await;

    let outcome = stack
        .facade
        .insert_one("test", doc! { "_id": "new-doc", "name": "Doc" })
        .await
        .unwrap();
    assert_eq!(outcome.inserted_id, "new-doc");
    assert!(outcome.used_fallback);

    // The snapshot is readable through find_one while the circuit is open.
    let found = stack
        .facade
        .find_one("test", doc! { "documentId": "new-doc" })
        .await
        .unwrap()
        .expect("snapshot expected");
    assert_eq!(found.get_str("name").unwrap(), "Doc");

    // And the pending queue holds the envelope.
    assert_eq!(stack.pending.count().await.unwrap(), 1);
    let queued = stack.pending.list().await.unwrap();
    assert_eq!(queued[0].document_id, "new-doc");
    assert!(stack.pending.is_unavailable().await.unwrap());
}

#[tokio::test]
async fn outage_insert_without_id_synthesises_one() {
    let stack = TestStack::new();
    open_breaker(&stack).await;

    let outcome = stack
        .facade
        .insert_one("test", doc! { "name": "anon" })
        .await
        .unwrap();
    assert!(outcome.used_fallback);
    assert!(outcome.inserted_id.starts_with("fallback_"));

    let found = stack
        .facade
        .find_one("test", doc! { "documentId": &outcome.inserted_id })
        .await
        .unwrap()
        .expect("snapshot expected");
    assert_eq!(found.get_str("documentId").unwrap(), outcome.inserted_id);
}

#[tokio::test]
async fn outage_update_patches_snapshot_and_queues() {
    let stack = TestStack::new();
    open_breaker(&stack).await;

    stack
        .facade
        .insert_one("sessions", doc! { "documentId": "s1", "phase": "lobby" })
        .await
        .unwrap();
    let outcome = stack
        .facade
        .update_one(
            "sessions",
            doc! { "documentId": "s1" },
            doc! { "$set": { "phase": "ended" } },
            false,
        )
        .await
        .unwrap();
    assert!(outcome.used_fallback);
    assert_eq!(outcome.matched_count, 0);
    assert_eq!(outcome.modified_count, 0);

    // Reads during the outage observe the patched intent.
    let found = stack
        .facade
        .find_one("sessions", doc! { "documentId": "s1" })
        .await
        .unwrap()
        .expect("snapshot expected");
    assert_eq!(found.get_str("phase").unwrap(), "ended");

    assert_eq!(stack.pending.count().await.unwrap(), 2);
}

#[tokio::test]
async fn outage_update_without_id_is_rejected() {
    let stack = TestStack::new();
    open_breaker(&stack).await;

    let err = stack
        .facade
        .update_one(
            "sessions",
            doc! { "nickname": "x" },
            doc! { "$set": { "phase": "ended" } },
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::MissingId));
}

#[tokio::test]
async fn outage_reads_without_snapshot_return_empty_shapes() {
    let stack = TestStack::new();
    open_breaker(&stack).await;

    assert!(stack
        .facade
        .find_one("test", doc! { "documentId": "missing" })
        .await
        .unwrap()
        .is_none());
    assert!(stack
        .facade
        .find("test", doc! {}, Default::default())
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        stack.facade.count_documents("test", doc! {}).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn outage_delete_queues_and_drops_snapshot() {
    let stack = TestStack::new();
    open_breaker(&stack).await;

    stack
        .facade
        .insert_one("test", doc! { "documentId": "d1", "name": "Doc" })
        .await
        .unwrap();
    let outcome = stack
        .facade
        .delete_one("test", doc! { "documentId": "d1" })
        .await
        .unwrap();
    assert!(outcome.used_fallback);
    assert_eq!(outcome.deleted_count, 0);

    // Snapshot no longer reflects intent.
    assert!(stack
        .facade
        .find_one("test", doc! { "documentId": "d1" })
        .await
        .unwrap()
        .is_none());
    assert_eq!(stack.pending.count().await.unwrap(), 2);
}

#[tokio::test]
async fn healthy_facade_passes_straight_through() {
    let stack = TestStack::new();

    let outcome = stack
        .facade
        .insert_one("test", doc! { "documentId": "d1", "name": "Doc" })
        .await
        .unwrap();
    assert!(!outcome.used_fallback);
    assert_eq!(stack.pending.count().await.unwrap(), 0);

    let found = stack
        .facade
        .find_one("test", doc! { "documentId": "d1" })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.get_str("name").unwrap(), "Doc");

    let update = stack
        .facade
        .update_one(
            "test",
            doc! { "documentId": "d1" },
            doc! { "$set": { "name": "Doc2" } },
            false,
        )
        .await
        .unwrap();
    assert_eq!(update.matched_count, 1);
    assert!(!update.used_fallback);
}
