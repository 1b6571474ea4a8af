#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use std::sync::Arc;

use hookrelay::{
    crypto::Headers,
    db::StoreError,
    events::{NewEvent, archive_event, find_or_create, get_event, mark_replayed},
    executions::create_pending,
    types::{DedupState, EventStatus},
};
use tokio::sync::Barrier;

use common::{setup_db, setup_db_with, start_time};

fn new_event(external_id: &str) -> NewEvent {
    let mut headers = Headers::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    NewEvent {
        provider: "acme".to_string(),
        external_id: external_id.to_string(),
        event_type: "x".to_string(),
        payload: format!(r#"{{"id":"{external_id}","type":"x"}}"#),
        headers,
    }
}

#[tokio::test]
async fn first_create_is_unique_and_second_is_duplicate() {
    let db = setup_db().await;

    let (first, first_state) = find_or_create(&db.pool, &new_event("evt_1"), start_time())
        .await
        .unwrap();
    let (second, second_state) = find_or_create(&db.pool, &new_event("evt_1"), start_time())
        .await
        .unwrap();

    assert_eq!(first_state, DedupState::Unique);
    assert_eq!(second_state, DedupState::Duplicate);
    assert_eq!(first.id, second.id);
    assert_eq!(first.status, EventStatus::Received);
    assert_eq!(first.headers.get("content-type").map(String::as_str), Some("application/json"));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM incoming_events")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn same_external_id_from_other_provider_is_distinct() {
    let db = setup_db().await;

    let (a, _) = find_or_create(&db.pool, &new_event("evt_1"), start_time())
        .await
        .unwrap();
    let mut other = new_event("evt_1");
    other.provider = "globex".to_string();
    let (b, state) = find_or_create(&db.pool, &other, start_time()).await.unwrap();

    assert_eq!(state, DedupState::Unique);
    assert_ne!(a.id, b.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_resolve_to_one_event() {
    const WORKERS: usize = 8;
    let db = setup_db_with(4).await;
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let pool = db.pool.clone();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                find_or_create(&pool, &new_event("evt_race"), start_time())
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    let unique = results
        .iter()
        .filter(|(_, state)| *state == DedupState::Unique)
        .count();
    let duplicates = results
        .iter()
        .filter(|(_, state)| *state == DedupState::Duplicate)
        .count();
    assert_eq!(unique, 1);
    assert_eq!(duplicates, WORKERS - 1);

    let first_id = results[0].0.id;
    assert!(results.iter().all(|(event, _)| event.id == first_id));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM incoming_events")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn mark_replayed_tags_event_and_refuses_archived() {
    let db = setup_db().await;
    let (event, _) = find_or_create(&db.pool, &new_event("evt_1"), start_time())
        .await
        .unwrap();

    let replayed = mark_replayed(&db.pool, event.id, start_time()).await.unwrap();
    assert_eq!(replayed.dedup_state, DedupState::Replayed);
    assert_eq!(replayed.status, EventStatus::Received);

    let archived = archive_event(&db.pool, event.id, start_time()).await.unwrap();
    assert!(archived.archived_at.is_some());

    let err = mark_replayed(&db.pool, event.id, start_time())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(ref reason) if reason == "event_archived"));
}

#[tokio::test]
async fn archive_keeps_first_timestamp() {
    let db = setup_db().await;
    let (event, _) = find_or_create(&db.pool, &new_event("evt_1"), start_time())
        .await
        .unwrap();

    let first = archive_event(&db.pool, event.id, start_time()).await.unwrap();
    let later = start_time() + chrono::Duration::hours(1);
    let second = archive_event(&db.pool, event.id, later).await.unwrap();

    assert_eq!(first.archived_at, second.archived_at);
    assert!(matches!(
        archive_event(&db.pool, uuid::Uuid::new_v4(), later).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn events_with_actions_cannot_be_deleted() {
    let db = setup_db().await;
    let (event, _) = find_or_create(&db.pool, &new_event("evt_1"), start_time())
        .await
        .unwrap();
    create_pending(&db.pool, event.id, "notify", start_time())
        .await
        .unwrap();

    let deleted = sqlx::query("DELETE FROM incoming_events WHERE id = ?")
        .bind(event.id.to_string())
        .execute(&db.pool)
        .await;

    assert!(deleted.is_err());
    assert!(get_event(&db.pool, event.id).await.is_ok());
}
