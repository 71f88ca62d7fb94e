//! In-memory document store: lagging index, unique constraints and atomic patches.

use identity_docstore::application_port::*;
use identity_docstore::domain_model::*;
use identity_docstore::domain_port::*;
use serde_json::json;
use std::time::Duration;

mod common;

fn users_named(name: &str) -> DocumentQuery {
    DocumentQuery::new(IdentityUser::COLLECTION)
        .filter(Predicate::field_equals(fields::USER_NAME, name))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_queries_lag_until_indexed() {
    let store = common::lagging_memory_store(Duration::from_millis(200));
    let mut session = store.clone().open_session();

    session
        .store_document(
            IdentityUser::COLLECTION,
            None,
            json!({ "UserName": "slow" }),
        )
        .await
        .unwrap();
    session.save_changes().await.unwrap();

    assert!(store.is_stale());
    assert!(session.query(&users_named("slow")).await.unwrap().is_empty());

    let fresh = session
        .query(&users_named("slow").wait_for_non_stale_results_as_of_last_write())
        .await
        .unwrap();
    assert_eq!(fresh.len(), 1);
    assert!(!store.is_stale());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_loads_see_writes_before_indexing() {
    let store = common::lagging_memory_store(Duration::from_secs(60));
    let mut writer = store.clone().open_session();
    let id = writer
        .store_document("Things", None, json!({ "Name": "x" }))
        .await
        .unwrap();
    writer.save_changes().await.unwrap();

    let mut reader = store.clone().open_session();
    let loaded = reader.load(&id).await.unwrap().unwrap();
    assert_eq!(loaded["Name"], "x");
    assert_eq!(document_collection(&loaded), Some("Things"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lookup_waits_for_index_after_create() {
    let store = common::lagging_memory_store(Duration::from_millis(100));
    let users = common::user_store(&store);

    let mut user = common::new_user("patient");
    users.create(&mut user).await.unwrap();

    let found = users.find_by_name("patient").await.unwrap();
    assert_eq!(found.and_then(|u| u.id), user.id);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_waiting_query_times_out_when_index_never_catches_up() {
    let store = identity_docstore::infra_memory::MemoryDocumentStore::builder()
        .register_listener(std::sync::Arc::new(
            UniqueConstraintsListener::for_identity_users(),
        ))
        .indexing_delay(Duration::from_secs(3600))
        .stale_wait_timeout(Duration::from_millis(50))
        .build();
    let mut session = store.clone().open_session();
    session
        .store_document(IdentityUser::COLLECTION, None, json!({ "UserName": "x" }))
        .await
        .unwrap();
    session.save_changes().await.unwrap();

    let result = session
        .query(&users_named("x").wait_for_non_stale_results_as_of_last_write())
        .await;
    assert!(matches!(result, Err(SessionError::StaleIndexTimeout)));
}

#[tokio::test]
async fn test_unique_user_name_is_enforced_on_save() {
    let store = common::memory_store();
    let users = common::user_store(&store);

    let mut first = IdentityUser::new("taken");
    users.create(&mut first).await.unwrap();

    let mut second = IdentityUser::new("taken");
    let err = users.create(&mut second).await.unwrap_err();
    match err {
        IdentityStoreError::Session(SessionError::UniqueConstraintViolation {
            field,
            value,
            owner,
            ..
        }) => {
            assert_eq!(field, fields::USER_NAME);
            assert_eq!(value, "taken");
            assert_eq!(Some(owner.as_str()), first.id());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(second.id().is_none());

    // the rejected put is not retried by the next flush
    let mut third = IdentityUser::new("free");
    users.create(&mut third).await.unwrap();
    assert_eq!(store.document_count(), 2);
    assert_eq!(
        users.find_by_name("taken").await.unwrap().and_then(|u| u.id),
        first.id
    );
}

#[tokio::test]
async fn test_user_may_keep_its_own_unique_values_on_update() {
    let store = common::memory_store();
    let users = common::user_store(&store);

    let mut user = common::new_user("steady");
    users.create(&mut user).await.unwrap();
    users.set_email_confirmed(&mut user, true).await.unwrap();
    users.update(&user).await.unwrap();

    let stored = users.find_by_id(user.id().unwrap()).await.unwrap().unwrap();
    assert!(stored.email_confirmed);
}

#[tokio::test]
async fn test_rejected_update_does_not_block_later_writes() {
    let store = common::memory_store();
    let users = common::user_store(&store);

    let mut a = common::new_user("a");
    let mut b = common::new_user("b");
    users.create(&mut a).await.unwrap();
    users.create(&mut b).await.unwrap();

    users.set_email(&mut b, "a@example.com").await.unwrap();
    let err = users.update(&b).await.unwrap_err();
    assert!(matches!(
        err,
        IdentityStoreError::Session(SessionError::UniqueConstraintViolation { .. })
    ));

    let mut c = common::new_user("c");
    users.create(&mut c).await.unwrap();
    let mut d = common::new_user("d");
    users.create(&mut d).await.unwrap();

    let stored_b = users.find_by_id(b.id().unwrap()).await.unwrap().unwrap();
    assert_eq!(stored_b.email.as_deref(), Some("b@example.com"));
    assert_eq!(store.document_count(), 4);
}

#[tokio::test]
async fn test_duplicate_inside_one_batch_is_rejected() {
    let store = common::memory_store();
    let mut session = store.clone().open_session();
    for _ in 0..2 {
        session
            .store_document(IdentityUser::COLLECTION, None, json!({ "UserName": "same" }))
            .await
            .unwrap();
    }

    let result = session.save_changes().await;
    assert!(matches!(
        result,
        Err(SessionError::UniqueConstraintViolation { .. })
    ));
    assert_eq!(store.document_count(), 0);
}

#[tokio::test]
async fn test_unique_markers_are_written_to_metadata() {
    let store = common::memory_store();
    let users = common::user_store(&store);

    let mut user = IdentityUser::new("marked").with_email("marked@example.com");
    users.create(&mut user).await.unwrap();

    let mut session = store.clone().open_session();
    let document = session.load(user.id().unwrap()).await.unwrap().unwrap();
    let constraints = unique_constraints(&document);
    assert_eq!(constraints.len(), 2);
    assert!(
        constraints
            .iter()
            .any(|c| c.field == fields::USER_NAME && c.value == "marked")
    );
    assert!(
        constraints
            .iter()
            .any(|c| c.field == fields::EMAIL && c.value == "marked@example.com")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_are_not_lost() {
    let store = common::memory_store();
    let users = common::user_store(&store);
    let mut user = common::new_user("hammered");
    users.create(&mut user).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let mut user = user.clone();
        tasks.push(tokio::spawn(async move {
            let users = common::user_store(&store);
            for _ in 0..5 {
                users.increment_access_failed_count(&mut user).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let loaded = users.find_by_id(user.id().unwrap()).await.unwrap().unwrap();
    assert_eq!(loaded.access_failed_count, 40);
}

#[tokio::test]
async fn test_patch_on_missing_document_is_not_found() {
    let store = common::memory_store();
    let mut session = store.clone().open_session();

    let result = session
        .patch("IdentityUsers/404", &[PatchCommand::inc(fields::ACCESS_FAILED_COUNT, 1)])
        .await;
    assert!(matches!(result, Err(SessionError::NotFound(_))));
}

#[tokio::test]
async fn test_session_reads_its_own_pending_changes() {
    let store = common::memory_store();
    let mut session = store.clone().open_session();

    let id = session
        .store_document("Things", None, json!({ "Name": "draft" }))
        .await
        .unwrap();
    assert_eq!(session.load(&id).await.unwrap().unwrap()["Name"], "draft");
    assert_eq!(store.document_count(), 0);

    session.save_changes().await.unwrap();
    session.delete(&id).unwrap();
    assert!(session.load(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_refresh_discards_pending_put() {
    let store = common::memory_store();
    let mut session = store.clone().open_session();

    let id = session
        .store_document("Things", None, json!({ "Name": "saved" }))
        .await
        .unwrap();
    session.save_changes().await.unwrap();

    session
        .store_document("Things", Some(&id), json!({ "Name": "edited" }))
        .await
        .unwrap();
    let refreshed = session.refresh(&id).await.unwrap();
    assert_eq!(refreshed["Name"], "saved");

    session.save_changes().await.unwrap();
    assert_eq!(session.load(&id).await.unwrap().unwrap()["Name"], "saved");
}

#[tokio::test]
async fn test_closed_session_rejects_calls() {
    let store = common::memory_store();
    let mut session = store.clone().open_session();
    session.close();

    assert!(matches!(
        session.load("Things/1").await,
        Err(SessionError::Closed)
    ));
    assert!(matches!(
        session.save_changes().await,
        Err(SessionError::Closed)
    ));
    assert!(matches!(session.delete("Things/1"), Err(SessionError::Closed)));
}

#[tokio::test]
async fn test_queries_page_in_id_order() {
    let store = common::memory_store();
    let mut session = store.clone().open_session();
    for name in ["a", "b", "c", "d"] {
        session
            .store_document("Things", None, json!({ "Name": name }))
            .await
            .unwrap();
    }
    session.save_changes().await.unwrap();

    let page = session
        .query(&DocumentQuery::new("Things").skip(1).take(2))
        .await
        .unwrap();
    let names: Vec<&str> = page.iter().filter_map(|d| d["Name"].as_str()).collect();
    assert_eq!(names, vec!["b", "c"]);
}
