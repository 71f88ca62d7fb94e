//! Redis document store. These need a live server:
//!
//! ```sh
//! REDIS_URL=redis://127.0.0.1:6379 cargo test --test redis_store_tests
//! ```

use futures_util::TryStreamExt;
use identity_docstore::application_port::*;
use identity_docstore::domain_model::*;
use identity_docstore::domain_port::*;
use serde_json::json;

mod common;

#[tokio::test]
async fn test_redis_create_find_and_delete() {
    let url = require_redis!();
    let store = common::redis_store(&url).await;
    let users = common::user_store(&store);

    let mut user = common::new_user("alice");
    users
        .add_claim(&mut user, &Claim::new("t1", "v1"))
        .await
        .unwrap();
    users.create(&mut user).await.unwrap();

    let found = users.find_by_id(user.id().unwrap()).await.unwrap().unwrap();
    assert_eq!(found, user);
    assert_eq!(
        users.find_by_name("alice").await.unwrap().and_then(|u| u.id),
        user.id
    );
    assert_eq!(
        users
            .find_by_email("alice@example.com")
            .await
            .unwrap()
            .and_then(|u| u.id),
        user.id
    );

    users.delete(&user).await.unwrap();
    assert!(users.find_by_id(user.id().unwrap()).await.unwrap().is_none());
    assert!(users.find_by_name("alice").await.unwrap().is_none());
}

#[tokio::test]
async fn test_redis_duplicate_email_is_non_unique_result() {
    let url = require_redis!();
    let store = common::redis_store(&url).await;
    let users = common::user_store(&store);

    let mut first = IdentityUser::new("first").with_email("dup@example.com");
    let mut second = IdentityUser::new("second").with_email("dup@example.com");
    users.create(&mut first).await.unwrap();
    users.create(&mut second).await.unwrap();

    assert!(matches!(
        users.find_by_email("dup@example.com").await,
        Err(IdentityStoreError::NonUniqueResult { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_redis_increments_are_atomic() {
    let url = require_redis!();
    let store = common::redis_store(&url).await;
    let users = common::user_store(&store);

    let mut user = common::new_user("hammered");
    users.create(&mut user).await.unwrap();

    let mut counts = Vec::new();
    for _ in 0..3 {
        counts.push(users.increment_access_failed_count(&mut user).await.unwrap());
    }
    assert_eq!(counts, vec![1, 2, 3]);

    let mut tasks = Vec::new();
    for _ in 0..4 {
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
    assert_eq!(loaded.access_failed_count, 23);
}

#[tokio::test]
async fn test_redis_patch_on_missing_document_is_not_found() {
    let url = require_redis!();
    let store = common::redis_store(&url).await;
    let mut session = store.clone().open_session();

    let result = session
        .patch("IdentityUsers/404", &[PatchCommand::inc(fields::ACCESS_FAILED_COUNT, 1)])
        .await;
    assert!(matches!(result, Err(SessionError::NotFound(_))));
}

#[tokio::test]
async fn test_redis_users_stream_and_paging() {
    let url = require_redis!();
    let store = common::redis_store(&url).await;
    let users = common::user_store(&store);

    for n in 0..5 {
        users
            .create(&mut common::new_user(&format!("user{n}")))
            .await
            .unwrap();
    }

    let all: Vec<IdentityUser> = users.users().try_collect().await.unwrap();
    assert_eq!(all.len(), 5);

    let mut session = store.clone().open_session();
    session
        .store_document("Things", None, json!({ "Name": "not a user" }))
        .await
        .unwrap();
    session.save_changes().await.unwrap();

    let page = session
        .query(&DocumentQuery::new(IdentityUser::COLLECTION).skip(1).take(2))
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
}
