use identity_docstore::application_impl::*;
use identity_docstore::domain_model::*;
use identity_docstore::domain_port::*;
use identity_docstore::infra_memory::*;
use identity_docstore::infra_redis::*;
use std::sync::Arc;
use std::time::Duration;

/// Check if a Redis server is available via environment variable.
#[allow(dead_code)]
pub fn redis_url() -> Option<String> {
    std::env::var("REDIS_URL").ok()
}

/// Skip test with message if Redis is not available.
#[macro_export]
macro_rules! require_redis {
    () => {
        match crate::common::redis_url() {
            Some(url) => url,
            None => {
                eprintln!("Skipping: REDIS_URL not set");
                return;
            }
        }
    };
}

/// Memory store with unique constraints enforced and an inline index.
#[allow(dead_code)]
pub fn memory_store() -> Arc<MemoryDocumentStore> {
    MemoryDocumentStore::builder()
        .register_listener(Arc::new(UniqueConstraintsListener::for_identity_users()))
        .enforce_unique_constraints(true)
        .build()
}

/// Memory store that records unique constraint markers but lets duplicates through.
#[allow(dead_code)]
pub fn lenient_memory_store() -> Arc<MemoryDocumentStore> {
    MemoryDocumentStore::builder()
        .register_listener(Arc::new(UniqueConstraintsListener::for_identity_users()))
        .build()
}

/// Memory store whose query index trails writes by `delay`.
#[allow(dead_code)]
pub fn lagging_memory_store(delay: Duration) -> Arc<MemoryDocumentStore> {
    MemoryDocumentStore::builder()
        .register_listener(Arc::new(UniqueConstraintsListener::for_identity_users()))
        .indexing_delay(delay)
        .stale_wait_timeout(Duration::from_secs(5))
        .build()
}

/// Redis store under a fresh key prefix so tests never see each other's data.
#[allow(dead_code)]
pub async fn redis_store(url: &str) -> Arc<RedisDocumentStore> {
    let prefix = format!("identity-test-{}", uuid::Uuid::new_v4());
    let store = RedisDocumentStore::connect(url, prefix)
        .await
        .expect("Failed to connect to Redis")
        .register_listener(Arc::new(UniqueConstraintsListener::for_identity_users()));
    Arc::new(store)
}

#[allow(dead_code)]
pub fn user_store<S: DocumentStore + 'static>(store: &Arc<S>) -> DocumentUserStore {
    DocumentUserStore::new(store.clone().open_session()).expect("Failed to open user store")
}

#[allow(dead_code)]
pub fn new_user(user_name: &str) -> IdentityUser {
    IdentityUser::new(user_name).with_email(format!("{user_name}@example.com"))
}
