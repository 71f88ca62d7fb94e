use super::{DocumentQuery, PatchCommand, StoreListener};
use serde_json::Value;
use std::sync::Arc;

pub const ID_FIELD: &str = "Id";
pub const METADATA_FIELD: &str = "@metadata";
pub const COLLECTION_KEY: &str = "Collection";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("unique constraint violated: {collection}.{field} = {value:?} is held by {owner}")]
    UniqueConstraintViolation {
        collection: String,
        field: String,
        value: String,
        owner: String,
    },
    #[error("timed out waiting for non-stale results")]
    StaleIndexTimeout,
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store error: {0}")]
    Store(String),
}

/// Owner of the data and of the listeners applied to every session it opens.
pub trait DocumentStore: Send + Sync {
    fn listeners(&self) -> &[Arc<dyn StoreListener>];

    fn open_session(self: Arc<Self>) -> Box<dyn DocumentSession>;
}

pub fn has_listener<L: StoreListener + 'static>(store: &dyn DocumentStore) -> bool {
    store.listeners().iter().any(|l| l.as_any().is::<L>())
}

/// Unit of work over a [`DocumentStore`]. Not safe for concurrent use.
#[async_trait::async_trait]
pub trait DocumentSession: Send {
    fn document_store(&self) -> Arc<dyn DocumentStore>;

    /// Buffers a put and returns the document id, generating one when `id` is `None`.
    async fn store_document(
        &mut self,
        collection: &str,
        id: Option<&str>,
        document: Value,
    ) -> Result<String, SessionError>;

    fn delete(&mut self, id: &str) -> Result<(), SessionError>;

    /// Drops any buffered change for `id`.
    fn evict(&mut self, id: &str);

    async fn load(&mut self, id: &str) -> Result<Option<Value>, SessionError>;

    async fn query(&mut self, query: &DocumentQuery) -> Result<Vec<Value>, SessionError>;

    async fn save_changes(&mut self) -> Result<(), SessionError>;

    async fn patch(&mut self, id: &str, commands: &[PatchCommand]) -> Result<(), SessionError>;

    /// Reloads the persisted document, discarding any buffered put for it.
    async fn refresh(&mut self, id: &str) -> Result<Value, SessionError>;

    fn close(&mut self);
}

pub fn document_collection(document: &Value) -> Option<&str> {
    document
        .get(METADATA_FIELD)
        .and_then(|m| m.get(COLLECTION_KEY))
        .and_then(Value::as_str)
}
