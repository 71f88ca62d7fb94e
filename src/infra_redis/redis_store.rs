use super::RedisDocumentSession;
use crate::domain_port::*;
use crate::logger::*;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

const PATCH_DOCUMENT: &str = include_str!("patch_document.lua");

/// Document store on Redis.
///
/// Each document is a hash whose fields are the document's top-level
/// properties, JSON encoded. Queries scan the collection's id set and read
/// the hashes directly, so results are never stale.
pub struct RedisDocumentStore {
    conn: ConnectionManager,
    prefix: String,
    listeners: Vec<Arc<dyn StoreListener>>,
}

impl RedisDocumentStore {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        RedisDocumentStore {
            conn,
            prefix: prefix.into(),
            listeners: Vec::new(),
        }
    }

    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, SessionError> {
        let client = redis::Client::open(url).map_err(store_error)?;
        let conn = client.get_connection_manager().await.map_err(store_error)?;
        info!(url, "connected to redis document store");
        Ok(Self::new(conn, prefix))
    }

    pub fn register_listener(mut self, listener: Arc<dyn StoreListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    fn doc_key(&self, id: &str) -> String {
        format!("{}:doc:{}", self.prefix, id)
    }

    fn col_key(&self, collection: &str) -> String {
        format!("{}:col:{}", self.prefix, collection)
    }

    fn hilo_key(&self, collection: &str) -> String {
        format!("{}:hilo:{}", self.prefix, collection)
    }

    pub(super) async fn next_id(&self, collection: &str) -> Result<String, SessionError> {
        let mut conn = self.conn.clone();
        let n: u64 = conn
            .incr(self.hilo_key(collection), 1)
            .await
            .map_err(store_error)?;
        Ok(format!("{collection}/{n}"))
    }

    pub(super) async fn load(&self, id: &str) -> Result<Option<Value>, SessionError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> =
            conn.hgetall(self.doc_key(id)).await.map_err(store_error)?;
        if fields.is_empty() {
            return Ok(None);
        }
        decode_document(fields).map(Some)
    }

    pub(super) async fn query(&self, query: &DocumentQuery) -> Result<Vec<Value>, SessionError> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<String> = conn
            .smembers(self.col_key(&query.collection))
            .await
            .map_err(store_error)?;
        ids.sort();

        // unfiltered pages only need the hashes they return
        let paged = matches!(query.predicate, Predicate::All);
        if paged {
            ids = page_ids(ids, query.skip, query.take);
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hgetall(self.doc_key(id));
        }
        let rows: Vec<HashMap<String, String>> =
            pipe.query_async(&mut conn).await.map_err(store_error)?;

        let documents = rows
            .into_iter()
            .filter(|fields| !fields.is_empty())
            .map(decode_document)
            .collect::<Result<Vec<_>, _>>()?;
        if paged {
            Ok(documents)
        } else {
            Ok(query.select(&documents))
        }
    }

    pub(super) async fn apply_batch(&self, ops: Vec<PendingOp>) -> Result<(), SessionError> {
        let mut pipe = redis::pipe();
        pipe.atomic();

        for op in ops {
            match op {
                PendingOp::Store {
                    collection,
                    id,
                    document,
                } => {
                    let key = self.doc_key(&id);
                    pipe.del(&key).ignore();
                    let fields = encode_document(&document)?;
                    pipe.hset_multiple(&key, fields.as_slice()).ignore();
                    pipe.sadd(self.col_key(&collection), &id).ignore();
                }
                PendingOp::Delete { id } => {
                    if let Some(collection) = self.stored_collection(&id).await? {
                        pipe.srem(self.col_key(&collection), &id).ignore();
                    }
                    pipe.del(self.doc_key(&id)).ignore();
                }
            }
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await.map_err(store_error)?;
        Ok(())
    }

    /// Runs every command in one script call, so concurrent patches never interleave.
    pub(super) async fn apply_patch(
        &self,
        id: &str,
        commands: &[PatchCommand],
    ) -> Result<(), SessionError> {
        let script = Script::new(PATCH_DOCUMENT);
        let mut invocation = script.key(self.doc_key(id));
        for command in commands {
            match command {
                PatchCommand::Inc { field, delta } => {
                    invocation.arg("inc").arg(field).arg(*delta);
                }
                PatchCommand::Set { field, value } => {
                    invocation
                        .arg("set")
                        .arg(field)
                        .arg(serde_json::to_string(value)?);
                }
            }
        }

        let mut conn = self.conn.clone();
        let found: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        match found {
            1 => Ok(()),
            _ => Err(SessionError::NotFound(id.to_string())),
        }
    }

    async fn stored_collection(&self, id: &str) -> Result<Option<String>, SessionError> {
        let mut conn = self.conn.clone();
        let metadata: Option<String> = conn
            .hget(self.doc_key(id), METADATA_FIELD)
            .await
            .map_err(store_error)?;
        let Some(metadata) = metadata else {
            return Ok(None);
        };
        let metadata: Value = serde_json::from_str(&metadata)?;
        Ok(metadata
            .get(COLLECTION_KEY)
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

impl DocumentStore for RedisDocumentStore {
    fn listeners(&self) -> &[Arc<dyn StoreListener>] {
        &self.listeners
    }

    fn open_session(self: Arc<Self>) -> Box<dyn DocumentSession> {
        Box::new(RedisDocumentSession::new(self))
    }
}

fn store_error(e: RedisError) -> SessionError {
    SessionError::Store(e.to_string())
}

fn encode_document(document: &Value) -> Result<Vec<(String, String)>, SessionError> {
    let Some(fields) = document.as_object() else {
        return Err(SessionError::InvalidDocument(
            "documents must be JSON objects".to_string(),
        ));
    };
    fields
        .iter()
        .map(|(name, value)| Ok((name.clone(), serde_json::to_string(value)?)))
        .collect()
}

fn page_ids(ids: Vec<String>, skip: usize, take: Option<usize>) -> Vec<String> {
    ids.into_iter()
        .skip(skip)
        .take(take.unwrap_or(usize::MAX))
        .collect()
}

fn decode_document(fields: HashMap<String, String>) -> Result<Value, SessionError> {
    let mut document = Map::with_capacity(fields.len());
    for (name, raw) in fields {
        document.insert(name, serde_json::from_str(&raw)?);
    }
    Ok(Value::Object(document))
}
