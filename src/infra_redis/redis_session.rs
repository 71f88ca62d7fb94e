use super::RedisDocumentStore;
use crate::domain_port::*;
use crate::logger::*;
use serde_json::Value;
use std::sync::Arc;

pub struct RedisDocumentSession {
    store: Arc<RedisDocumentStore>,
    unit_of_work: UnitOfWork,
    closed: bool,
}

impl RedisDocumentSession {
    pub fn new(store: Arc<RedisDocumentStore>) -> Self {
        RedisDocumentSession {
            store,
            unit_of_work: UnitOfWork::new(),
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl DocumentSession for RedisDocumentSession {
    fn document_store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    async fn store_document(
        &mut self,
        collection: &str,
        id: Option<&str>,
        document: Value,
    ) -> Result<String, SessionError> {
        self.ensure_open()?;
        let id = match id {
            Some(id) => id.to_string(),
            None => self.store.next_id(collection).await?,
        };
        self.unit_of_work.stage_store(collection, &id, document)?;
        Ok(id)
    }

    fn delete(&mut self, id: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.unit_of_work.stage_delete(id);
        Ok(())
    }

    fn evict(&mut self, id: &str) {
        self.unit_of_work.forget(id);
    }

    async fn load(&mut self, id: &str) -> Result<Option<Value>, SessionError> {
        self.ensure_open()?;
        if let Some(pending) = self.unit_of_work.pending(id) {
            return Ok(pending.cloned());
        }
        self.store.load(id).await
    }

    async fn query(&mut self, query: &DocumentQuery) -> Result<Vec<Value>, SessionError> {
        self.ensure_open()?;
        if query.wait_for_non_stale_results {
            trace!(collection = %query.collection, "redis queries are never stale");
        }
        self.store.query(query).await
    }

    async fn save_changes(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        if self.unit_of_work.is_empty() {
            return Ok(());
        }

        let ops = self.unit_of_work.prepare_flush(self.store.listeners());
        let count = ops.len();
        self.store.apply_batch(ops).await?;
        self.unit_of_work.clear();

        debug!(count, "redis session saved changes");
        Ok(())
    }

    async fn patch(&mut self, id: &str, commands: &[PatchCommand]) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.store.apply_patch(id, commands).await
    }

    async fn refresh(&mut self, id: &str) -> Result<Value, SessionError> {
        self.ensure_open()?;
        self.unit_of_work.forget(id);
        self.store
            .load(id)
            .await?
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    fn close(&mut self) {
        self.closed = true;
        self.unit_of_work.clear();
    }
}
