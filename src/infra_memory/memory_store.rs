use super::MemoryDocumentSession;
use crate::domain_port::*;
use crate::logger::*;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const DEFAULT_STALE_WAIT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
struct StoredDocument {
    collection: String,
    document: Value,
}

struct IndexUpdate {
    etag: u64,
    id: String,
    document: Option<StoredDocument>,
}

/// Embedded document store.
///
/// Loads always see the latest committed write. Queries read a separate index
/// which, when an indexing delay is configured, is refreshed by a background
/// task and may lag behind writes.
pub struct MemoryDocumentStore {
    listeners: Vec<Arc<dyn StoreListener>>,
    enforce_unique_constraints: bool,
    stale_wait_timeout: Duration,
    lagging: bool,
    documents: DashMap<String, StoredDocument>,
    index: DashMap<String, StoredDocument>,
    pending_index: Mutex<Vec<IndexUpdate>>,
    write_lock: Mutex<()>,
    hilo: DashMap<String, u64>,
    last_etag: AtomicU64,
    indexed_etag: watch::Sender<u64>,
    cancel: CancellationToken,
}

#[derive(Default)]
pub struct MemoryDocumentStoreBuilder {
    listeners: Vec<Arc<dyn StoreListener>>,
    indexing_delay: Option<Duration>,
    enforce_unique_constraints: bool,
    stale_wait_timeout: Option<Duration>,
}

impl MemoryDocumentStoreBuilder {
    pub fn register_listener(mut self, listener: Arc<dyn StoreListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Refresh the query index every `delay` instead of on every write.
    /// A zero delay keeps indexing inline.
    pub fn indexing_delay(mut self, delay: Duration) -> Self {
        self.indexing_delay = (!delay.is_zero()).then_some(delay);
        self
    }

    /// Reject writes that break a [`UniqueConstraintsListener`] marker.
    pub fn enforce_unique_constraints(mut self, enforce: bool) -> Self {
        self.enforce_unique_constraints = enforce;
        self
    }

    pub fn stale_wait_timeout(mut self, timeout: Duration) -> Self {
        self.stale_wait_timeout = Some(timeout);
        self
    }

    /// Must be called inside a tokio runtime when an indexing delay is set.
    pub fn build(self) -> Arc<MemoryDocumentStore> {
        let (indexed_etag, _) = watch::channel(0);
        let store = Arc::new(MemoryDocumentStore {
            listeners: self.listeners,
            enforce_unique_constraints: self.enforce_unique_constraints,
            stale_wait_timeout: self.stale_wait_timeout.unwrap_or(DEFAULT_STALE_WAIT_TIMEOUT),
            lagging: self.indexing_delay.is_some(),
            documents: DashMap::new(),
            index: DashMap::new(),
            pending_index: Mutex::new(Vec::new()),
            write_lock: Mutex::new(()),
            hilo: DashMap::new(),
            last_etag: AtomicU64::new(0),
            indexed_etag,
            cancel: CancellationToken::new(),
        });

        if let Some(delay) = self.indexing_delay {
            spawn_indexer(&store, delay);
        }
        info!(
            listeners = store.listeners.len(),
            lagging = store.lagging,
            enforce_unique_constraints = store.enforce_unique_constraints,
            "memory document store ready"
        );
        store
    }
}

fn spawn_indexer(store: &Arc<MemoryDocumentStore>, delay: Duration) {
    let weak = Arc::downgrade(store);
    let cancel = store.cancel.clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + delay, delay);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(store) = weak.upgrade() else { break };
                    store.run_indexing();
                }
            }
        }
        debug!("memory indexer stopped");
    });
}

impl MemoryDocumentStore {
    pub fn builder() -> MemoryDocumentStoreBuilder {
        MemoryDocumentStoreBuilder::default()
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn is_stale(&self) -> bool {
        *self.indexed_etag.borrow() < self.last_etag.load(Ordering::Acquire)
    }

    /// Resolves once the index reflects every write committed so far.
    pub async fn wait_for_indexing(&self) {
        let target = self.last_etag.load(Ordering::Acquire);
        let mut indexed = self.indexed_etag.subscribe();
        // the sender lives as long as `self`, so this cannot fail
        let _ = indexed.wait_for(|etag| *etag >= target).await;
    }

    pub(super) fn next_id(&self, collection: &str) -> String {
        let mut counter = self.hilo.entry(collection.to_string()).or_insert(0);
        *counter += 1;
        format!("{collection}/{}", *counter)
    }

    pub(super) fn load(&self, id: &str) -> Option<Value> {
        self.documents.get(id).map(|d| d.document.clone())
    }

    pub(super) async fn query(&self, query: &DocumentQuery) -> Result<Vec<Value>, SessionError> {
        if query.wait_for_non_stale_results {
            tokio::time::timeout(self.stale_wait_timeout, self.wait_for_indexing())
                .await
                .map_err(|_| SessionError::StaleIndexTimeout)?;
        }

        let mut hits: Vec<(String, Value)> = self
            .index
            .iter()
            .filter(|entry| entry.collection == query.collection)
            .map(|entry| (entry.key().clone(), entry.document.clone()))
            .collect();
        hits.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(query.select(hits.iter().map(|(_, doc)| doc)))
    }

    pub(super) fn apply_batch(&self, ops: Vec<PendingOp>) -> Result<(), SessionError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.enforce_unique_constraints {
            self.check_unique_constraints(&ops)?;
        }

        let mut updates = Vec::with_capacity(ops.len());
        for op in ops {
            let etag = self.last_etag.fetch_add(1, Ordering::AcqRel) + 1;
            match op {
                PendingOp::Store {
                    collection,
                    id,
                    document,
                } => {
                    let stored = StoredDocument {
                        collection,
                        document,
                    };
                    self.documents.insert(id.clone(), stored.clone());
                    updates.push(IndexUpdate {
                        etag,
                        id,
                        document: Some(stored),
                    });
                }
                PendingOp::Delete { id } => {
                    self.documents.remove(&id);
                    updates.push(IndexUpdate {
                        etag,
                        id,
                        document: None,
                    });
                }
            }
        }
        self.publish(updates);
        Ok(())
    }

    pub(super) fn apply_patch(&self, id: &str, commands: &[PatchCommand]) -> Result<(), SessionError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut stored = self
            .documents
            .get(id)
            .map(|d| d.value().clone())
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let fields = stored
            .document
            .as_object_mut()
            .ok_or_else(|| SessionError::InvalidDocument(format!("{id} is not a JSON object")))?;
        for command in commands {
            command.apply(fields);
        }

        let etag = self.last_etag.fetch_add(1, Ordering::AcqRel) + 1;
        self.documents.insert(id.to_string(), stored.clone());
        self.publish(vec![IndexUpdate {
            etag,
            id: id.to_string(),
            document: Some(stored),
        }]);
        Ok(())
    }

    fn check_unique_constraints(&self, ops: &[PendingOp]) -> Result<(), SessionError> {
        let touched: HashSet<&str> = ops.iter().map(PendingOp::id).collect();
        let mut claimed: HashMap<(&str, UniqueConstraint), &str> = HashMap::new();

        for op in ops {
            let PendingOp::Store {
                collection,
                id,
                document,
            } = op
            else {
                continue;
            };

            for constraint in unique_constraints(document) {
                let in_batch = claimed
                    .insert((collection.as_str(), constraint.clone()), id.as_str())
                    .filter(|owner| *owner != id.as_str())
                    .map(str::to_string);
                let owner = in_batch.or_else(|| {
                    self.documents
                        .iter()
                        .find(|entry| {
                            !touched.contains(entry.key().as_str())
                                && entry.collection == *collection
                                && unique_constraints(&entry.document).contains(&constraint)
                        })
                        .map(|entry| entry.key().clone())
                });

                if let Some(owner) = owner {
                    return Err(SessionError::UniqueConstraintViolation {
                        collection: collection.clone(),
                        field: constraint.field,
                        value: constraint.value,
                        owner,
                    });
                }
            }
        }
        Ok(())
    }

    fn publish(&self, updates: Vec<IndexUpdate>) {
        if self.lagging {
            self.pending_index
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(updates);
        } else {
            self.apply_index(updates);
        }
    }

    fn run_indexing(&self) {
        let updates = std::mem::take(
            &mut *self
                .pending_index
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if !updates.is_empty() {
            trace!(count = updates.len(), "indexing documents");
            self.apply_index(updates);
        }
    }

    fn apply_index(&self, updates: Vec<IndexUpdate>) {
        let mut newest = 0;
        for update in updates {
            newest = newest.max(update.etag);
            match update.document {
                Some(stored) => {
                    self.index.insert(update.id, stored);
                }
                None => {
                    self.index.remove(&update.id);
                }
            }
        }
        self.indexed_etag.send_modify(|etag| *etag = (*etag).max(newest));
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn listeners(&self) -> &[Arc<dyn StoreListener>] {
        &self.listeners
    }

    fn open_session(self: Arc<Self>) -> Box<dyn DocumentSession> {
        Box::new(MemoryDocumentSession::new(self))
    }
}

impl Drop for MemoryDocumentStore {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
