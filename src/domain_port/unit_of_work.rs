use super::{COLLECTION_KEY, ID_FIELD, METADATA_FIELD, SessionError, StoreEvent, StoreListener};
use serde_json::{Value, json};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum PendingOp {
    Store {
        collection: String,
        id: String,
        document: Value,
    },
    Delete {
        id: String,
    },
}

impl PendingOp {
    pub fn id(&self) -> &str {
        match self {
            PendingOp::Store { id, .. } | PendingOp::Delete { id } => id,
        }
    }
}

/// Puts and deletes buffered by a session until `save_changes`.
///
/// Only the latest operation per document id is kept.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    ops: Vec<PendingOp>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps `Id` and collection metadata onto the document, then buffers it.
    pub fn stage_store(
        &mut self,
        collection: &str,
        id: &str,
        mut document: Value,
    ) -> Result<(), SessionError> {
        let Some(fields) = document.as_object_mut() else {
            return Err(SessionError::InvalidDocument(format!(
                "{id} is not a JSON object"
            )));
        };
        fields.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        fields.insert(METADATA_FIELD.to_string(), json!({ COLLECTION_KEY: collection }));

        self.forget(id);
        self.ops.push(PendingOp::Store {
            collection: collection.to_string(),
            id: id.to_string(),
            document,
        });
        Ok(())
    }

    pub fn stage_delete(&mut self, id: &str) {
        self.forget(id);
        self.ops.push(PendingOp::Delete { id: id.to_string() });
    }

    pub fn forget(&mut self, id: &str) {
        self.ops.retain(|op| op.id() != id);
    }

    /// `Some(None)` when the document is buffered for deletion.
    pub fn pending(&self, id: &str) -> Option<Option<&Value>> {
        self.ops.iter().rev().find(|op| op.id() == id).map(|op| match op {
            PendingOp::Store { document, .. } => Some(document),
            PendingOp::Delete { .. } => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Copy of the buffer with every listener applied to each put.
    /// The buffer itself is kept until [`UnitOfWork::clear`] so a failed flush can be retried.
    pub fn prepare_flush(&self, listeners: &[Arc<dyn StoreListener>]) -> Vec<PendingOp> {
        let mut ops = self.ops.clone();
        for op in &mut ops {
            if let PendingOp::Store {
                collection,
                id,
                document,
            } = op
            {
                for listener in listeners {
                    listener.before_store(&mut StoreEvent {
                        collection: collection.as_str(),
                        id: id.as_str(),
                        document,
                    });
                }
            }
        }
        ops
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }
}
